/// Согласованный снимок состояния пула, снятый под одной блокировкой
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMetrics {
    pub pulled: usize,
    pub done: usize,
    pub failed: usize,
    pub active: usize,
    /// Живые слоты (текущее значение `concurrency`)
    pub concurrency: usize,
    /// Отменённые слоты, которые ещё не дождались
    pub retiring: usize,
    pub slots_created: usize,
    pub running: bool,
    pub waiting: Option<usize>,
    pub total: Option<usize>,
}

impl PoolMetrics {
    pub fn utilization(&self) -> f64 {
        let slots = self.concurrency + self.retiring;
        if slots == 0 {
            return 0.0;
        }
        self.active as f64 / slots as f64
    }

    pub fn success_rate(&self) -> f64 {
        let finished = self.done + self.failed;
        if finished == 0 {
            return 1.0;
        }
        self.done as f64 / finished as f64
    }

    /// Доля выполненных элементов; только при известной длине
    pub fn progress(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some(self.done as f64 / total as f64),
            None => None,
        }
    }

    /// Вытянуты, но ещё не завершены
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.pulled - self.done - self.failed
    }
}
