/// Bounds how many task bodies may run at once.
///
/// Not synchronized on its own; the scheduler keeps it inside the registry
/// lock so slot accounting and state transitions change together.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    limit: usize,
    running: usize,
}

impl ConcurrencyLimiter {
    /// `limit` is clamped to at least 1.
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            running: 0,
        }
    }

    /// Take a slot if one is free.
    pub fn try_acquire(&mut self) -> bool {
        if self.running < self.limit {
            self.running += 1;
            true
        } else {
            false
        }
    }

    pub fn release(&mut self) {
        self.running = self.running.saturating_sub(1);
    }

    /// Change the bound. Lowering it below `running` does not stop anything;
    /// new starts wait until enough slots free up.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn running(&self) -> usize {
        self.running
    }

    pub fn available(&self) -> usize {
        self.limit.saturating_sub(self.running)
    }

    /// Running / limit, in 0.0..=1.0 unless the limit was lowered mid-flight.
    pub fn utilization(&self) -> f64 {
        self.running as f64 / self.limit as f64
    }
}
