use std::sync::atomic::{AtomicU64, Ordering};

const ORDER_TYPE: Ordering = Ordering::Relaxed;

/// Counters of a [`Cluster`](crate::Cluster).
#[derive(Default)]
pub struct Metrics {
    executions_num: AtomicU64,
    failures_num: AtomicU64,
    retries_num: AtomicU64,
    borrow_failures_num: AtomicU64,
    rebuilds_num: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    /// Increments counter for calls to `execute`.
    pub(crate) fn inc_executions(&self) {
        self.executions_num.fetch_add(1, ORDER_TYPE);
    }

    /// Increments counter for `execute` calls that returned an error.
    pub(crate) fn inc_failures(&self) {
        self.failures_num.fetch_add(1, ORDER_TYPE);
    }

    /// Increments counter for attempts beyond the first one.
    pub(crate) fn inc_retries(&self) {
        self.retries_num.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn inc_borrow_failures(&self) {
        self.borrow_failures_num.fetch_add(1, ORDER_TYPE);
    }

    /// Increments counter for completed rebuilds of the cluster state.
    pub(crate) fn inc_rebuilds(&self) {
        self.rebuilds_num.fetch_add(1, ORDER_TYPE);
    }

    pub fn get_executions_num(&self) -> u64 {
        self.executions_num.load(ORDER_TYPE)
    }

    pub fn get_failures_num(&self) -> u64 {
        self.failures_num.load(ORDER_TYPE)
    }

    pub fn get_retries_num(&self) -> u64 {
        self.retries_num.load(ORDER_TYPE)
    }

    pub fn get_borrow_failures_num(&self) -> u64 {
        self.borrow_failures_num.load(ORDER_TYPE)
    }

    pub fn get_rebuilds_num(&self) -> u64 {
        self.rebuilds_num.load(ORDER_TYPE)
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("executions", &self.get_executions_num())
            .field("failures", &self.get_failures_num())
            .field("retries", &self.get_retries_num())
            .field("borrow_failures", &self.get_borrow_failures_num())
            .field("rebuilds", &self.get_rebuilds_num())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Metrics;

    #[test]
    fn counters_start_at_zero_and_count() {
        let metrics = Metrics::new();
        assert_eq!(metrics.get_executions_num(), 0);

        metrics.inc_executions();
        metrics.inc_executions();
        metrics.inc_retries();
        metrics.inc_rebuilds();

        assert_eq!(metrics.get_executions_num(), 2);
        assert_eq!(metrics.get_retries_num(), 1);
        assert_eq!(metrics.get_rebuilds_num(), 1);
        assert_eq!(metrics.get_failures_num(), 0);
        assert_eq!(metrics.get_borrow_failures_num(), 0);
    }
}
