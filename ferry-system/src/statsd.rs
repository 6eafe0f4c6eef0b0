use ferry_statsd::CounterMetric;

/// Counter metrics for the service runtime.
pub enum SystemCounters {
    /// Number of tasks spawned through [`spawn`](crate::spawn).
    ///
    /// Tagged by:
    ///  - `id`: The task identifier, usually the name of the service.
    RuntimeTaskCreated,
    /// Number of spawned tasks that finished or were dropped.
    ///
    /// Tagged by:
    ///  - `id`: The task identifier, usually the name of the service.
    RuntimeTaskTerminated,
}

impl CounterMetric for SystemCounters {
    fn name(&self) -> &'static str {
        match self {
            Self::RuntimeTaskCreated => "runtime.task.spawn.created",
            Self::RuntimeTaskTerminated => "runtime.task.spawn.terminated",
        }
    }
}
