use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};

use ferry_statsd::metric;
use parking_lot::RwLock;

use crate::plugin::PluginKind;
use crate::statsd::{AgentCounters, AgentGauges};

/// Lifecycle state of a plugin runner.
///
/// Plugin errors never change the state. Runners move forward only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum RunnerState {
    /// The runner was built but not started.
    Created,
    /// The runner task was spawned and is preparing, such as connecting an output.
    Started,
    /// The runner is gathering, processing or writing.
    Running,
    /// Shutdown was requested and the runner is finishing its work.
    Stopping,
    /// The runner task has returned.
    Stopped,
}

impl RunnerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Running,
            3 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Started => "started",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// In-process counters of one plugin instance.
///
/// Every update is also reported to StatsD, tagged with the plugin name and kind.
#[derive(Debug)]
pub struct PluginStats {
    kind: PluginKind,
    name: String,
    state: AtomicU8,
    gathered: AtomicU64,
    gather_errors: AtomicU64,
    written: AtomicU64,
    write_errors: AtomicU64,
    dropped: AtomicU64,
    dropped_at_shutdown: AtomicU64,
    faults: AtomicU64,
    buffer_size: AtomicU64,
}

impl PluginStats {
    /// Creates zeroed statistics for a plugin instance.
    pub fn new(kind: PluginKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            state: AtomicU8::new(RunnerState::Created as u8),
            gathered: AtomicU64::new(0),
            gather_errors: AtomicU64::new(0),
            written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            dropped_at_shutdown: AtomicU64::new(0),
            faults: AtomicU64::new(0),
            buffer_size: AtomicU64::new(0),
        }
    }

    /// The kind of the plugin.
    pub fn kind(&self) -> PluginKind {
        self.kind
    }

    /// The name of the plugin instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current lifecycle state of the runner.
    pub fn state(&self) -> RunnerState {
        RunnerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: RunnerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Metrics accepted by the accumulator of this plugin.
    pub fn gathered(&self) -> u64 {
        self.gathered.load(Ordering::Relaxed)
    }

    /// Failed gathers and errors reported by an input.
    pub fn gather_errors(&self) -> u64 {
        self.gather_errors.load(Ordering::Relaxed)
    }

    /// Metrics written by an output.
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    /// Failed write attempts of an output.
    pub fn write_errors(&self) -> u64 {
        self.write_errors.load(Ordering::Relaxed)
    }

    /// Metrics lost, including those lost at shutdown.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Metrics that were still buffered when the output stopped.
    pub fn dropped_at_shutdown(&self) -> u64 {
        self.dropped_at_shutdown.load(Ordering::Relaxed)
    }

    /// Errors and panics of a processor or aggregator.
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Current number of metrics in the buffer of an output.
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size.load(Ordering::Relaxed)
    }

    pub(crate) fn add_gathered(&self, count: u64) {
        self.gathered.fetch_add(count, Ordering::Relaxed);
        metric!(
            counter(AgentCounters::MetricsGathered) += count as i64,
            plugin = &self.name,
            kind = self.kind.as_str(),
        );
    }

    pub(crate) fn add_gather_error(&self) {
        self.gather_errors.fetch_add(1, Ordering::Relaxed);
        metric!(
            counter(AgentCounters::InputGatherErrors) += 1,
            plugin = &self.name,
            kind = self.kind.as_str(),
        );
    }

    pub(crate) fn add_written(&self, count: u64) {
        self.written.fetch_add(count, Ordering::Relaxed);
        metric!(
            counter(AgentCounters::MetricsWritten) += count as i64,
            plugin = &self.name,
            kind = self.kind.as_str(),
        );
    }

    pub(crate) fn add_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
        metric!(
            counter(AgentCounters::OutputWriteErrors) += 1,
            plugin = &self.name,
            kind = self.kind.as_str(),
        );
    }

    pub(crate) fn add_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
        metric!(
            counter(AgentCounters::MetricsDropped) += count as i64,
            plugin = &self.name,
            kind = self.kind.as_str(),
        );
    }

    pub(crate) fn add_dropped_at_shutdown(&self, count: u64) {
        self.dropped_at_shutdown.fetch_add(count, Ordering::Relaxed);
        self.add_dropped(count);
    }

    pub(crate) fn add_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        let id = match self.kind {
            PluginKind::Aggregator => AgentCounters::AggregatorFaults,
            _ => AgentCounters::ProcessorFaults,
        };
        metric!(
            counter(id) += 1,
            plugin = &self.name,
            kind = self.kind.as_str(),
        );
    }

    pub(crate) fn set_buffer_size(&self, size: usize) {
        self.buffer_size.store(size as u64, Ordering::Relaxed);
        metric!(
            gauge(AgentGauges::OutputBufferSize) = size as u64,
            plugin = &self.name,
        );
    }
}

/// Statistics of all plugin instances of an agent.
///
/// Shared with plugins through the [`PluginContext`](crate::PluginContext), so inputs can report
/// on the agent itself.
#[derive(Debug, Default)]
pub struct Stats {
    plugins: RwLock<Vec<Arc<PluginStats>>>,
}

impl Stats {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a plugin instance and returns its statistics.
    pub fn register(&self, kind: PluginKind, name: impl Into<String>) -> Arc<PluginStats> {
        let stats = Arc::new(PluginStats::new(kind, name));
        self.plugins.write().push(Arc::clone(&stats));
        stats
    }

    /// Returns the statistics of all registered plugins in registration order.
    pub fn plugins(&self) -> Vec<Arc<PluginStats>> {
        self.plugins.read().clone()
    }

    /// Sums a counter over all plugins of a kind.
    pub fn total(&self, kind: PluginKind, counter: impl Fn(&PluginStats) -> u64) -> u64 {
        self.plugins
            .read()
            .iter()
            .filter(|stats| stats.kind() == kind)
            .map(|stats| counter(stats.as_ref()))
            .sum()
    }
}
