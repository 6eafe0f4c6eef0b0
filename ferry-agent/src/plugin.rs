//! The plugin traits implemented by inputs, outputs, processors and aggregators.

use std::any::Any;
use std::fmt;
use std::io;

use async_trait::async_trait;
use ferry_metrics::Metric;

use crate::Accumulator;

/// The four kinds of plugins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    /// Collects metrics.
    Input,
    /// Transforms metrics in flight.
    Processor,
    /// Derives metrics over a period.
    Aggregator,
    /// Delivers metrics.
    Output,
}

impl PluginKind {
    /// Returns the lowercase name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Processor => "processor",
            Self::Aggregator => "aggregator",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error returned by a plugin.
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    /// The configured options could not be deserialized.
    #[error("invalid plugin options")]
    Options(#[from] serde_json::Error),
    /// An I/O operation failed.
    #[error("i/o error")]
    Io(#[from] io::Error),
    /// Any other failure, described by the plugin.
    #[error("{0}")]
    Custom(String),
    /// The plugin panicked.
    #[error("plugin panicked: {0}")]
    Panicked(String),
}

impl PluginError {
    /// Creates an error from a message.
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "unknown panic payload".to_owned(),
            },
        };

        Self::Panicked(message)
    }
}

/// A source of metrics gathered on an interval.
///
/// `gather` is called once per interval and never concurrently. It adds metrics and errors to the
/// [`Accumulator`]. Returning an error counts as a failed gather, the input keeps running.
#[async_trait]
pub trait Input: Send + 'static {
    /// A one-line description of the input.
    fn description() -> &'static str
    where
        Self: Sized;

    /// A commented YAML snippet with the options of the input.
    fn sample_config() -> &'static str
    where
        Self: Sized;

    /// Collects metrics into the accumulator.
    async fn gather(&mut self, acc: &mut Accumulator) -> Result<(), PluginError>;
}

/// A destination for metrics.
///
/// Writes are never called concurrently for the same output. A failed write is retried with the
/// same metrics after a backoff.
#[async_trait]
pub trait Output: Send + 'static {
    /// A one-line description of the output.
    fn description() -> &'static str
    where
        Self: Sized;

    /// A commented YAML snippet with the options of the output.
    fn sample_config() -> &'static str
    where
        Self: Sized;

    /// Establishes the connection before the first write.
    async fn connect(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Releases resources after the final write.
    async fn close(&mut self) -> Result<(), PluginError> {
        Ok(())
    }

    /// Writes a batch of metrics.
    async fn write(&mut self, metrics: &[Metric]) -> Result<(), PluginError>;
}

/// A transformation of metrics in the pipeline.
pub trait Processor: Send + 'static {
    /// A one-line description of the processor.
    fn description() -> &'static str
    where
        Self: Sized;

    /// A commented YAML snippet with the options of the processor.
    fn sample_config() -> &'static str
    where
        Self: Sized;

    /// Transforms a sequence of metrics into a new sequence.
    fn apply(&mut self, metrics: Vec<Metric>) -> Result<Vec<Metric>, PluginError>;
}

/// Derives metrics from the metrics seen during a period.
///
/// `add` is called for every metric passing the aggregator's filter. At the end of each period,
/// `push` emits the derived metrics, followed by `reset`.
pub trait Aggregator: Send + 'static {
    /// A one-line description of the aggregator.
    fn description() -> &'static str
    where
        Self: Sized;

    /// A commented YAML snippet with the options of the aggregator.
    fn sample_config() -> &'static str
    where
        Self: Sized;

    /// Adds a metric to the aggregation state.
    fn add(&mut self, metric: &Metric);

    /// Emits the aggregated metrics.
    fn push(&mut self, acc: &mut Accumulator);

    /// Clears the aggregation state.
    fn reset(&mut self);
}
