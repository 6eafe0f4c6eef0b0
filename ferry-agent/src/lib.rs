//! The metric pipeline runtime of Ferry.
//!
//! An [`Agent`] connects inputs, processors, aggregators and outputs created from a
//! [`PluginRegistry`]. Each plugin instance runs in its own service:
//!
//! ```text
//! InputService ─┐                      ┌─> MetricBuffer ─> OutputService
//! InputService ─┼─> PipelineService ───┼─> MetricBuffer ─> OutputService
//! InputService ─┘     │     ▲          │
//!                     ▼     │          │
//!               AggregatorService ─────┘
//! ```
//!
//! Inputs gather on their own interval and send batches through a bounded channel to the
//! pipeline. The pipeline runs all processors in order, hands copies to aggregators, and copies
//! the result into the [`MetricBuffer`] of every output. Each output flushes its buffer on an
//! interval or when a full batch is available, retrying failed writes with a backoff.
//!
//! Shutdown is requested through the [`Controller`](ferry_system::Controller). Inputs stop first,
//! then the pipeline drains, aggregators push a last time, and outputs flush what is left within
//! the shutdown timeout.
#![warn(missing_docs)]

mod accumulator;
mod agent;
mod buffer;
mod plugin;
mod registry;
mod services;
mod stats;
mod statsd;

pub use self::accumulator::*;
pub use self::agent::*;
pub use self::buffer::*;
pub use self::plugin::*;
pub use self::registry::*;
pub use self::services::*;
pub use self::stats::*;
