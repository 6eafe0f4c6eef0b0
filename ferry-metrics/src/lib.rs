//! The in-memory metric representation flowing through the agent.
//!
//! A [`Metric`] is one timestamped record: a name, a sorted set of tags, a set of typed fields and
//! a [`MetricType`]. Metrics are created by inputs, transformed by processors and aggregators, and
//! copied into the buffer of every output.
//!
//! ```
//! use ferry_metrics::{FieldValue, Metric};
//!
//! let metric = Metric::new("cpu", chrono::Utc::now())
//!     .with_tag("host", "a")
//!     .with_field("usage", 42.0);
//!
//! assert_eq!(metric.tag("host"), Some("a"));
//! assert_eq!(metric.field("usage"), Some(&FieldValue::Float(42.0)));
//! ```
//!
//! # Tracking
//!
//! Inputs that need to know when their metrics were delivered, such as consumers acknowledging a
//! broker offset, attach a tracking handle through a [`Tracker`]. All copies of a tracked metric
//! share the handle. Once the last copy is gone, a [`DeliveryInfo`] is sent back to the input.
//!
//! # Filtering
//!
//! [`Filter`] implements the name, tag and field selection every plugin instance can configure
//! through a [`FilterConfig`].
#![warn(missing_docs)]

mod filter;
mod metric;
mod precision;
mod tracking;

pub use self::filter::*;
pub use self::metric::*;
pub use self::precision::*;
pub use self::tracking::*;
