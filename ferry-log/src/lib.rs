//! Logging facade for Ferry.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration
//! implements `serde` traits, so it can be obtained from configuration files.
//!
//! ```
//! # #[cfg(feature = "init")] {
//! use ferry_log::LogConfig;
//!
//! let log_config = LogConfig {
//!     enable_backtraces: true,
//!     ..LogConfig::default()
//! };
//!
//! ferry_log::init(&log_config);
//! # }
//! ```
//!
//! # Logging
//!
//! The basic use of the log crate is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`] where `error!` represents the highest-priority log messages
//! and `trace!` the lowest. The log messages are filtered by configuring the log level to exclude
//! messages with a lower priority.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for metrics that were lost and for invalid behavior.
//! - [`warn!`] for undesirable behavior, such as a plugin failing to gather or write.
//! - [`info!`] for messages relevant to the average user.
//! - [`debug!`] for messages usually relevant to debugging.
//! - [`trace!`] for full auxiliary information.
//!
//! Attach context as structured fields rather than formatting it into the message. Plugin
//! instances are identified by the field of their kind (`input`, `output`, `processor`,
//! `aggregator`):
//!
//! ```
//! use std::io::{Error, ErrorKind};
//!
//! let error = Error::new(ErrorKind::Other, "connection refused");
//! ferry_log::warn!(
//!     error = &error as &dyn std::error::Error,
//!     output = "influxdb",
//!     "failed to write batch",
//! );
//! ```
//!
//! ## Logging Error Types
//!
//! To log errors with all their causes, use the [`LogError`] wrapper:
//!
//! ```
//! use std::io::{Error, ErrorKind};
//! use ferry_log::LogError;
//!
//! let custom_error = Error::new(ErrorKind::Other, "oh no!");
//! ferry_log::error!("operation failed: {}", LogError(&custom_error));
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of test method. It enables test mode of the logger and customizes log levels
//! for the current crate.
//!
//! ```
//! # #[cfg(feature = "test")] {
//! #[test]
//! fn test_something() {
//!     ferry_log::init_test!();
//! }
//! # }
//! ```

#![warn(missing_docs)]

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
