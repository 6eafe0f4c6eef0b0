//! Configuration for the Ferry agent.
//!
//! The configuration is a single YAML file. It has a section with agent-wide defaults, blocks for
//! logging, self-observability and the runtime, and one list per plugin kind. Each plugin entry
//! names the plugin `type` and carries the plugin's own options next to the settings the agent
//! interprets itself.
//!
//! ```yaml
//! agent:
//!   interval: 10
//!   flush_interval: 10
//! inputs:
//!   - type: mem
//! outputs:
//!   - type: file
//!     files: ["stdout"]
//! ```
#![warn(missing_docs)]

mod config;
mod plugins;

pub use self::config::*;
pub use self::plugins::*;
