//! The Ferry agent.
//!
//! Ferry gathers metrics from inputs on an interval, transforms them with processors and
//! aggregators, and writes them to outputs in batches. Which plugins run, and how, is read from a
//! YAML configuration file.
//!
//! # Usage
//!
//! ```text
//! ferry --config ferry.yaml run
//! ```
//!
//! A commented starting point for the configuration is printed by `ferry config init`. The
//! effective configuration, including all defaults, is printed by `ferry config show`. To list
//! all built-in plugins, run `ferry plugins`.
//!
//! # Shutdown
//!
//! On `SIGINT` or `SIGTERM`, inputs stop gathering and outputs write what is left in their
//! buffers within `agent.shutdown_timeout`. A second signal stops immediately. If metrics were
//! dropped at shutdown, the process exits with status 1 unless `agent.exit_on_dropped` is
//! disabled.

mod cli;
mod cliapp;
mod setup;

use std::process;

#[cfg(target_os = "linux")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            ferry_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
