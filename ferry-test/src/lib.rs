//! Helpers for testing the agent and its services.
//!
//! In every test, call [`setup`]. This sets up the logger so that all console output is captured
//! by the test runner. All logs emitted with [`ferry_log`] show up for test failures or when run
//! with `--nocapture`.
//!
//! # Example
//!
//! ```no_run
//! #[test]
//! fn my_test() {
//!     ferry_test::setup();
//!
//!     ferry_log::debug!("hello, world!");
//! }
//! ```

/// Sets up the test environment.
///
/// Initializes logs for all Ferry crates and mutes logs of third-party crates.
pub fn setup() {
    ferry_log::__init_test("ferry");
}
