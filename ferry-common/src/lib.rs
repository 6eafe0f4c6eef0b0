//! Common functionality shared by the Ferry crates.
#![warn(missing_docs)]

mod retry;
mod sleep_handle;
pub mod time;

pub use crate::retry::*;
pub use crate::sleep_handle::*;
