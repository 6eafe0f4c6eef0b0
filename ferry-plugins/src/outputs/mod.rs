//! Built-in outputs.

mod discard;
mod file;

pub use self::discard::*;
pub use self::file::*;
