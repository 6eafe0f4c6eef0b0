//! Built-in inputs.

mod internal;
mod mem;

pub use self::internal::*;
pub use self::mem::*;
