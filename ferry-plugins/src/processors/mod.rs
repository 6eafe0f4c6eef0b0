//! Built-in processors.

mod overrides;

pub use self::overrides::*;
