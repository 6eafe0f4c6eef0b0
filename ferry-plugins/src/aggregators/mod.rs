//! Built-in aggregators.

mod minmax;

pub use self::minmax::*;
