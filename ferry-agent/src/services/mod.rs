mod aggregator;
mod input;
mod output;
mod processor;
mod router;

pub use self::aggregator::*;
pub use self::input::*;
pub use self::output::*;
pub use self::processor::*;
pub use self::router::*;
