//! Foundational system components for Ferry's services.
//!
//! Every long running part of the agent is a [`Service`]: it owns its state, runs in its own
//! task, and receives messages through a [`Receiver`]. Other components talk to it through an
//! [`Addr`]. Shutdown is coordinated through a [`Controller`], whose [`ShutdownHandle`]s are
//! observed by every service loop.
#![warn(missing_docs)]

mod controller;
mod runtime;
mod service;
mod statsd;

pub use self::controller::*;
pub use self::runtime::*;
pub use self::service::*;
