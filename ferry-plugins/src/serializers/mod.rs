//! Text formats for writing metrics.

pub mod influx;
