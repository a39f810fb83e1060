#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod accumulator;
pub mod aggregator;
pub mod stats;

pub use accumulator::{
    DEFAULT_INTERVAL, ReceiveStreamAccumulator, RetransmissionCounters, SendStreamAccumulator,
    StreamAccumulator,
};
pub use aggregator::{MALFORMED_SSRC, StatsAggregator, StreamDirection};
pub use stats::{
    AggregateReceiveStats, AggregateSendStats, ReceiveStreamStats, RetransmissionStats,
    SendStreamStats, StreamStats,
};
