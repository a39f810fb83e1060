#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod error;
pub mod rate;
pub mod seqnum;

pub use error::{Error, Result};
pub use rate::RateStatistics;
pub use seqnum::{is_newer, seq_delta};
