#![warn(rust_2018_idioms)]
#![allow(dead_code)]

pub mod cache;
pub mod calculator;
pub mod dispatcher;

pub use cache::AudioLevelCache;
pub use calculator::{MAX_LEVEL, MIN_LEVEL, calculate_level};
pub use dispatcher::{AudioLevelDispatcher, AudioLevelListener};
