pub mod cache;
pub mod clock;
pub mod commands;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod jobs;
pub mod metering;
pub mod metrics;
pub mod shutdown;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use engine::MeteringEngine;
