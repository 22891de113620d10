//! Cron engine and expression handling.

pub mod engine;
pub mod schedule;

pub use engine::{CronEngine, CronHandle, CronJob, EngineEntry};
pub use schedule::{next_fire, parse_schedule};
