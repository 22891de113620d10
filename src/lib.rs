//! Ops Scheduler: dynamic job scheduling with external status reconciliation.

pub mod config;
pub mod cron;
pub mod error;
pub mod executor;
pub mod jobs;
pub mod notify;
pub mod reconciler;
pub mod scheduler;
pub mod store;
