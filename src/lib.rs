//! Deferred and recurring prompt scheduling.
//!
//! Jobs are persisted in a JSON file and armed as tokio timers: cron
//! expressions (6 fields, seconds first), fixed intervals, or one-shot
//! instants. Due jobs are delivered to the agent through the [`bus`].

pub mod bus;
pub mod config;
pub mod cron;
