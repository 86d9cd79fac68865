//! Shared helpers

pub mod rate_limit;
pub mod task;
pub mod time;
