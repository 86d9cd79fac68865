//! Matchmaking - FIFO pairing per queue class and kit

pub mod queue;
pub mod service;

pub use queue::{MatchmakingQueue, QueueEntry};
pub use service::{JoinOutcome, QueueError, QueueManager};
