//! Duel Arena - arena leasing, match lifecycle and matchmaking for a 1v1
//! duel server
//!
//! - [`arena`]: arena definitions, lease accounting, terrain snapshot and restore
//! - [`game`]: kits and the match state machine
//! - [`matchmaking`]: FIFO pairing per queue class and kit
//! - [`world`]: collaborator traits for blocks, players and match listeners
//! - [`http`]: admin and player HTTP API

pub mod app;
pub mod arena;
pub mod config;
pub mod game;
pub mod http;
pub mod matchmaking;
pub mod util;
pub mod world;

pub use app::AppState;
pub use arena::{ArenaPool, PoolSettings, RestoreSettings};
pub use config::Config;
pub use game::{Kit, KitRegistry, MatchRegistry, MatchSettings, QueueClass};
pub use matchmaking::{JoinOutcome, QueueManager};
