//! Rate limiting utilities

use governor::{
    clock::DefaultClock,
    state::keyed::DefaultKeyedStateStore,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::num::NonZeroU32;
use std::sync::Arc;
use uuid::Uuid;

/// Rate limiter type alias
pub type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Per-player limiter keyed by player id
pub type KeyedLimiter = RateLimiter<Uuid, DefaultKeyedStateStore<Uuid>, DefaultClock>;

/// Create a rate limiter with the specified requests per second
pub fn create_limiter(requests_per_second: u32) -> Arc<Limiter> {
    Arc::new(RateLimiter::direct(quota(requests_per_second)))
}

fn quota(requests_per_second: u32) -> Quota {
    Quota::per_second(NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN))
}

/// Queue join rate limit per player
pub const QUEUE_JOIN_RATE_LIMIT: u32 = 2; // Max 2 join attempts per second

/// Global admin API rate limit
pub const ADMIN_RATE_LIMIT: u32 = 20;

/// Per-player queue join limiter
#[derive(Clone)]
pub struct JoinRateLimiter {
    limiter: Arc<KeyedLimiter>,
}

impl JoinRateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::keyed(quota(requests_per_second))),
        }
    }

    /// Check if a join attempt is allowed (returns true if allowed)
    pub fn check(&self, player: Uuid) -> bool {
        self.limiter.check_key(&player).is_ok()
    }

    /// Forget players whose buckets have fully refilled
    pub fn prune(&self) {
        self.limiter.retain_recent();
    }
}

impl Default for JoinRateLimiter {
    fn default() -> Self {
        Self::new(QUEUE_JOIN_RATE_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_limiter_is_per_player() {
        let limiter = JoinRateLimiter::new(1);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        assert!(limiter.check(a));
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }

    #[test]
    fn zero_rate_falls_back_to_one() {
        let limiter = create_limiter(0);
        assert!(limiter.check().is_ok());
        assert!(limiter.check().is_err());
    }
}
