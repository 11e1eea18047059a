use std::time::Duration;

/// True once more than `ttl` has passed since `last_seen`. Capture clocks
/// that step backwards never expire anything.
pub fn is_expired(now: Duration, last_seen: Duration, ttl: Duration) -> bool {
    now.saturating_sub(last_seen) > ttl
}

/// True when `now` falls less than `window` after `then`.
pub fn within(now: Duration, then: Duration, window: Duration) -> bool {
    now.saturating_sub(then) < window
}
