//! Per-user wager rate limiting
//!
//! Sliding-window estimate from two fixed windows: the previous window's
//! count is weighted by how much of it still overlaps the rolling window.
//! Each tracked user costs one small fixed-size entry.

use dashmap::DashMap;
use shared::UserId;

use crate::config::RateLimitConfig;

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start_ms: i64,
    current: u32,
    previous: u32,
    last_seen_ms: i64,
}

impl WindowState {
    fn new(now_ms: i64) -> Self {
        Self {
            window_start_ms: now_ms,
            current: 0,
            previous: 0,
            last_seen_ms: now_ms,
        }
    }

    fn roll(&mut self, now_ms: i64, window_ms: i64) {
        let elapsed = now_ms - self.window_start_ms;
        if elapsed < window_ms {
            return;
        }
        self.previous = if elapsed < 2 * window_ms { self.current } else { 0 };
        self.current = 0;
        self.window_start_ms = now_ms - elapsed % window_ms;
    }

    fn estimate(&self, now_ms: i64, window_ms: i64) -> f64 {
        let into_window = (now_ms - self.window_start_ms).clamp(0, window_ms);
        let overlap = (window_ms - into_window) as f64 / window_ms as f64;
        self.previous as f64 * overlap + self.current as f64
    }
}

pub struct SlidingWindowLimiter {
    windows: DashMap<UserId, WindowState>,
    max_wagers: u32,
    window_ms: i64,
    max_tracked_keys: usize,
}

impl SlidingWindowLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            max_wagers: config.max_wagers,
            window_ms: config.window_ms.max(1) as i64,
            max_tracked_keys: config.max_tracked_keys.max(1),
        }
    }

    /// Count one wager for `user`. Returns the suggested wait in ms when the
    /// user is over the limit; a refused wager is not counted.
    pub fn try_acquire(&self, user: UserId, now_ms: i64) -> Result<(), u64> {
        if !self.windows.contains_key(&user) && self.windows.len() >= self.max_tracked_keys {
            self.make_room(now_ms);
        }

        let mut state = self
            .windows
            .entry(user)
            .or_insert_with(|| WindowState::new(now_ms));
        state.roll(now_ms, self.window_ms);
        state.last_seen_ms = now_ms;

        if state.estimate(now_ms, self.window_ms) + 1.0 > self.max_wagers as f64 {
            let remaining = self.window_ms - (now_ms - state.window_start_ms);
            return Err(remaining.max(1) as u64);
        }
        state.current += 1;
        Ok(())
    }

    /// Return a slot taken at `acquired_at_ms` by a wager that was never
    /// accepted. A slot whose window has already rolled off is left alone.
    pub fn release(&self, user: UserId, acquired_at_ms: i64) {
        let Some(mut state) = self.windows.get_mut(&user) else {
            return;
        };
        if acquired_at_ms >= state.window_start_ms {
            state.current = state.current.saturating_sub(1);
        } else if acquired_at_ms >= state.window_start_ms - self.window_ms {
            state.previous = state.previous.saturating_sub(1);
        }
    }

    /// Drop users idle for two full windows; their history no longer counts
    pub fn evict_idle(&self, now_ms: i64) -> usize {
        let before = self.windows.len();
        let horizon = 2 * self.window_ms;
        self.windows.retain(|_, s| now_ms - s.last_seen_ms < horizon);
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    fn make_room(&self, now_ms: i64) {
        if self.evict_idle(now_ms) > 0 && self.windows.len() < self.max_tracked_keys {
            return;
        }
        // Still full: evict the least recently seen users down to 90% of the cap
        let target = self.max_tracked_keys - self.max_tracked_keys / 10 - 1;
        let mut by_age: Vec<(UserId, i64)> = self
            .windows
            .iter()
            .map(|e| (*e.key(), e.value().last_seen_ms))
            .collect();
        by_age.sort_by_key(|(_, seen)| *seen);
        let excess = by_age.len().saturating_sub(target);
        for (user, _) in by_age.into_iter().take(excess) {
            self.windows.remove(&user);
        }
        metrics::counter!("rate_limit_evictions_total").increment(excess as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max_wagers: u32, window_ms: u64, max_tracked_keys: usize) -> SlidingWindowLimiter {
        SlidingWindowLimiter::new(&RateLimitConfig {
            max_wagers,
            window_ms,
            max_tracked_keys,
        })
    }

    #[test]
    fn test_limit_within_window() {
        let limiter = limiter(3, 1_000, 100);
        let user = UserId(1);
        assert!(limiter.try_acquire(user, 0).is_ok());
        assert!(limiter.try_acquire(user, 10).is_ok());
        assert!(limiter.try_acquire(user, 20).is_ok());
        assert!(limiter.try_acquire(user, 30).is_err());
        // Other users are independent
        assert!(limiter.try_acquire(UserId(2), 30).is_ok());
    }

    #[test]
    fn test_previous_window_decays() {
        let limiter = limiter(4, 1_000, 100);
        let user = UserId(1);
        for t in 0..4 {
            assert!(limiter.try_acquire(user, t).is_ok());
        }
        // Just after the boundary nearly the whole previous window still counts
        assert!(limiter.try_acquire(user, 1_010).is_err());
        // Three quarters through the next window only a quarter of it counts
        assert!(limiter.try_acquire(user, 1_750).is_ok());
        // Two windows later the history is gone entirely
        for t in 0..4 {
            assert!(limiter.try_acquire(user, 3_500 + t).is_ok());
        }
    }

    #[test]
    fn test_released_slot_is_reusable() {
        let limiter = limiter(2, 1_000, 100);
        let user = UserId(1);
        assert!(limiter.try_acquire(user, 0).is_ok());
        assert!(limiter.try_acquire(user, 10).is_ok());
        assert!(limiter.try_acquire(user, 20).is_err());

        limiter.release(user, 10);
        assert!(limiter.try_acquire(user, 30).is_ok());
        assert!(limiter.try_acquire(user, 40).is_err());

        // Unknown users and stale slots are ignored
        limiter.release(UserId(9), 0);
        limiter.release(user, -5_000);
        assert!(limiter.try_acquire(user, 50).is_err());
    }

    #[test]
    fn test_memory_is_bounded() {
        let limiter = limiter(10, 1_000, 50);
        for id in 0..500 {
            let _ = limiter.try_acquire(UserId(id), id);
        }
        assert!(limiter.tracked_keys() <= 50);
    }

    #[test]
    fn test_idle_users_are_evicted() {
        let limiter = limiter(10, 1_000, 100);
        let _ = limiter.try_acquire(UserId(1), 0);
        let _ = limiter.try_acquire(UserId(2), 1_900);
        assert_eq!(limiter.evict_idle(2_100), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }
}
