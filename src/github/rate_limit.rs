//! Shared rate-limit budget tracker.
//!
//! One `RateLimiter` instance is shared by every request path in a process.
//! It mirrors the quota window reported by `X-RateLimit-*` response headers
//! and gates outgoing requests before they are sent, holding back a reserve
//! fraction of the quota so other API consumers on the same token are never
//! starved.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use utoipa::ToSchema;

/// Decision returned by [`RateLimiter::check_budget`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    /// Quota available, proceed immediately.
    Ready,
    /// Quota exhausted or inside the reserve; wait this long before retrying.
    Wait(Duration),
}

/// Point-in-time view of the tracked quota window.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RateLimitSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

struct State {
    limit: u32,
    remaining: u32,
    reset_at: DateTime<Utc>,
    last_updated: DateTime<Utc>,
}

/// Thread-safe budget tracker shared across concurrent workers.
pub struct RateLimiter {
    state: Mutex<State>,
    reserve_pct: f64,
}

impl RateLimiter {
    /// `reserve_pct` is the fraction of the quota to hold back, e.g. 0.02
    /// keeps 100 requests of a 5000 window in reserve.
    pub fn new(reserve_pct: f64) -> Self {
        // Optimistic defaults until the first response reports real headers.
        let epoch = Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now);
        Self {
            state: Mutex::new(State {
                limit: 5000,
                remaining: 5000,
                reset_at: epoch,
                last_updated: Utc::now(),
            }),
            reserve_pct: reserve_pct.clamp(0.0, 0.5),
        }
    }

    /// Gate an outgoing request against the tracked budget.
    ///
    /// Returns `Wait` when the remaining quota has dropped to the reserve
    /// threshold and the window has not reset yet. Once the reset time has
    /// passed the limiter optimistically admits requests again; the next
    /// response refreshes the window from headers.
    pub fn check_budget(&self) -> Budget {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let threshold = self.reserve_threshold(state.limit);
        if state.remaining > threshold {
            return Budget::Ready;
        }
        let now = Utc::now();
        if now >= state.reset_at {
            return Budget::Ready;
        }
        let wait = (state.reset_at - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
            .saturating_add(Duration::from_secs(1));
        Budget::Wait(wait)
    }

    /// Record the quota window reported by a response.
    ///
    /// Out-of-order responses are tolerated: a report for an older window
    /// (earlier reset) never rolls the tracked window backwards.
    pub fn record(&self, limit: u32, remaining: u32, reset_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if reset_at < state.reset_at && remaining > state.remaining {
            return;
        }
        state.limit = limit;
        state.remaining = remaining;
        state.reset_at = reset_at;
        state.last_updated = Utc::now();
    }

    /// Force the budget to exhausted until `reset_at`. Used when a throttle
    /// response arrives without usable quota headers.
    pub fn exhaust_until(&self, reset_at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.remaining = 0;
        if reset_at > state.reset_at {
            state.reset_at = reset_at;
        }
        state.last_updated = Utc::now();
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        RateLimitSnapshot {
            limit: state.limit,
            remaining: state.remaining,
            reset_at: state.reset_at,
            last_updated: state.last_updated,
        }
    }

    fn reserve_threshold(&self, limit: u32) -> u32 {
        ((f64::from(limit) * self.reserve_pct) as u32).max(1)
    }
}
