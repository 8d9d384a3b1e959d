// crates/analysis/src/rate_limiter.rs
use chrono::{DateTime, Utc};
use common::config::CacheConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Seconds after the last request before the hourly counter resets.
const HOURLY_WINDOW_SECS: i64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateWindow {
    Daily,
    Hourly,
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateWindow::Daily => write!(f, "daily"),
            RateWindow::Hourly => write!(f, "hourly"),
        }
    }
}

/// Usage counters, persisted next to the cached analysis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub daily_count: u32,
    pub hourly_count: u32,
    pub last_request_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited(RateWindow),
}

/// Daily and hourly call budgets over a [`RateLimitState`].
///
/// The daily counter resets when the calendar day (UTC) of the last request
/// differs from now. The hourly counter resets once an hour has passed since
/// the last request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiter {
    daily_limit: u32,
    hourly_limit: u32,
}

impl RateLimiter {
    pub fn new(daily_limit: u32, hourly_limit: u32) -> Self {
        Self {
            daily_limit,
            hourly_limit,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.daily_limit, config.hourly_limit)
    }

    /// Counters as they stand at `now` once expired windows are reset.
    pub fn refreshed(&self, state: &RateLimitState, now: DateTime<Utc>) -> RateLimitState {
        let mut state = state.clone();
        if let Some(last) = state.last_request_time {
            if last.date_naive() != now.date_naive() {
                state.daily_count = 0;
            }
            if (now - last).num_seconds() >= HOURLY_WINDOW_SECS {
                state.hourly_count = 0;
            }
        }
        state
    }

    pub fn check(&self, state: &RateLimitState, now: DateTime<Utc>) -> RateDecision {
        let state = self.refreshed(state, now);
        if state.daily_count >= self.daily_limit {
            RateDecision::Limited(RateWindow::Daily)
        } else if state.hourly_count >= self.hourly_limit {
            RateDecision::Limited(RateWindow::Hourly)
        } else {
            RateDecision::Allowed
        }
    }

    /// Record one request at `now`.
    pub fn increment(&self, state: &mut RateLimitState, now: DateTime<Utc>) {
        let mut next = self.refreshed(state, now);
        next.daily_count += 1;
        next.hourly_count += 1;
        next.last_request_time = Some(now);
        *state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_hourly_budget() {
        let limiter = RateLimiter::new(10, 2);
        let mut state = RateLimitState::default();

        assert_eq!(limiter.check(&state, at(9, 0)), RateDecision::Allowed);
        limiter.increment(&mut state, at(9, 0));
        limiter.increment(&mut state, at(9, 10));
        assert_eq!(limiter.check(&state, at(9, 20)), RateDecision::Limited(RateWindow::Hourly));

        // an hour after the last request
        assert_eq!(limiter.check(&state, at(10, 10)), RateDecision::Allowed);
        limiter.increment(&mut state, at(10, 10));
        assert_eq!(state.hourly_count, 1);
        assert_eq!(state.daily_count, 3);
    }

    #[test]
    fn test_daily_budget_resets_at_midnight() {
        let limiter = RateLimiter::new(10, 2);
        let mut state = RateLimitState::default();
        let start = at(0, 0);
        for i in 0..10 {
            let now = start + Duration::minutes(61 * i);
            assert_eq!(limiter.check(&state, now), RateDecision::Allowed, "call {}", i);
            limiter.increment(&mut state, now);
        }
        let eleventh = start + Duration::minutes(610);
        assert_eq!(limiter.check(&state, eleventh), RateDecision::Limited(RateWindow::Daily));

        let next_day = Utc.with_ymd_and_hms(2025, 5, 2, 0, 5, 0).unwrap();
        assert_eq!(limiter.check(&state, next_day), RateDecision::Allowed);
        limiter.increment(&mut state, next_day);
        assert_eq!(state.daily_count, 1);
    }

    #[test]
    fn test_window_display() {
        assert_eq!(RateWindow::Daily.to_string(), "daily");
        assert_eq!(serde_json::to_string(&RateWindow::Hourly).unwrap(), "\"hourly\"");
    }
}
