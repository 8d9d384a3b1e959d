// crates/analysis/src/cache.rs
use crate::rate_limiter::{RateDecision, RateLimitState, RateLimiter, RateWindow};
use chrono::{DateTime, Duration, Utc};
use common::config::CacheConfig;
use common::Result;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key of the single "latest analysis" entry.
pub const LATEST_KEY: &str = "latest";

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub analysis_text: String,
    pub generated_at: DateTime<Utc>,
    pub status: String,
}

/// Persistence seam for cached analyses and the rate-limit counters.
pub trait AnalysisStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    fn set(&self, key: &str, entry: CacheEntry) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn rate_state(&self) -> Result<RateLimitState>;
    fn save_rate_state(&self, state: &RateLimitState) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, CacheEntry>>,
    rate: Mutex<RateLimitState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AnalysisStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.entries.lock().insert(key.to_string(), entry);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn rate_state(&self) -> Result<RateLimitState> {
        Ok(self.rate.lock().clone())
    }

    fn save_rate_state(&self, state: &RateLimitState) -> Result<()> {
        *self.rate.lock() = state.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AnalysisStatus {
    Cached,
    Generated,
    RateLimited { window: RateWindow },
    GenerationFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnalysis {
    /// `None` unless the status is `Cached` or `Generated`.
    pub text: Option<String>,
    #[serde(flatten)]
    pub status: AnalysisStatus,
}

/// Time-boxed cache in front of an expensive text generator, with daily and
/// hourly generation budgets.
pub struct AnalysisCache {
    store: Arc<dyn AnalysisStore>,
    clock: Arc<dyn Clock>,
    limiter: RateLimiter,
    ttl: Duration,
    // one generation at a time per cache
    write_lock: Mutex<()>,
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn AnalysisStore>, clock: Arc<dyn Clock>, config: &CacheConfig) -> Self {
        Self {
            store,
            clock,
            limiter: RateLimiter::from_config(config),
            ttl: Duration::hours(config.ttl_hours),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory(config: &CacheConfig) -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Arc::new(SystemClock), config)
    }

    /// Cached text while it is younger than the TTL; otherwise run
    /// `generator` if the budgets allow.
    ///
    /// Only a successful generation replaces the cache entry and counts
    /// against the budgets. Store failures propagate.
    pub fn get_or_generate<F>(&self, generator: F) -> Result<CachedAnalysis>
    where
        F: FnOnce() -> Result<String>,
    {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();

        if let Some(entry) = self.fresh_entry(now)? {
            metrics::counter!("analysis_cache_hits_total").increment(1);
            debug!("Analysis cache hit, generated at {}", entry.generated_at);
            return Ok(CachedAnalysis {
                text: Some(entry.analysis_text),
                status: AnalysisStatus::Cached,
            });
        }

        let state = self.store.rate_state()?;
        if let RateDecision::Limited(window) = self.limiter.check(&state, now) {
            metrics::counter!("analysis_rate_limited_total", "window" => window.to_string()).increment(1);
            warn!("Analysis generation refused: {} limit reached", window);
            return Ok(CachedAnalysis {
                text: None,
                status: AnalysisStatus::RateLimited { window },
            });
        }

        match generator() {
            Ok(text) => {
                self.store.set(
                    LATEST_KEY,
                    CacheEntry {
                        analysis_text: text.clone(),
                        generated_at: now,
                        status: "success".to_string(),
                    },
                )?;
                let mut state = state;
                self.limiter.increment(&mut state, now);
                self.store.save_rate_state(&state)?;

                metrics::counter!("analysis_generations_total").increment(1);
                info!(
                    "✅ Analysis generated ({} chars), {} today, {} this hour",
                    text.len(),
                    state.daily_count,
                    state.hourly_count
                );
                Ok(CachedAnalysis {
                    text: Some(text),
                    status: AnalysisStatus::Generated,
                })
            }
            Err(e) => {
                metrics::counter!("analysis_generation_failures_total").increment(1);
                warn!("Analysis generation failed (retryable: {}): {}", e.is_retryable(), e);
                Ok(CachedAnalysis {
                    text: None,
                    status: AnalysisStatus::GenerationFailed { reason: e.to_string() },
                })
            }
        }
    }

    fn fresh_entry(&self, now: DateTime<Utc>) -> Result<Option<CacheEntry>> {
        Ok(self
            .store
            .get(LATEST_KEY)?
            .filter(|entry| now - entry.generated_at < self.ttl))
    }

    /// Drop the cached entry so the next request regenerates.
    pub fn invalidate(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.store.remove(LATEST_KEY)
    }

    /// Current counters with expired windows reset.
    pub fn usage(&self) -> Result<RateLimitState> {
        let state = self.store.rate_state()?;
        Ok(self.limiter.refreshed(&state, self.clock.now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::Error;
    use std::cell::Cell;

    fn setup() -> (AnalysisCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()));
        let cache = AnalysisCache::new(Arc::new(InMemoryStore::new()), clock.clone(), &CacheConfig::default());
        (cache, clock)
    }

    #[test]
    fn test_cached_within_ttl() {
        let (cache, clock) = setup();
        let calls = Cell::new(0);
        let generate = || {
            calls.set(calls.get() + 1);
            Ok("market is calm".to_string())
        };

        let first = cache.get_or_generate(generate).unwrap();
        assert_eq!(first.status, AnalysisStatus::Generated);

        clock.advance(Duration::hours(23));
        let second = cache.get_or_generate(generate).unwrap();
        assert_eq!(second.status, AnalysisStatus::Cached);
        assert_eq!(second.text, first.text);
        assert_eq!(calls.get(), 1);

        // expired after 24h
        clock.advance(Duration::hours(1));
        let third = cache.get_or_generate(generate).unwrap();
        assert_eq!(third.status, AnalysisStatus::Generated);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_daily_limit_with_invalidation() {
        let (cache, clock) = setup();
        let calls = Cell::new(0);
        let generate = || {
            calls.set(calls.get() + 1);
            Ok(format!("analysis {}", calls.get()))
        };

        for i in 0..10 {
            let result = cache.get_or_generate(generate).unwrap();
            assert_eq!(result.status, AnalysisStatus::Generated, "call {}", i);
            cache.invalidate().unwrap();
            clock.advance(Duration::minutes(61));
        }

        let eleventh = cache.get_or_generate(generate).unwrap();
        assert_eq!(eleventh.status, AnalysisStatus::RateLimited { window: RateWindow::Daily });
        assert_eq!(eleventh.text, None);
        assert_eq!(calls.get(), 10);
        assert_eq!(cache.usage().unwrap().daily_count, 10);
    }

    #[test]
    fn test_hourly_limit() {
        let (cache, clock) = setup();
        for _ in 0..2 {
            cache.get_or_generate(|| Ok("x".to_string())).unwrap();
            cache.invalidate().unwrap();
            clock.advance(Duration::minutes(5));
        }
        let limited = cache.get_or_generate(|| Ok("x".to_string())).unwrap();
        assert_eq!(limited.status, AnalysisStatus::RateLimited { window: RateWindow::Hourly });
    }

    #[test]
    fn test_failure_advances_nothing() {
        let (cache, _clock) = setup();
        let failed = cache
            .get_or_generate(|| Err(Error::Generator("upstream timeout".into())))
            .unwrap();
        assert!(matches!(failed.status, AnalysisStatus::GenerationFailed { .. }));
        assert_eq!(failed.text, None);
        assert_eq!(cache.usage().unwrap(), RateLimitState::default());

        let next = cache.get_or_generate(|| Ok("recovered".to_string())).unwrap();
        assert_eq!(next.status, AnalysisStatus::Generated);
    }

    #[test]
    fn test_status_serialization() {
        let limited = CachedAnalysis {
            text: None,
            status: AnalysisStatus::RateLimited { window: RateWindow::Daily },
        };
        let json = serde_json::to_value(&limited).unwrap();
        assert_eq!(json["status"], "rate_limited");
        assert_eq!(json["window"], "daily");
    }
}
