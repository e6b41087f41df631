//! Per-endpoint circuit breaker. The only process-wide mutable state in the
//! proxy; everything else is per-request.
//!
//! Backed by [`dashmap::DashMap`] rather than a hand-rolled `RwLock<HashMap<_>>`
//! so that reads and writes on different endpoints never contend with each
//! other.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::{Duration, Instant},
};

use config::CircuitBreakerConfig;
use dashmap::DashMap;

/// Health and circuit-breaker state for a single upstream endpoint.
#[derive(Debug, Clone)]
pub struct EndpointHealth {
    /// The endpoint URL this state tracks.
    pub url: String,
    /// Consecutive failures since the last success.
    pub failure_count: u32,
    /// Total observed successes.
    pub success_count: u64,
    /// Total observed requests (successes + failures).
    pub total_requests: u64,
    /// When the endpoint last failed, if ever.
    pub last_failure: Option<Instant>,
    /// When the endpoint last succeeded, if ever.
    pub last_success: Option<Instant>,
    /// Whether the circuit is currently open (endpoint excluded from selection).
    pub circuit_open: bool,
    /// Earliest time at which the circuit may be retried.
    pub next_retry_time: Option<Instant>,
}

impl EndpointHealth {
    fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            failure_count: 0,
            success_count: 0,
            total_requests: 0,
            last_failure: None,
            last_success: None,
            circuit_open: false,
            next_retry_time: None,
        }
    }

    /// Observed success rate, defaulting to 0.5 for an endpoint with no
    /// recorded requests yet (neither proven good nor bad).
    fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.5
        } else {
            self.success_count as f64 / self.total_requests as f64
        }
    }

    fn is_healthy_at(&self, now: Instant) -> bool {
        if !self.circuit_open {
            return true;
        }
        match self.next_retry_time {
            Some(retry_at) => now >= retry_at,
            None => true,
        }
    }
}

/// Tracks per-endpoint health and round-robin selection cursors across all
/// configured model pools.
#[derive(Debug, Default)]
pub struct HealthManager {
    endpoints: DashMap<String, EndpointHealth>,
    cursors: DashMap<String, AtomicUsize>,
    last_reorder: DashMap<String, Instant>,
}

/// Minimum interval between `reorderBySuccess` passes for a given pool.
const REORDER_INTERVAL: Duration = Duration::from_secs(5 * 60);

impl HealthManager {
    /// Create an empty health manager. Endpoints are registered lazily on
    /// first observation.
    pub fn new() -> Self {
        Self::default()
    }

    /// An unknown endpoint is reported healthy; only endpoints with recorded
    /// failures past the breaker threshold are ever considered unhealthy.
    pub fn is_healthy(&self, url: &str) -> bool {
        match self.endpoints.get(url) {
            Some(state) => state.is_healthy_at(Instant::now()),
            None => true,
        }
    }

    /// Advance the round-robin cursor for `pool_key` and return the first
    /// healthy endpoint starting from it. Falls back to the next endpoint in
    /// sequence (last-resort pick) if none are currently healthy. Never
    /// returns `None` when `urls` is non-empty.
    pub fn select_healthy<'a>(&self, pool_key: &str, urls: &'a [String]) -> Option<&'a str> {
        if urls.is_empty() {
            return None;
        }

        let cursor = self
            .cursors
            .entry(pool_key.to_string())
            .or_insert_with(|| AtomicUsize::new(0));
        let start = cursor.fetch_add(1, Ordering::Relaxed) % urls.len();

        for offset in 0..urls.len() {
            let candidate = &urls[(start + offset) % urls.len()];
            if self.is_healthy(candidate) {
                return Some(candidate);
            }
        }

        // Last resort: nothing is healthy, but we must never return empty.
        Some(&urls[start])
    }

    /// Record a failed call to `url`. Opens the circuit once the failure
    /// count reaches `config.failure_threshold`, with a backoff that grows
    /// linearly in excess failures and saturates at `config.max_backoff`.
    pub fn record_failure(&self, url: &str, config: &CircuitBreakerConfig) {
        let mut state = self.endpoints.entry(url.to_string()).or_insert_with(|| EndpointHealth::new(url));

        let now = Instant::now();
        state.failure_count += 1;
        state.total_requests += 1;
        state.last_failure = Some(now);

        if state.failure_count >= config.failure_threshold {
            state.circuit_open = true;
            let excess = (state.failure_count - config.failure_threshold + 1) as u32;
            let backoff = config.base_backoff.saturating_mul(excess).min(config.max_backoff);
            state.next_retry_time = Some(now + backoff);
        }
    }

    /// Record a successful call to `url`. Closes the circuit and resets the
    /// consecutive-failure count.
    pub fn record_success(&self, url: &str) {
        let mut state = self.endpoints.entry(url.to_string()).or_insert_with(|| EndpointHealth::new(url));

        state.success_count += 1;
        state.total_requests += 1;
        state.last_success = Some(Instant::now());
        state.circuit_open = false;
        state.failure_count = 0;
        state.next_retry_time = None;
    }

    /// A consistent snapshot of a single endpoint's state, or `None` if the
    /// endpoint has never been observed.
    pub fn snapshot(&self, url: &str) -> Option<EndpointHealth> {
        self.endpoints.get(url).map(|entry| entry.clone())
    }

    /// Stable reorder of `urls` in place: healthy endpoints before unhealthy
    /// ones, each group ordered by descending success rate. Rate-limited to
    /// once per [`REORDER_INTERVAL`] per `pool_key`; calls within the window
    /// are no-ops.
    pub fn reorder_by_success(&self, pool_key: &str, urls: &mut [String]) {
        let now = Instant::now();
        let should_run = match self.last_reorder.get(pool_key) {
            Some(last) => now.duration_since(*last) >= REORDER_INTERVAL,
            None => true,
        };
        if !should_run {
            return;
        }
        self.last_reorder.insert(pool_key.to_string(), now);

        urls.sort_by(|a, b| {
            let healthy_a = self.is_healthy(a);
            let healthy_b = self.is_healthy(b);
            match (healthy_a, healthy_b) {
                (true, false) => std::cmp::Ordering::Less,
                (false, true) => std::cmp::Ordering::Greater,
                _ => {
                    let rate_a = self.endpoints.get(a).map(|s| s.success_rate()).unwrap_or(0.5);
                    let rate_b = self.endpoints.get(b).map(|s| s.success_rate()).unwrap_or(0.5);
                    rate_b.partial_cmp(&rate_a).unwrap_or(std::cmp::Ordering::Equal)
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::for_testing()
    }

    #[test]
    fn unknown_endpoint_is_healthy() {
        let manager = HealthManager::new();
        assert!(manager.is_healthy("http://unseen"));
    }

    #[test]
    fn select_healthy_never_returns_none_for_non_empty_list() {
        let manager = HealthManager::new();
        let cfg = test_config();
        let urls = vec!["http://a".to_string(), "http://b".to_string()];

        for url in &urls {
            for _ in 0..cfg.failure_threshold {
                manager.record_failure(url, &cfg);
            }
        }

        // Both endpoints now have open circuits; selection must still return something.
        assert!(manager.select_healthy("pool", &urls).is_some());
    }

    #[test]
    fn threshold_failures_open_circuit_until_retry_time() {
        let manager = HealthManager::new();
        let cfg = test_config();

        for _ in 0..cfg.failure_threshold {
            manager.record_failure("http://a", &cfg);
        }

        assert!(!manager.is_healthy("http://a"), "circuit should be open immediately after threshold failures");

        std::thread::sleep(cfg.max_backoff + Duration::from_millis(50));
        assert!(manager.is_healthy("http://a"), "circuit should close once next-retry-time has elapsed");
    }

    #[test]
    fn success_closes_circuit_and_resets_failure_count() {
        let manager = HealthManager::new();
        let cfg = test_config();

        for _ in 0..cfg.failure_threshold {
            manager.record_failure("http://a", &cfg);
        }
        assert!(!manager.is_healthy("http://a"));

        manager.record_success("http://a");

        assert!(manager.is_healthy("http://a"));
        let snapshot = manager.snapshot("http://a").unwrap();
        assert_eq!(snapshot.failure_count, 0);
        assert!(!snapshot.circuit_open);
    }

    #[test]
    fn circuit_failover_then_recovery() {
        // Scenario 6: endpoints [A, B]; A fails once past threshold=1, subsequent
        // selection picks B; after B succeeds and A's backoff elapses, A is
        // re-eligible.
        let manager = HealthManager::new();
        let cfg = CircuitBreakerConfig {
            failure_threshold: 1,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(200),
        };
        let urls = vec!["http://a".to_string(), "http://b".to_string()];

        manager.record_failure("http://a", &cfg);
        assert!(!manager.is_healthy("http://a"));

        let selected = manager.select_healthy("pool", &urls).unwrap();
        assert_eq!(selected, "http://b");

        manager.record_success("http://b");
        assert!(manager.is_healthy("http://b"));

        std::thread::sleep(cfg.max_backoff + Duration::from_millis(50));
        assert!(manager.is_healthy("http://a"), "A should be re-eligible once its backoff elapses");
    }

    #[test]
    fn reorder_puts_healthy_and_higher_success_rate_first() {
        let manager = HealthManager::new();
        let cfg = test_config();

        manager.record_success("http://good");
        manager.record_success("http://good");
        manager.record_failure("http://bad", &cfg);
        manager.record_failure("http://bad", &cfg);

        let mut urls = vec!["http://bad".to_string(), "http://good".to_string()];
        manager.reorder_by_success("pool", &mut urls);

        assert_eq!(urls[0], "http://good");
    }

    #[test]
    fn reorder_is_rate_limited_per_pool() {
        let manager = HealthManager::new();
        let cfg = test_config();

        manager.record_failure("http://a", &cfg);
        let mut urls = vec!["http://a".to_string(), "http://b".to_string()];

        manager.reorder_by_success("pool", &mut urls);
        let after_first = urls.clone();

        // Flip health right after; a second call within the window must be a no-op.
        manager.record_success("http://a");
        manager.reorder_by_success("pool", &mut urls);

        assert_eq!(urls, after_first);
    }
}
