use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

/// Endpoint pool and credentials for one logical model slot (big/small/correction).
#[derive(Debug, Clone, Default)]
pub struct ModelEndpointConfig {
    /// The model name sent in the upstream request body.
    pub model: String,
    /// One or more upstream base URLs, tried in round-robin order with failover.
    pub endpoints: Vec<String>,
    /// Bearer token sent as `Authorization: Bearer <api_key>`.
    pub api_key: SecretString,
}

impl PartialEq for ModelEndpointConfig {
    fn eq(&self, other: &Self) -> bool {
        self.model == other.model && self.endpoints == other.endpoints
    }
}

/// Harmony channel-tagged message parsing settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HarmonyConfig {
    /// Whether the channel parser runs at all. When false, assistant text is
    /// forwarded to the backward translator unchanged.
    pub parsing_enabled: bool,
    /// Log every parsed channel segment at debug level.
    pub debug: bool,
    /// Reject (rather than best-effort passthrough) content that doesn't match
    /// the harmony delimiter grammar at all.
    pub strict_mode: bool,
}

impl Default for HarmonyConfig {
    fn default() -> Self {
        Self {
            parsing_enabled: true,
            debug: false,
            strict_mode: false,
        }
    }
}

/// Circuit breaker tuning for the endpoint health manager.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (without an intervening success) before an endpoint opens.
    pub failure_threshold: u32,
    /// Initial backoff duration once the circuit opens.
    pub base_backoff: Duration,
    /// Ceiling on the exponentially growing backoff.
    pub max_backoff: Duration,
}

impl Default for CircuitBreakerConfig {
    /// Production defaults: threshold 2, 30s base backoff, 5 minute cap.
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(300),
        }
    }
}

impl CircuitBreakerConfig {
    /// Tight values for tests: threshold 1, 100ms base backoff, 1s cap.
    pub fn for_testing() -> Self {
        Self {
            failure_threshold: 1,
            base_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }
}
