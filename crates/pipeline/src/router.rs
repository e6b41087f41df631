//! Model Router: maps a logical source-model name to one of the two
//! configured provider profiles.
//!
//! The proxy only ever forwards to two pools, "big" and "small", following
//! the convention the original Claude-Code-style bridges use: a cheap model
//! name (anything mentioning "haiku") routes to the small pool, everything
//! else routes to the big one. Endpoint selection *within* the chosen pool
//! is the Health Manager's job (`health.rs`), not this module's.

use config::{Config, ModelEndpointConfig};

/// The resolved provider profile for a single request: which endpoint pool
/// to call and which model name to put on the wire.
#[derive(Debug, Clone)]
pub struct ResolvedModel<'a> {
    /// Candidate endpoint URLs for this pool, in configuration order.
    pub endpoints: &'a [String],
    /// Bearer credential for this pool.
    pub api_key: &'a secrecy::SecretString,
    /// The model name to send upstream, replacing whatever the client asked for.
    pub target_model: &'a str,
    /// A stable key identifying this pool, used for health-manager cursors.
    pub pool_key: &'static str,
}

/// Resolve `requested_model` (the client's `model` field) to a provider
/// profile. Any name that doesn't look like a small/cheap model request
/// passes through to the big pool unchanged — there is no failure mode here,
/// every input resolves to one of the two profiles.
pub fn route<'a>(config: &'a Config, requested_model: &str) -> ResolvedModel<'a> {
    if is_small_model(requested_model) {
        profile(&config.small_model, "small")
    } else {
        profile(&config.big_model, "big")
    }
}

fn is_small_model(requested_model: &str) -> bool {
    requested_model.to_ascii_lowercase().contains("haiku")
}

fn profile<'a>(endpoint: &'a ModelEndpointConfig, pool_key: &'static str) -> ResolvedModel<'a> {
    ResolvedModel {
        endpoints: &endpoint.endpoints,
        api_key: &endpoint.api_key,
        target_model: &endpoint.model,
        pool_key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn test_config() -> Config {
        Config {
            big_model: ModelEndpointConfig {
                model: "gpt-4o".to_string(),
                endpoints: vec!["http://big".to_string()],
                api_key: SecretString::from("big-key".to_string()),
            },
            small_model: ModelEndpointConfig {
                model: "gpt-4o-mini".to_string(),
                endpoints: vec!["http://small".to_string()],
                api_key: SecretString::from("small-key".to_string()),
            },
            ..Default::default()
        }
    }

    #[test]
    fn haiku_routes_to_small_pool() {
        let config = test_config();
        let resolved = route(&config, "claude-3-5-haiku-20241022");
        assert_eq!(resolved.target_model, "gpt-4o-mini");
        assert_eq!(resolved.pool_key, "small");
    }

    #[test]
    fn sonnet_routes_to_big_pool() {
        let config = test_config();
        let resolved = route(&config, "claude-sonnet-4-5-20250929");
        assert_eq!(resolved.target_model, "gpt-4o");
        assert_eq!(resolved.pool_key, "big");
    }

    #[test]
    fn unknown_model_name_passes_through_to_big_pool() {
        let config = test_config();
        let resolved = route(&config, "some-model-nobody-heard-of");
        assert_eq!(resolved.target_model, "gpt-4o");
    }
}
