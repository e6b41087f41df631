//! Configuration structures for bridgeproxy.
//!
//! Configuration is a flat `KEY=VALUE` file (comments start with `#`), optionally
//! layered with a YAML overrides file for tool-description and system-message
//! rewriting rules that don't fit comfortably in a flat key space.

#![deny(missing_docs)]

mod error;
mod loader;
mod model;
mod overrides;

use std::path::Path;

pub use error::ConfigError;
pub use model::{CircuitBreakerConfig, HarmonyConfig, ModelEndpointConfig};
pub use overrides::{OverridesConfig, SystemMessageOverrides, TextReplacement};

/// Top-level bridgeproxy configuration.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Endpoint pool and model name for the "big" (source-format-equivalent) model.
    pub big_model: ModelEndpointConfig,
    /// Endpoint pool and model name for the "small" model.
    pub small_model: ModelEndpointConfig,
    /// Endpoint pool and model name used for LLM-assisted tool-call correction.
    pub correction_model: ModelEndpointConfig,

    /// Tool names to drop from every request before forwarding upstream.
    pub skip_tools: Vec<String>,
    /// Log the rewritten system message for each request at info level.
    pub print_system_message: bool,
    /// Log the repaired tool schemas for each request at info level.
    pub print_tool_schemas: bool,
    /// Synthesize a placeholder tool_result when a client sends an empty one.
    pub handle_empty_tool_results: bool,
    /// Synthesize a placeholder user message when a client sends an empty one.
    pub handle_empty_user_messages: bool,

    /// Harmony channel-tagged message parsing settings.
    pub harmony: HarmonyConfig,
    /// Circuit breaker tuning.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Optional YAML-sourced tool-description and system-message overrides.
    pub overrides: OverridesConfig,
}

impl Config {
    /// Load configuration from a flat `KEY=VALUE` file, optionally layering a YAML
    /// overrides file on top.
    pub fn load(path: impl AsRef<Path>, overrides_path: Option<&Path>) -> anyhow::Result<Config> {
        loader::load(path.as_ref(), overrides_path)
    }

    /// Validate that the configuration is usable: every model pool must have at
    /// least one endpoint and an API key.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn loads_minimal_flat_file() {
        let dir = tempdir();
        let path = dir.join("bridgeproxy.env");
        std::fs::write(
            &path,
            indoc! {r#"
                # comment line, ignored
                BIG_MODEL=gpt-4o
                BIG_MODEL_ENDPOINT=http://localhost:8001
                BIG_MODEL_API_KEY=sk-big
                SMALL_MODEL=gpt-4o-mini
                SMALL_MODEL_ENDPOINT=http://localhost:8002
                SMALL_MODEL_API_KEY=sk-small
                CORRECTION_MODEL=gpt-4o-mini
                TOOL_CORRECTION_ENDPOINT=http://localhost:8002
                TOOL_CORRECTION_API_KEY=sk-small
                SKIP_TOOLS=WebSearch,Read
                PRINT_SYSTEM_MESSAGE=true
            "#},
        )
        .unwrap();

        let config = Config::load(&path, None).unwrap();

        assert_eq!(config.big_model.model, "gpt-4o");
        assert_eq!(config.big_model.endpoints, vec!["http://localhost:8001".to_string()]);
        assert_eq!(config.skip_tools, vec!["WebSearch".to_string(), "Read".to_string()]);
        assert!(config.print_system_message);
        assert!(config.handle_empty_tool_results, "defaults to enabled per spec");

        config.validate().unwrap();
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("bridgeproxy-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
