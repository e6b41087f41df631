use std::collections::HashMap;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;
use crate::model::ModelEndpointConfig;
use crate::overrides::OverridesConfig;
use crate::Config;

/// Parses the flat config file and, if given, the YAML overrides file.
pub(crate) fn load(path: &Path, overrides_path: Option<&Path>) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;

    let entries = parse_flat_file(&content);

    let mut config = Config {
        big_model: read_model_slot(&entries, "BIG_MODEL", "BIG_MODEL")?,
        small_model: read_model_slot(&entries, "SMALL_MODEL", "SMALL_MODEL")?,
        // The model-name key is CORRECTION_MODEL, but its endpoint/API key
        // keys are TOOL_CORRECTION_ENDPOINT / TOOL_CORRECTION_API_KEY.
        correction_model: read_model_slot(&entries, "CORRECTION_MODEL", "TOOL_CORRECTION")?,
        skip_tools: read_list(&entries, "SKIP_TOOLS"),
        print_system_message: read_bool(&entries, "PRINT_SYSTEM_MESSAGE", false),
        print_tool_schemas: read_bool(&entries, "PRINT_TOOL_SCHEMAS", false),
        handle_empty_tool_results: read_bool(&entries, "HANDLE_EMPTY_TOOL_RESULTS", true),
        handle_empty_user_messages: read_bool(&entries, "HANDLE_EMPTY_USER_MESSAGES", true),
        ..Config::default()
    };

    config.harmony.parsing_enabled = read_bool(&entries, "HARMONY_PARSING_ENABLED", config.harmony.parsing_enabled);
    config.harmony.debug = read_bool(&entries, "HARMONY_DEBUG", config.harmony.debug);
    config.harmony.strict_mode = read_bool(&entries, "HARMONY_STRICT_MODE", config.harmony.strict_mode);

    if let Some(threshold) = entries.get("CIRCUIT_BREAKER_FAILURE_THRESHOLD") {
        config.circuit_breaker.failure_threshold = parse_value(threshold, "CIRCUIT_BREAKER_FAILURE_THRESHOLD")?;
    }
    if let Some(secs) = entries.get("CIRCUIT_BREAKER_BASE_BACKOFF_SECS") {
        config.circuit_breaker.base_backoff = std::time::Duration::from_secs(parse_value::<u64>(
            secs,
            "CIRCUIT_BREAKER_BASE_BACKOFF_SECS",
        )?);
    }
    if let Some(secs) = entries.get("CIRCUIT_BREAKER_MAX_BACKOFF_SECS") {
        config.circuit_breaker.max_backoff =
            std::time::Duration::from_secs(parse_value::<u64>(secs, "CIRCUIT_BREAKER_MAX_BACKOFF_SECS")?);
    }

    if let Some(overrides_path) = overrides_path {
        let contents = std::fs::read_to_string(overrides_path).map_err(|source| ConfigError::Read {
            path: overrides_path.display().to_string(),
            source,
        })?;

        config.overrides = OverridesConfig::from_yaml(&contents).map_err(|source| ConfigError::Overrides {
            path: overrides_path.display().to_string(),
            source,
        })?;
    }

    Ok(config)
}

/// Confirms every model slot has at least one endpoint and a non-empty API key.
pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    for (name, slot) in [
        ("BIG_MODEL", &config.big_model),
        ("SMALL_MODEL", &config.small_model),
        ("CORRECTION_MODEL", &config.correction_model),
    ] {
        if slot.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints(name).into());
        }
        if slot.api_key.expose_secret().is_empty() {
            return Err(ConfigError::NoApiKey(name).into());
        }
    }

    Ok(())
}

fn parse_flat_file(content: &str) -> HashMap<String, String> {
    let mut entries = HashMap::new();

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };

        entries.insert(key.trim().to_string(), value.trim().to_string());
    }

    entries
}

/// Reads one model slot. `model_key` names the flat key carrying the model
/// name (e.g. `CORRECTION_MODEL`); `endpoint_prefix` names the prefix for
/// that slot's `_ENDPOINT` / `_API_KEY` keys, which for the correction slot
/// differs from its model-name key (`TOOL_CORRECTION_*`, not
/// `CORRECTION_MODEL_*`).
fn read_model_slot(
    entries: &HashMap<String, String>,
    model_key: &'static str,
    endpoint_prefix: &'static str,
) -> Result<ModelEndpointConfig, ConfigError> {
    let model = entries.get(model_key).cloned().ok_or(ConfigError::MissingKey(model_key))?;

    let endpoint_key = format!("{endpoint_prefix}_ENDPOINT");
    let endpoints = entries
        .get(&endpoint_key)
        .map(|raw| split_list(raw))
        .unwrap_or_default();

    let api_key_key = format!("{endpoint_prefix}_API_KEY");
    let api_key = entries.get(&api_key_key).cloned().unwrap_or_default();

    Ok(ModelEndpointConfig {
        model,
        endpoints,
        api_key: SecretString::from(api_key),
    })
}

fn read_list(entries: &HashMap<String, String>, key: &str) -> Vec<String> {
    entries.get(key).map(|raw| split_list(raw)).unwrap_or_default()
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn read_bool(entries: &HashMap<String, String>, key: &str, default: bool) -> bool {
    match entries.get(key).map(String::as_str) {
        Some("true") | Some("1") | Some("yes") => true,
        Some("false") | Some("0") | Some("no") => false,
        _ => default,
    }
}

fn parse_value<T: std::str::FromStr>(raw: &str, key: &'static str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{raw}'"),
    })
}
