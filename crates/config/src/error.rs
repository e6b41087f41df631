use thiserror::Error;

/// Configuration load/validation failures. Always fatal at startup: the
/// process exits non-zero rather than serving with a broken config.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A required key was missing from the flat config file.
    #[error("missing required configuration key: {0}")]
    MissingKey(&'static str),

    /// A key's value could not be parsed as the expected type.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// The optional YAML overrides file failed to parse.
    #[error("failed to parse overrides file {path}: {source}")]
    Overrides {
        /// Path to the overrides file.
        path: String,
        /// Underlying parse error.
        #[source]
        source: serde_yaml::Error,
    },

    /// Validation found a model pool with no endpoints.
    #[error("model slot '{0}' has no configured endpoints")]
    NoEndpoints(&'static str),

    /// Validation found a model pool with a missing or empty API key.
    #[error("model slot '{0}' has no configured API key")]
    NoApiKey(&'static str),
}
