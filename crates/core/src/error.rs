use thiserror::Error;

/// Errors raised while reading the `model_cfg` mapping.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing config key: {key}")]
    MissingKey { key: String },

    #[error("config key {key} has the wrong type: expected {expected}")]
    InvalidType { key: String, expected: &'static str },

    #[error("config key {key} is invalid: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn missing(key: &str) -> Self {
        Self::MissingKey {
            key: key.to_string(),
        }
    }

    pub(crate) fn invalid_type(key: &str, expected: &'static str) -> Self {
        Self::InvalidType {
            key: key.to_string(),
            expected,
        }
    }

    pub(crate) fn invalid_value(key: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Top-level error for building a block from an untyped configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
