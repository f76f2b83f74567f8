use thiserror::Error;

/// Represents all possible errors that can occur when loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Wraps errors from the `config` crate when loading or merging sources.
    #[error("failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// A required environment variable was absent. Fatal to the process —
    /// there is no sensible default for exchange credentials.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Occurs when configuration values fail validation.
    #[error("configuration validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Creates a new validation error with a formatted message.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }
}
