//! Error types for configuration loading

use std::path::PathBuf;
use thiserror::Error;

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading `vflow.yaml`
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A tag got an argument of the wrong shape
    #[error("{tag} expects a string argument")]
    TagArgument { tag: String },

    #[error("include cycle through {path}")]
    IncludeCycle { path: PathBuf },

    #[error("not a directory: {path}")]
    NotADirectory { path: PathBuf },

    #[error("secret '{key}' is not defined in secrets.yaml")]
    MissingSecret { key: String },

    #[error("environment variable '{name}' is not set")]
    MissingEnvVar { name: String },

    /// The expanded document does not fit the settings schema
    #[error("invalid {section} section: {message}")]
    Schema { section: String, message: String },
}
