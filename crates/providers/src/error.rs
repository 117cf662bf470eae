use std::path::PathBuf;

use routing::{ConfigError, RegistryError};
use thiserror::Error;

/// Errors from loading a provider profile.
///
/// All of these surface at startup; none can occur inside routing.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read profile file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML profile: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid YAML profile: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Unknown profile '{name}' (available: {})", .available.join(", "))]
    UnknownProfile { name: String, available: Vec<String> },

    #[error("Backend '{backend}' needs credential from ${var}, which is not set")]
    MissingCredential { backend: String, var: String },

    #[error("Backend '{backend}' has no {setting} (set it on the backend, the profile, or the environment)")]
    MissingSetting {
        backend: String,
        setting: &'static str,
    },

    #[error("Invalid profile: {0}")]
    Invalid(String),

    #[error("HTTP client error: {0}")]
    Http(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
