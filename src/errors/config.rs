// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::path::PathBuf;

use thiserror::Error;

use crate::errors::CircuitError;

/// Errors raised while loading runtime configuration or circuit descriptions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// Only `.yaml`, `.yml` and `.toml` files are understood
    #[error("Unsupported config format for '{}'", .0.display())]
    UnsupportedFormat(PathBuf),

    /// A value is out of range or inconsistent with another
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// Every problem found in a circuit description
    #[error("Circuit description validation failed:\n{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Validation(Vec<CircuitError>),

    #[error(transparent)]
    Circuit(#[from] CircuitError),
}
