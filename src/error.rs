use serde::{Deserialize, Serialize};
use std::io;

/// The pipeline stage a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Pull,
    Install,
    Restart,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Pull => "pull",
            Stage::Install => "install",
            Stage::Restart => "restart",
        };
        f.write_str(name)
    }
}

/// Custom error type for simple_push_deploy operations
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: Stage, message: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl DeployError {
    /// Wraps a remote command failure with the stage it happened in.
    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        DeployError::Stage {
            stage,
            message: message.into(),
        }
    }
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;
