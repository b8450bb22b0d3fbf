pub mod error;
pub mod event;
pub mod handlers;
pub mod pipeline;
pub mod remote;
pub mod run;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::error::{DeployError, Result};
use crate::event::EventBus;
use crate::run::RunStore;

/// Top-level configuration, loaded from TOML once at startup.
#[derive(Debug, Deserialize, Clone)]
pub struct DeployConfig {
    pub target: RemoteTarget,
    #[serde(default)]
    pub commands: DeployCommands,
}

/// Where deployment commands run: the (host, path, branch) triple.
#[derive(Debug, Deserialize, Clone)]
pub struct RemoteTarget {
    pub host: String,
    pub repo_dir: String,
    pub branch: String,
}

impl RemoteTarget {
    /// Full git ref of the tracked branch, as it appears in push payloads.
    pub fn branch_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }
}

/// Commands run on the target after a pull, in order: install, then restart.
#[derive(Debug, Deserialize, Clone)]
pub struct DeployCommands {
    #[serde(default = "default_install_command")]
    pub install: Vec<String>,
    #[serde(default = "default_restart_command")]
    pub restart: Vec<String>,
}

fn default_install_command() -> Vec<String> {
    vec!["npm".to_string(), "install".to_string()]
}

fn default_restart_command() -> Vec<String> {
    vec!["pm2".to_string(), "restart".to_string(), "app".to_string()]
}

impl Default for DeployCommands {
    fn default() -> Self {
        Self {
            install: default_install_command(),
            restart: default_restart_command(),
        }
    }
}

impl DeployConfig {
    /// Validate once at startup; the stages assume these invariants hold.
    pub fn validate(&self) -> Result<()> {
        if self.target.host.trim().is_empty() {
            return Err(DeployError::ConfigError(
                "target.host must not be empty".to_string(),
            ));
        }
        if !self.target.repo_dir.starts_with('/') {
            return Err(DeployError::ConfigError(format!(
                "target.repo_dir must be an absolute path, got '{}'",
                self.target.repo_dir
            )));
        }
        if self.target.branch.trim().is_empty() {
            return Err(DeployError::ConfigError(
                "target.branch must not be empty".to_string(),
            ));
        }
        if self.commands.install.is_empty() {
            return Err(DeployError::ConfigError(
                "commands.install must not be empty".to_string(),
            ));
        }
        if self.commands.restart.is_empty() {
            return Err(DeployError::ConfigError(
                "commands.restart must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct AppState {
    pub run_store: Mutex<RunStore>,
    pub bus: EventBus,
    pub config: DeployConfig,
    pub start_time: Instant,
    pub started_at: DateTime<Utc>,
}

pub type SharedState = Arc<AppState>;
