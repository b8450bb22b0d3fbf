use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use crate::error::Stage;

/// Maximum size for captured pull output before truncation (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Where a deployment run currently is in the flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RunStatus {
    Received,
    Pulling,
    Pulled,
    Deploying,
    Deployed,
    Failed { stage: Stage, reason: String },
}

impl RunStatus {
    /// A run in a terminal state will never advance again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Deployed | RunStatus::Failed { .. })
    }
}

/// One traversal of the deployment flow: from webhook receipt to either
/// terminal success or a halting failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRun {
    pub id: String,
    pub commit: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub pull_output: Option<String>,
    pub output_truncated: bool,
    pub error: Option<String>,
}

impl DeployRun {
    /// Create a new run in Received status
    pub fn new(commit: String) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            commit,
            status: RunStatus::Received,
            started_at: Utc::now(),
            completed_at: None,
            pull_output: None,
            output_truncated: false,
            error: None,
        }
    }

    /// Record the captured pull output (truncates if too large)
    pub fn mark_pulled(&mut self, mut output: String) {
        self.status = RunStatus::Pulled;

        if output.len() > MAX_OUTPUT_SIZE {
            output.truncate(MAX_OUTPUT_SIZE);
            output.push_str("\n... (output truncated)");
            self.output_truncated = true;
        }

        self.pull_output = Some(output);
    }

    /// Mark run as fully deployed
    pub fn mark_deployed(&mut self) {
        self.status = RunStatus::Deployed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark run as failed at the given stage
    pub fn mark_failed(&mut self, stage: Stage, reason: String) {
        self.error = Some(reason.clone());
        self.status = RunStatus::Failed { stage, reason };
        self.completed_at = Some(Utc::now());
    }
}

/// Bounded in-memory store of recent deployment runs, newest first.
pub struct RunStore {
    runs: VecDeque<DeployRun>,
    max_runs: usize,
}

impl RunStore {
    pub fn new(max_runs: usize) -> Self {
        Self {
            runs: VecDeque::with_capacity(max_runs),
            max_runs,
        }
    }

    /// Add a run, evicting the oldest if the store is full.
    pub fn add_run(&mut self, run: DeployRun) {
        if self.runs.len() == self.max_runs {
            self.runs.pop_back();
        }
        self.runs.push_front(run);
    }

    pub fn get_run(&self, id: &str) -> Option<&DeployRun> {
        self.runs.iter().find(|run| run.id == id)
    }

    pub fn update_run(&mut self, id: &str, update: impl FnOnce(&mut DeployRun)) {
        if let Some(run) = self.runs.iter_mut().find(|run| run.id == id) {
            update(run);
        }
    }

    /// The run currently traversing the flow, if any.
    pub fn current_run(&self) -> Option<&DeployRun> {
        self.runs.iter().find(|run| !run.status.is_terminal())
    }

    pub fn recent_runs(&self, limit: usize) -> Vec<DeployRun> {
        self.runs.iter().take(limit).cloned().collect()
    }
}
