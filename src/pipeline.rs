//! The code-pull and app-deploy stages, plus the dispatcher that feeds
//! them from the event bus.
//!
//! The dispatcher is the single consumer of pipeline events, so remote
//! commands of overlapping runs never interleave; rapid pushes queue in
//! the bus and are deployed one after another.

use std::sync::Arc;
use tracing::{error, info};

use crate::error::{DeployError, Result, Stage};
use crate::event::{EventStream, PipelineEvent, RunPayload};
use crate::remote::{CommandOutput, RemoteCommand, RemoteExecutor};
use crate::run::RunStatus;
use crate::{DeployConfig, SharedState};

/// Pulls the tracked branch into the remote working directory when code
/// is pushed.
pub struct CodePuller {
    executor: Arc<dyn RemoteExecutor>,
    repo_dir: String,
    branch: String,
}

impl CodePuller {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: &DeployConfig) -> Self {
        Self {
            executor,
            repo_dir: config.target.repo_dir.clone(),
            branch: config.target.branch.clone(),
        }
    }

    /// Runs `git pull origin <branch>` in the repository directory and
    /// returns the captured stdout.
    pub async fn handle(&self, payload: &RunPayload) -> Result<String> {
        let command = RemoteCommand::in_dir(
            self.repo_dir.as_str(),
            ["git", "pull", "origin", self.branch.as_str()],
        );
        let output = run_stage_command(&*self.executor, Stage::Pull, &command).await?;
        info!(
            "Run {} - pulled '{}' for commit {}",
            payload.run_id, self.branch, payload.commit
        );
        Ok(output.stdout)
    }
}

/// Installs dependencies and restarts the application process once code
/// has been pulled. Terminal stage, emits nothing further.
pub struct AppDeployer {
    executor: Arc<dyn RemoteExecutor>,
    repo_dir: String,
    install: Vec<String>,
    restart: Vec<String>,
}

impl AppDeployer {
    pub fn new(executor: Arc<dyn RemoteExecutor>, config: &DeployConfig) -> Self {
        Self {
            executor,
            repo_dir: config.target.repo_dir.clone(),
            install: config.commands.install.clone(),
            restart: config.commands.restart.clone(),
        }
    }

    /// Install, then restart, strictly in that order. A failed install
    /// never attempts the restart; a failed restart leaves the new code
    /// on disk with the old process still running.
    pub async fn handle(&self, payload: &RunPayload) -> Result<()> {
        let install = RemoteCommand::in_dir(self.repo_dir.as_str(), self.install.iter().cloned());
        run_stage_command(&*self.executor, Stage::Install, &install).await?;

        let restart = RemoteCommand::in_dir(self.repo_dir.as_str(), self.restart.iter().cloned());
        run_stage_command(&*self.executor, Stage::Restart, &restart).await?;

        info!(
            "Run {} - deployment successful for commit {}",
            payload.run_id, payload.commit
        );
        Ok(())
    }
}

/// Runs one remote command for a stage, mapping session failures and
/// non-zero exits to a stage-tagged error.
async fn run_stage_command(
    executor: &dyn RemoteExecutor,
    stage: Stage,
    command: &RemoteCommand,
) -> Result<CommandOutput> {
    let output = executor
        .execute(command)
        .await
        .map_err(|e| DeployError::stage(stage, format!("failed to start: {}", e)))?;

    if !output.success {
        let mut message = output.stderr.trim().to_string();
        if message.is_empty() {
            message = output.stdout.trim().to_string();
        }
        return Err(DeployError::stage(stage, message));
    }
    Ok(output)
}

/// Consumes pipeline events and drives the matching stage, advancing the
/// run store as each run progresses. Runs until every emitter is dropped.
pub async fn run_dispatcher(
    state: SharedState,
    mut events: EventStream,
    executor: Arc<dyn RemoteExecutor>,
) {
    let puller = CodePuller::new(executor.clone(), &state.config);
    let deployer = AppDeployer::new(executor, &state.config);

    while let Some(event) = events.next().await {
        match event {
            PipelineEvent::CodePushed(payload) => {
                set_status(&state, &payload.run_id, RunStatus::Pulling).await;
                match puller.handle(&payload).await {
                    Ok(output) => {
                        {
                            let mut store = state.run_store.lock().await;
                            store.update_run(&payload.run_id, |run| run.mark_pulled(output));
                        }
                        if !state
                            .bus
                            .emit(PipelineEvent::CodePulled(payload.clone()))
                            .await
                        {
                            error!("Run {} - event bus closed, halting run", payload.run_id);
                        }
                    }
                    Err(e) => fail_run(&state, &payload, Stage::Pull, e).await,
                }
            }
            PipelineEvent::CodePulled(payload) => {
                set_status(&state, &payload.run_id, RunStatus::Deploying).await;
                match deployer.handle(&payload).await {
                    Ok(()) => {
                        let mut store = state.run_store.lock().await;
                        store.update_run(&payload.run_id, |run| run.mark_deployed());
                    }
                    Err(e) => fail_run(&state, &payload, Stage::Install, e).await,
                }
            }
        }
    }
}

async fn set_status(state: &SharedState, run_id: &str, status: RunStatus) {
    let mut store = state.run_store.lock().await;
    store.update_run(run_id, |run| run.status = status);
}

/// Final catcher for a run: log, record the failing stage, emit nothing.
async fn fail_run(state: &SharedState, payload: &RunPayload, fallback: Stage, err: DeployError) {
    error!("Run {} failed: {}", payload.run_id, err);
    let (stage, reason) = match err {
        DeployError::Stage { stage, message } => (stage, message),
        other => (fallback, other.to_string()),
    };
    let mut store = state.run_store.lock().await;
    store.update_run(&payload.run_id, |run| run.mark_failed(stage, reason));
}
