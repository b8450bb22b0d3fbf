//! End-to-end deployment scenarios, driven through the webhook handler
//! with a scripted executor standing in for the remote host.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::State;
use chrono::Utc;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use simple_push_deploy::error::Stage;
use simple_push_deploy::event::EventBus;
use simple_push_deploy::handlers::handle_webhook;
use simple_push_deploy::pipeline::run_dispatcher;
use simple_push_deploy::remote::{CommandOutput, RemoteCommand, RemoteExecutor};
use simple_push_deploy::run::{RunStatus, RunStore};
use simple_push_deploy::{AppState, DeployConfig, SharedState};

fn ok_output(stdout: &str) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: String::new(),
        success: true,
    }
}

fn failed_output(stderr: &str) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.to_string(),
        success: false,
    }
}

/// Records every issued command and replays scripted outcomes in order;
/// once the script runs out, every command succeeds with empty output.
struct ScriptedExecutor {
    calls: StdMutex<Vec<RemoteCommand>>,
    outcomes: StdMutex<VecDeque<CommandOutput>>,
}

impl ScriptedExecutor {
    fn new(outcomes: impl IntoIterator<Item = CommandOutput>) -> Arc<Self> {
        Arc::new(Self {
            calls: StdMutex::new(Vec::new()),
            outcomes: StdMutex::new(outcomes.into_iter().collect()),
        })
    }

    fn calls(&self) -> Vec<RemoteCommand> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(&self, command: &RemoteCommand) -> io::Result<CommandOutput> {
        self.calls.lock().unwrap().push(command.clone());
        Ok(self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ok_output("")))
    }
}

fn start_pipeline(executor: Arc<ScriptedExecutor>) -> SharedState {
    let config: DeployConfig = toml::from_str(
        r#"
        [target]
        host = "deploy@203.0.113.7"
        repo_dir = "/srv/app"
        branch = "main"
    "#,
    )
    .unwrap();
    config.validate().unwrap();

    let (bus, events) = EventBus::new();
    let state = Arc::new(AppState {
        run_store: Mutex::new(RunStore::new(8)),
        bus,
        config,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    tokio::spawn(run_dispatcher(state.clone(), events, executor));
    state
}

async fn post_webhook(state: &SharedState, body: &str) -> serde_json::Value {
    let (_, axum::Json(value)) =
        handle_webhook(State(state.clone()), Bytes::from(body.to_string())).await;
    value
}

async fn wait_for_terminal(state: &SharedState, run_id: &str) -> RunStatus {
    for _ in 0..200 {
        {
            let store = state.run_store.lock().await;
            if let Some(run) = store.get_run(run_id) {
                if run.status.is_terminal() {
                    return run.status.clone();
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("run {run_id} did not reach a terminal state");
}

#[tokio::test]
async fn push_to_main_pulls_installs_and_restarts() {
    let executor = ScriptedExecutor::new([ok_output("Updating 1a2b..3c4d\n")]);
    let state = start_pipeline(executor.clone());

    let body = post_webhook(
        &state,
        r#"{"ref": "refs/heads/main", "head_commit": {"id": "abc123"}}"#,
    )
    .await;
    assert_eq!(body["status"], "Webhook received");
    assert_eq!(body["commit"], "abc123");
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let status = wait_for_terminal(&state, &run_id).await;
    assert_eq!(status, RunStatus::Deployed);

    // Remote commands, in order, all against the configured target.
    let calls = executor.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].argv, ["git", "pull", "origin", "main"]);
    assert_eq!(calls[1].argv, ["npm", "install"]);
    assert_eq!(calls[2].argv, ["pm2", "restart", "app"]);
    for call in &calls {
        assert_eq!(call.working_dir.as_deref(), Some("/srv/app"));
    }

    // The commit rides through the whole flow unchanged.
    let store = state.run_store.lock().await;
    let run = store.get_run(&run_id).unwrap();
    assert_eq!(run.commit, "abc123");
    assert_eq!(run.pull_output.as_deref(), Some("Updating 1a2b..3c4d\n"));
}

#[tokio::test]
async fn push_to_other_branch_triggers_nothing() {
    let executor = ScriptedExecutor::new([]);
    let state = start_pipeline(executor.clone());

    let body = post_webhook(
        &state,
        r#"{"ref": "refs/heads/develop", "head_commit": {"id": "xyz"}}"#,
    )
    .await;
    assert_eq!(body["status"], "Ignored, not tracked branch");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(executor.calls().is_empty());
    assert!(state.run_store.lock().await.recent_runs(10).is_empty());
}

#[tokio::test]
async fn failed_restart_leaves_run_failed_at_restart() {
    let executor = ScriptedExecutor::new([
        ok_output("Updating 1a2b..3c4d\n"),
        ok_output(""),
        failed_output("pm2: process 'app' not found"),
    ]);
    let state = start_pipeline(executor.clone());

    let body = post_webhook(
        &state,
        r#"{"ref": "refs/heads/main", "head_commit": {"id": "abc123"}}"#,
    )
    .await;
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let status = wait_for_terminal(&state, &run_id).await;
    match status {
        RunStatus::Failed { stage, reason } => {
            assert_eq!(stage, Stage::Restart);
            assert!(reason.contains("not found"));
        }
        other => panic!("expected restart failure, got {:?}", other),
    }

    // Pull and install did run; the host now has new code, old process.
    assert_eq!(executor.calls().len(), 3);
    let store = state.run_store.lock().await;
    let run = store.get_run(&run_id).unwrap();
    assert!(run.completed_at.is_some());
    assert!(run.error.as_deref().unwrap().contains("not found"));
}

#[tokio::test]
async fn failed_pull_halts_the_flow_before_deploy() {
    let executor = ScriptedExecutor::new([failed_output("fatal: unable to access remote")]);
    let state = start_pipeline(executor.clone());

    let body = post_webhook(
        &state,
        r#"{"ref": "refs/heads/main", "head_commit": {"id": "abc123"}}"#,
    )
    .await;
    let run_id = body["run_id"].as_str().unwrap().to_string();

    let status = wait_for_terminal(&state, &run_id).await;
    assert!(matches!(
        status,
        RunStatus::Failed {
            stage: Stage::Pull,
            ..
        }
    ));

    // No install or restart was ever attempted.
    assert_eq!(executor.calls().len(), 1);
}

#[tokio::test]
async fn overlapping_pushes_deploy_one_after_another() {
    let executor = ScriptedExecutor::new([]);
    let state = start_pipeline(executor.clone());

    let first = post_webhook(
        &state,
        r#"{"ref": "refs/heads/main", "head_commit": {"id": "first"}}"#,
    )
    .await;
    let second = post_webhook(
        &state,
        r#"{"ref": "refs/heads/main", "head_commit": {"id": "second"}}"#,
    )
    .await;

    let first_id = first["run_id"].as_str().unwrap().to_string();
    let second_id = second["run_id"].as_str().unwrap().to_string();

    assert_eq!(wait_for_terminal(&state, &first_id).await, RunStatus::Deployed);
    assert_eq!(wait_for_terminal(&state, &second_id).await, RunStatus::Deployed);

    // Two full runs, six commands, never interleaved within a run's
    // install/restart pair.
    let calls = executor.calls();
    assert_eq!(calls.len(), 6);
    let argv0: Vec<_> = calls.iter().map(|c| c.argv[0].as_str()).collect();
    assert_eq!(argv0, ["git", "npm", "pm2", "git", "npm", "pm2"]);
}
