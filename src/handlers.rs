//! HTTP handlers: the webhook receiver plus observability endpoints.

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::SharedState;
use crate::error::Stage;
use crate::event::{PipelineEvent, RunPayload};
use crate::run::DeployRun;

/// Push notification body as sent by the source-control host. Additional
/// fields are ignored.
#[derive(Debug, Deserialize)]
pub struct PushPayload {
    #[serde(rename = "ref")]
    pub git_ref: Option<String>,
    pub head_commit: Option<HeadCommit>,
}

#[derive(Debug, Deserialize)]
pub struct HeadCommit {
    pub id: Option<String>,
}

pub async fn root() -> &'static str {
    "Hello, World!"
}

/// Returns the current server status with run information
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let store = state.run_store.lock().await;
    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "runs": {
            "current": store.current_run(),
            "recent": store.recent_runs(10),
        },
        "target": {
            "host": state.config.target.host,
            "repo_dir": state.config.target.repo_dir,
            "branch": state.config.target.branch,
        }
    }))
}

/// Returns a specific run by ID
pub async fn get_run(
    AxumState(state): AxumState<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.run_store.lock().await;
    match store.get_run(&id) {
        Some(run) => Json(run.clone()).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Run not found"})),
        )
            .into_response(),
    }
}

/// Handles the source-control webhook POST request.
///
/// Pushes to anything but the tracked branch are a deliberate no-op. A
/// matching push with a missing or empty commit id is a client error, not
/// a crash. At most one `CodePushed` event is emitted per invocation.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    if body.is_empty() {
        info!("Empty webhook body, ignoring");
        return ignored();
    }

    let payload: PushPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            warn!("Could not parse webhook body: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "status": "Invalid payload" })),
            );
        }
    };

    let tracked_ref = state.config.target.branch_ref();
    match &payload.git_ref {
        Some(git_ref) if *git_ref == tracked_ref => {}
        other => {
            info!("Ignoring push for {:?}, tracking '{}'", other, tracked_ref);
            return ignored();
        }
    }

    // Branch matches; the commit id must be present and non-empty.
    let commit = payload
        .head_commit
        .and_then(|c| c.id)
        .filter(|id| !id.is_empty());
    let Some(commit) = commit else {
        warn!("Push for '{}' is missing head_commit.id", tracked_ref);
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "status": "Missing head_commit.id" })),
        );
    };

    let run = DeployRun::new(commit.clone());
    let run_id = run.id.clone();
    {
        let mut store = state.run_store.lock().await;
        store.add_run(run);
    }

    info!("Created run {} for commit {}", run_id, commit);

    let delivered = state
        .bus
        .emit(PipelineEvent::CodePushed(RunPayload {
            run_id: run_id.clone(),
            commit: commit.clone(),
        }))
        .await;
    if !delivered {
        error!("Pipeline dispatcher is gone; cannot start run {}", run_id);
        let mut store = state.run_store.lock().await;
        store.update_run(&run_id, |run| {
            run.mark_failed(Stage::Pull, "pipeline unavailable".to_string())
        });
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "Pipeline unavailable" })),
        );
    }

    (
        StatusCode::OK,
        Json(json!({
            "status": "Webhook received",
            "commit": commit,
            "run_id": run_id,
        })),
    )
}

fn ignored() -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "Ignored, not tracked branch" })),
    )
}
