use axum::{Router, routing};
use chrono::Utc;
use simple_push_deploy::error::DeployError;
use simple_push_deploy::event::EventBus;
use simple_push_deploy::handlers::{get_run, handle_webhook, root, status};
use simple_push_deploy::pipeline::run_dispatcher;
use simple_push_deploy::remote::{RemoteExecutor, SshExecutor};
use simple_push_deploy::run::RunStore;
use simple_push_deploy::{AppState, DeployConfig};
use std::fs;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{self, info};

const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8888";
const DEFAULT_CONFIG_PATH: &str = "deploy_config.toml";
const DEFAULT_MAX_RUNS: usize = 24;

/// Load, parse and validate the configuration file
fn load_config(path: &str) -> Result<DeployConfig, DeployError> {
    let config_str = fs::read_to_string(path).map_err(|e| {
        DeployError::ConfigError(format!("Failed to read config file '{}': {}", path, e))
    })?;

    let config: DeployConfig = toml::from_str(&config_str).map_err(|e| {
        DeployError::ConfigError(format!("Failed to parse config file '{}': {}", path, e))
    })?;

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let bind_address =
        std::env::var("BIND_ADDRESS").unwrap_or_else(|_| DEFAULT_BIND_ADDRESS.to_string());
    let config_path =
        std::env::var("DEPLOY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let config: DeployConfig = match load_config(&config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt::init();

    let (bus, events) = EventBus::new();
    let state = Arc::new(AppState {
        run_store: Mutex::new(RunStore::new(DEFAULT_MAX_RUNS)),
        bus,
        config,
        start_time: Instant::now(),
        started_at: Utc::now(),
    });

    let executor: Arc<dyn RemoteExecutor> =
        Arc::new(SshExecutor::new(state.config.target.host.clone()));
    tokio::spawn(run_dispatcher(state.clone(), events, executor));

    let app = Router::new()
        .route("/", routing::get(root))
        .route("/webhook", routing::post(handle_webhook))
        .route("/status", routing::get(status))
        .route("/run/{id}", routing::get(get_run))
        .with_state(state);

    info!("Listening on {}", bind_address);
    info!("Using config at {:?}", config_path);
    let listener = tokio::net::TcpListener::bind(bind_address).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
