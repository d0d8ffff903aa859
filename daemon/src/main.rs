use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;

use atlasd::assistant::{self, Assistant, GeminiClient};
use atlasd::config::load_config;
use atlasd::pipeline;
use atlasd::server::{default_socket_path, DaemonServer};
use atlasd::state::{build_orchestrator, DaemonState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .with_target(false)
        .with_env_filter(EnvFilter::from_default_env().add_directive(LevelFilter::INFO.into()))
        .init();

    info!("atlas daemon (atlasd) starting...");

    let config = load_config()?;

    let (pipeline, pipeline_task) = pipeline::spawn(build_orchestrator(&config));

    let request_timeout = Duration::from_secs(config.timeouts.request_timeout_seconds);
    let answerer = GeminiClient::new(&config.assistant, request_timeout)?;
    let assistant = Arc::new(Assistant::new(Arc::new(answerer)));

    let assistant_task = tokio::spawn(assistant::run(
        pipeline.clone(),
        Arc::clone(&assistant),
        Duration::from_millis(config.wake.command_timeout_ms),
    ));

    if config.wake.auto_start {
        let pipeline = pipeline.clone();
        tokio::spawn(async move {
            match pipeline.start().await {
                Ok(()) => info!("Listening for the wake phrase"),
                Err(e) => warn!("Auto start failed: {}", e.user_message()),
            }
        });
    }

    let state = Arc::new(DaemonState::new(config, pipeline.clone(), assistant));
    let server = DaemonServer::new(default_socket_path(), state);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                warn!("Socket server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    pipeline.destroy().await;
    assistant_task.abort();
    drop(server);
    drop(pipeline);
    pipeline_task.abort();

    Ok(())
}
