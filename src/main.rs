mod api;
mod config;
mod error;
mod executor;
mod logging;
mod models;
mod paths;
mod repository;
mod services;
#[cfg(test)]
mod test_support;

use crate::config::Config;
use crate::executor::CreatorExecutor;
use crate::logging::BuildLogs;
use crate::repository::{LocalUploads, SymlinkQueue};
use crate::services::{
    ComposeService, DirectoryRecipes, QueueMonitor, RepoqueryDepsolver, check_queues,
};
use api::create_router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let build_logs = BuildLogs::new();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "lorax_composer=debug,program=info,dnf=info,tower_http=debug,axum=debug".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .with(build_logs.layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Starting lorax-composer with config: {:?}", config);

    paths::make_queue_dirs(&config.lib_dir)?;
    let queue = Arc::new(SymlinkQueue::new(&config.lib_dir));
    let uploads = Arc::new(LocalUploads::new(paths::upload_queue_dir(&config.lib_dir)));

    // Repair whatever a previous run left behind before building anything
    let report = check_queues(&config.lib_dir, queue.as_ref())?;
    if !report.is_clean() {
        tracing::warn!("Recovered queue state: {:?}", report);
    }

    let monitor = QueueMonitor::new(
        &config,
        queue.clone(),
        uploads.clone(),
        CreatorExecutor::new(Some(config.creator_path.clone())).with_cancel_poll(config.cancel_poll()),
        build_logs,
    );
    tokio::spawn(monitor.run());

    let config = Arc::new(config);
    let compose_service = ComposeService::new(
        config.clone(),
        queue,
        uploads,
        Box::new(DirectoryRecipes::new(config.recipes_dir.clone())),
        Box::new(RepoqueryDepsolver::default()),
    );

    // Create router
    let app = create_router(compose_service);
    let app = app.layer(TraceLayer::new_for_http());

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    let addr = addr.parse::<SocketAddr>()?;
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
