mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tally_api::{AppState, AppStateInner, router};
use tally_db::Database;
use tally_worker::{MemoryStatsCache, StatsCache, VoteQueue, WorkerPool, maintenance};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tally=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);
    info!("Database ready at {}", config.db_path.display());

    // Vote pipeline
    let cache: Arc<dyn StatsCache> =
        Arc::new(MemoryStatsCache::new(Duration::from_secs(config.stats_ttl_secs)));
    let (queue, rx) = VoteQueue::new(config.vote_queue_capacity);
    let shutdown = CancellationToken::new();

    let workers = WorkerPool::spawn(
        config.vote_workers,
        rx,
        queue.clone(),
        db.clone(),
        cache.clone(),
        shutdown.clone(),
    );

    // Background maintenance: close expired polls, prune finished jobs
    let maintenance = tokio::spawn(maintenance::run_maintenance_loop(
        db.clone(),
        cache.clone(),
        queue.clone(),
        config.expiry_interval_secs,
        shutdown.clone(),
    ));

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: chrono::Duration::days(config.token_ttl_days),
        queue,
        cache,
    });

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Tally server listening on {}", addr);
    info!(
        "{} vote workers, queue capacity {}, stats cache {}s",
        config.vote_workers, config.vote_queue_capacity, config.stats_ttl_secs
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop background work; jobs still queued are dropped
    shutdown.cancel();
    workers.join().await;
    if let Err(e) = maintenance.await {
        warn!("Maintenance task ended abnormally: {}", e);
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
