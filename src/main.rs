use anyhow::{Context, Result};
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod scheduler;
mod services;
mod sync;

use handlers::AppState;
use services::{
    catalog_service::{Catalog, run_migrations},
    object_source::LocalObjectSource,
};
use sync::orchestrator::ScanOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;
    let schedule = scheduler::Schedule::parse(&cfg.scan_schedule)?;

    tracing::info!("Starting bucket-catalog with config: {:?}", cfg);

    // --- Ensure storage root exists ---
    if !Path::new(&cfg.storage_root).exists() {
        fs::create_dir_all(&cfg.storage_root)?;
        tracing::info!("Created storage root at {}", cfg.storage_root);
    }

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database url `{}`", cfg.database_url))?
        .create_if_missing(true)
        .foreign_keys(true);
    let db = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );

    run_migrations(&db).await.context("running migrations")?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    let catalog = Catalog::new(db.clone());
    let orphaned = catalog
        .fail_orphaned_jobs("interrupted by process restart")
        .await?;
    if orphaned > 0 {
        tracing::warn!(orphaned, "failed scan jobs left running by a previous process");
    }

    // --- Reconciliation engine ---
    let source = Arc::new(LocalObjectSource::new(&cfg.storage_root));
    let orchestrator = Arc::new(ScanOrchestrator::new(
        catalog.clone(),
        source.clone(),
        cfg.sync.clone(),
    ));
    let shutdown = CancellationToken::new();
    let scheduler_task = scheduler::spawn(
        orchestrator.clone(),
        schedule,
        cfg.scan_on_startup,
        shutdown.clone(),
    );

    // --- Build router ---
    let state = AppState {
        catalog,
        orchestrator: orchestrator.clone(),
        storage_root: source.root().to_path_buf(),
        shutdown: shutdown.clone(),
    };
    let app: Router = routes::routes::routes().with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("shutdown requested, cancelling scans");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = scheduler_task.await {
        tracing::warn!("scheduler task ended abnormally: {}", err);
    }
    // Give a cancelled sweep the chance to finalize its job.
    let drained = tokio::time::timeout(Duration::from_secs(10), async {
        while orchestrator.sweep_running() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        tracing::warn!("sweep still running at exit; its job will be failed on next start");
    }
    Ok(())
}
