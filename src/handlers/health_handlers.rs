//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the catalog DB and the storage root

use super::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::{collections::HashMap, path::Path};
use tokio::fs;

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs `SELECT 1` against the catalog database.
/// 2. Checks that the storage root is a readable directory.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails. The sweep
/// state is reported for information only.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite_check = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.catalog.db)
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    let storage_check = check_storage_root(&state.storage_root).await;

    let overall_ok = sqlite_check.ok && storage_check.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite_check);
    checks.insert("storage_root", storage_check);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        sweep_running: state.orchestrator.sweep_running(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn check_storage_root(root: &Path) -> CheckStatus {
    match fs::metadata(root).await {
        Ok(meta) if !meta.is_dir() => CheckStatus::failed("storage root is not a directory"),
        Ok(_) => match fs::read_dir(root).await {
            Ok(_) => CheckStatus::ok(),
            Err(e) => CheckStatus::failed(format!("could not list storage root: {}", e)),
        },
        Err(e) => CheckStatus::failed(format!("could not stat storage root: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    sweep_running: bool,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn storage_root_must_be_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_storage_root(dir.path()).await.ok);

        let file = dir.path().join("plain");
        std::fs::write(&file, b"x").unwrap();
        assert!(!check_storage_root(&file).await.ok);
        assert!(!check_storage_root(&dir.path().join("missing")).await.ok);
    }
}
