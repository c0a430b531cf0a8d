//! Read-only JSON views of the catalog plus manual scan triggers.
//! Browsing clients read folder listings from here; they never talk to the
//! object store directly.

use super::AppState;
use crate::{
    errors::AppError,
    models::{
        bucket::{Bucket, BucketStatus},
        catalog_entry::CatalogEntry,
        scan_job::{ScanJob, ScanStats},
    },
    scheduler,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize)]
pub struct BucketView {
    #[serde(flatten)]
    pub bucket: Bucket,
    pub status: BucketStatus,
}

#[derive(Debug, Serialize)]
pub struct BucketDetail {
    #[serde(flatten)]
    pub bucket: Bucket,
    pub status: BucketStatus,
    pub entry_count: i64,
    pub latest_job: Option<ScanJob>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BucketsQuery {
    /// Hide buckets quarantined by the lifecycle sweep.
    #[serde(default)]
    pub accessible: bool,
}

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    pub prefix: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub bucket: String,
    pub prefix: String,
    pub entries: Vec<CatalogEntry>,
}

/// `GET /buckets?accessible=true`
pub async fn list_buckets(
    State(state): State<AppState>,
    Query(query): Query<BucketsQuery>,
) -> Result<Json<Vec<BucketView>>, AppError> {
    let buckets = if query.accessible {
        state.catalog.list_accessible_buckets().await?
    } else {
        state.catalog.list_buckets().await?
    };
    let mut views = Vec::with_capacity(buckets.len());
    for bucket in buckets {
        let latest = state.catalog.latest_job_for_bucket(bucket.id).await?;
        let status = BucketStatus::derive(&bucket, latest.as_ref());
        views.push(BucketView { bucket, status });
    }
    Ok(Json(views))
}

/// `GET /buckets/{bucket}`
pub async fn get_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Json<BucketDetail>, AppError> {
    let bucket = state.catalog.bucket(&bucket).await?;
    let latest_job = state.catalog.latest_job_for_bucket(bucket.id).await?;
    let entry_count = state.catalog.count_entries(bucket.id).await?;
    let status = BucketStatus::derive(&bucket, latest_job.as_ref());
    Ok(Json(BucketDetail {
        bucket,
        status,
        entry_count,
        latest_job,
    }))
}

/// `GET /buckets/{bucket}/entries?prefix=docs/`
///
/// Direct children of `prefix`, folders first. A prefix without a trailing
/// `/` is treated as a folder name.
pub async fn list_entries(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<EntriesResponse>, AppError> {
    let bucket = state.catalog.bucket(&bucket).await?;
    let prefix = normalize_prefix(query.prefix.as_deref().unwrap_or(""));
    let entries = state.catalog.list_entries(bucket.id, &prefix).await?;
    Ok(Json(EntriesResponse {
        bucket: bucket.name,
        prefix,
        entries,
    }))
}

/// `GET /buckets/{bucket}/objects/{*key}`: one catalog entry by key.
pub async fn get_entry(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Json<CatalogEntry>, AppError> {
    let bucket = state.catalog.bucket(&bucket).await?;
    let entry = state
        .catalog
        .find_entry(bucket.id, &key)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no catalog entry `{}` in `{}`", key, bucket.name)))?;
    Ok(Json(entry))
}

/// `POST /scan`: start a full sweep in the background.
pub async fn trigger_sweep(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    if state.orchestrator.sweep_running() {
        return Err(AppError::conflict("a full sweep is already running"));
    }
    scheduler::launch_sweep(
        state.orchestrator.clone(),
        state.shutdown.child_token(),
        "api",
    );
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

/// `POST /buckets/{bucket}/scan`: scan one bucket and return its counters.
///
/// The scan runs on its own task; a client that disconnects early does not
/// abandon the scan job, which still finishes or fails on shutdown.
pub async fn scan_bucket(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Json<ScanStats>, AppError> {
    let orchestrator = state.orchestrator.clone();
    let cancel = state.shutdown.child_token();
    let stats = tokio::spawn(async move { orchestrator.scan_bucket(&bucket, &cancel).await })
        .await
        .map_err(|err| AppError::internal(format!("bucket scan task failed: {}", err)))??;
    Ok(Json(stats))
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::SyncSettings,
        models::scan_job::ScanStatus,
        services::catalog_service::tests::test_catalog,
        sync::{orchestrator::ScanOrchestrator, testing::FakeSource},
    };
    use std::{sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;

    async fn state(source: Arc<FakeSource>) -> AppState {
        let catalog = test_catalog().await;
        let orchestrator = Arc::new(ScanOrchestrator::new(
            catalog.clone(),
            source,
            SyncSettings::default(),
        ));
        AppState {
            catalog,
            orchestrator,
            storage_root: std::env::temp_dir(),
            shutdown: CancellationToken::new(),
        }
    }

    #[test]
    fn prefixes_are_folder_keys() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("docs"), "docs/");
        assert_eq!(normalize_prefix("/docs/img/"), "docs/img/");
    }

    #[tokio::test]
    async fn scan_then_browse() {
        let source = Arc::new(FakeSource::new());
        source.put("demo", "x.txt", 1);
        source.put("demo", "docs/readme.md", 2);
        source.put("demo", "docs/img/a.png", 3);
        let state = state(source).await;

        let Json(stats) = scan_bucket(State(state.clone()), Path("demo".into()))
            .await
            .unwrap();
        assert_eq!(stats.objects_created, 5);

        let Json(root) = list_entries(
            State(state.clone()),
            Path("demo".into()),
            Query(EntriesQuery { prefix: None }),
        )
        .await
        .unwrap();
        let keys: Vec<_> = root.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["docs/", "x.txt"]);

        let Json(docs) = list_entries(
            State(state.clone()),
            Path("demo".into()),
            Query(EntriesQuery {
                prefix: Some("docs".into()),
            }),
        )
        .await
        .unwrap();
        let keys: Vec<_> = docs.entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["docs/img/", "docs/readme.md"]);

        let Json(detail) = get_bucket(State(state.clone()), Path("demo".into()))
            .await
            .unwrap();
        assert_eq!(detail.status, BucketStatus::Ok);
        assert_eq!(detail.entry_count, 5);

        let Json(entry) = get_entry(
            State(state.clone()),
            Path(("demo".into(), "docs/img/a.png".into())),
        )
        .await
        .unwrap();
        assert_eq!(entry.size_bytes, 3);
        assert_eq!(entry.prefix, "docs/img/");

        let Json(all) = list_buckets(State(state.clone()), Query(BucketsQuery::default()))
            .await
            .unwrap();
        assert_eq!(all.len(), 1);

        sqlx::query("UPDATE buckets SET marked_for_deletion = 1")
            .execute(&*state.catalog.db)
            .await
            .unwrap();
        let Json(visible) = list_buckets(State(state), Query(BucketsQuery { accessible: true }))
            .await
            .unwrap();
        assert!(visible.is_empty());
    }

    #[tokio::test]
    async fn unknown_bucket_is_404() {
        let state = state(Arc::new(FakeSource::new())).await;
        let err = get_bucket(State(state.clone()), Path("nope".into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        state.catalog.register_bucket("demo", "local").await.unwrap();
        let err = get_entry(State(state), Path(("demo".into(), "missing.txt".into())))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dropped_scan_request_still_finalizes_job() {
        let source = Arc::new(FakeSource::new());
        source.put("slow", "a.txt", 1);
        source.stall_listing("slow", 0);
        let state = state(source.clone()).await;

        let request = tokio::spawn(scan_bucket(State(state.clone()), Path("slow".into())));
        tokio::time::timeout(Duration::from_secs(5), source.listing_stalled())
            .await
            .unwrap();
        request.abort();
        let _ = request.await;
        state.shutdown.cancel();

        let bucket = state.catalog.bucket("slow").await.unwrap();
        let job = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let job = state
                    .catalog
                    .latest_job_for_bucket(bucket.id)
                    .await
                    .unwrap()
                    .unwrap();
                if job.status.is_terminal() {
                    break job;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(job.status, ScanStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("scan cancelled"));
    }
}
