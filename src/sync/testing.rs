//! Scriptable in-memory object source for engine tests.

use crate::services::object_source::{ListPage, ObjectInfo, ObjectSource, SourceError, SourceResult};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
};
use tokio::sync::Notify;

#[derive(Default)]
struct State {
    buckets: BTreeMap<String, BTreeMap<String, ObjectInfo>>,
    /// Errors returned by the next N probes of a bucket.
    probe_failures: HashMap<String, (u32, SourceError)>,
    /// Error returned by every probe of a bucket.
    probe_errors: HashMap<String, SourceError>,
    /// Listing fails once the given number of pages has been served.
    list_errors: HashMap<String, (u32, SourceError)>,
    /// Listing hangs once the given number of pages has been served.
    list_stalls: HashMap<String, u32>,
    probe_calls: HashMap<String, u32>,
    pages_served: HashMap<String, u32>,
}

#[derive(Default)]
pub struct FakeSource {
    state: Mutex<State>,
    stalled: Notify,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bucket(&self, bucket: &str) {
        let mut state = self.state.lock().unwrap();
        state.buckets.entry(bucket.to_string()).or_default();
    }

    pub fn put(&self, bucket: &str, key: &str, size: i64) {
        let info = ObjectInfo {
            key: key.to_string(),
            size,
            last_modified: Utc.timestamp_opt(1_700_000_000 + size, 0).single(),
            etag: Some(format!("etag-{}-{}", key, size)),
            storage_class: Some("STANDARD".into()),
        };
        let mut state = self.state.lock().unwrap();
        state
            .buckets
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), info);
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(objects) = state.buckets.get_mut(bucket) {
            objects.remove(key);
        }
    }

    /// Every probe of `bucket` answers 403 AccessDenied.
    pub fn deny(&self, bucket: &str) {
        self.state.lock().unwrap().probe_errors.insert(
            bucket.to_string(),
            SourceError::new(format!("Access Denied to {}", bucket))
                .with_status(403)
                .with_code("AccessDenied"),
        );
    }

    pub fn allow(&self, bucket: &str) {
        self.state.lock().unwrap().probe_errors.remove(bucket);
    }

    pub fn fail_probes(&self, bucket: &str, times: u32, err: SourceError) {
        self.state
            .lock()
            .unwrap()
            .probe_failures
            .insert(bucket.to_string(), (times, err));
    }

    /// Fail the listing after `after_pages` successful pages.
    pub fn fail_listing(&self, bucket: &str, after_pages: u32, err: SourceError) {
        self.state
            .lock()
            .unwrap()
            .list_errors
            .insert(bucket.to_string(), (after_pages, err));
    }

    /// Hang the listing after `after_pages` pages until the caller gives up.
    pub fn stall_listing(&self, bucket: &str, after_pages: u32) {
        self.state
            .lock()
            .unwrap()
            .list_stalls
            .insert(bucket.to_string(), after_pages);
    }

    /// Resolves once a listing has hit its stall point.
    pub async fn listing_stalled(&self) {
        self.stalled.notified().await;
    }

    pub fn probe_calls(&self, bucket: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .probe_calls
            .get(bucket)
            .copied()
            .unwrap_or(0)
    }

    pub fn pages_served(&self, bucket: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .pages_served
            .get(bucket)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ObjectSource for FakeSource {
    async fn list_buckets(&self) -> SourceResult<Vec<String>> {
        Ok(self.state.lock().unwrap().buckets.keys().cloned().collect())
    }

    async fn probe_bucket(&self, bucket: &str) -> SourceResult<()> {
        let mut state = self.state.lock().unwrap();
        *state.probe_calls.entry(bucket.to_string()).or_default() += 1;

        if let Some((remaining, err)) = state.probe_failures.get_mut(bucket) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(err.clone());
            }
        }
        if let Some(err) = state.probe_errors.get(bucket) {
            return Err(err.clone());
        }
        if !state.buckets.contains_key(bucket) {
            return Err(SourceError::new(format!("bucket {} does not exist", bucket))
                .with_status(404)
                .with_code("NoSuchBucket"));
        }
        Ok(())
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        continuation: Option<&str>,
        max_keys: usize,
    ) -> SourceResult<ListPage> {
        let stall = {
            let state = self.state.lock().unwrap();
            let served = state.pages_served.get(bucket).copied().unwrap_or(0);
            state
                .list_stalls
                .get(bucket)
                .is_some_and(|after| served >= *after)
        };
        if stall {
            self.stalled.notify_one();
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();
        let served = state.pages_served.get(bucket).copied().unwrap_or(0);
        if let Some((after, err)) = state.list_errors.get(bucket) {
            if served >= *after {
                return Err(err.clone());
            }
        }
        let Some(objects) = state.buckets.get(bucket) else {
            return Err(SourceError::new("no such bucket").with_status(404));
        };

        let mut page: Vec<ObjectInfo> = objects
            .values()
            .filter(|o| prefix.is_none_or(|p| o.key.starts_with(p)))
            .filter(|o| continuation.is_none_or(|c| o.key.as_str() > c))
            .take(max_keys + 1)
            .cloned()
            .collect();
        let next_continuation = if page.len() > max_keys {
            page.truncate(max_keys);
            page.last().map(|o| o.key.clone())
        } else {
            None
        };

        *state.pages_served.entry(bucket.to_string()).or_default() += 1;
        Ok(ListPage {
            objects: page,
            next_continuation,
        })
    }
}
