//! Background synchronisation with the remote authority.
//!
//! A delta pull keeps the local face index in step with enrolment: apply
//! deletes, apply upserts, persist, record the new version token. On the
//! first boot (no stored version) the `since` parameter is omitted and the
//! backend ships the complete set. Network failures leave the previous
//! version in place and are retried on the next tick; the vision pipeline
//! never waits on any of this. The same loop drains unsynced access events
//! upward in batches and prunes old synced rows.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use face_index::{FaceIndex, LogUploadRequest, SyncResponse};
use parking_lot::{Mutex, RwLock};

use crate::access_log::AccessLogger;

const UPLOAD_BATCH: usize = 50;
const STOP_POLL: Duration = Duration::from_millis(500);
const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub backend_url: String,
    pub org_id: String,
    pub interval: Duration,
    pub request_timeout: Duration,
    pub retention_days: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub last_success: bool,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// Short label for the dashboard.
    pub fn label(&self) -> &'static str {
        match (self.last_sync_time.is_some(), self.last_success) {
            (false, _) => "Unknown",
            (true, true) => "Synced",
            (true, false) => "Error",
        }
    }
}

/// Handle the rest of the node uses to observe and poke the worker.
#[derive(Clone)]
pub struct SyncHandle {
    status: Arc<Mutex<SyncStatus>>,
    force: Arc<AtomicBool>,
}

impl SyncHandle {
    pub fn status(&self) -> SyncStatus {
        self.status.lock().clone()
    }

    /// Request an immediate sync on the next loop iteration.
    pub fn force_sync(&self) {
        self.force.store(true, Ordering::Relaxed);
    }
}

/// Apply one sync payload to the index: deletes first, then upserts, then
/// the version. Returns (applied_upserts, applied_deletes). Records that
/// fail validation are skipped and logged, never fatal.
pub fn apply_delta(index: &RwLock<FaceIndex>, response: SyncResponse) -> (usize, usize) {
    let mut index = index.write();

    let mut deleted = 0;
    for face_id in &response.deletes {
        if index.remove(face_id) {
            deleted += 1;
        }
    }

    let mut upserted = 0;
    for upsert in response.upserts {
        let face_id = upsert.id.clone();
        match upsert.into_record() {
            Ok(record) => {
                index.add(record);
                upserted += 1;
            }
            Err(e) => tracing::warn!(face_id = %face_id, error = %e, "skipping invalid sync record"),
        }
    }

    index.set_version(response.version);
    if let Err(e) = index.save() {
        tracing::error!(error = %e, "face index save failed, will retry on next sync");
    }

    (upserted, deleted)
}

fn sync_faces(
    client: &reqwest::blocking::Client,
    config: &SyncConfig,
    index: &RwLock<FaceIndex>,
) -> Result<()> {
    let since = index.read().version().map(str::to_string);

    let mut params: HashMap<&str, String> = HashMap::new();
    params.insert("org_id", config.org_id.clone());
    if let Some(since) = since.as_deref().filter(|s| !s.is_empty()) {
        params.insert("since", since.to_string());
    }

    let url = format!("{}/api/v1/faces/sync", config.backend_url);
    tracing::debug!(url = %url, since = since.as_deref().unwrap_or("<full>"), "syncing faces");

    let response: SyncResponse = client
        .get(&url)
        .query(&params)
        .send()
        .context("sync request failed")?
        .error_for_status()
        .context("sync request rejected")?
        .json()
        .context("sync response malformed")?;

    let version = response.version.clone();
    let (upserts, deletes) = (response.upserts.len(), response.deletes.len());
    if upserts > 0 || deletes > 0 {
        let (applied_up, applied_del) = apply_delta(index, response);
        tracing::info!(
            upserts = applied_up,
            deletes = applied_del,
            faces = index.read().count(),
            version = %version,
            "sync applied"
        );
    } else {
        tracing::debug!("no updates from backend");
    }
    Ok(())
}

fn upload_logs(client: &reqwest::blocking::Client, config: &SyncConfig, log: &AccessLogger) -> Result<()> {
    let events = log.unsynced(UPLOAD_BATCH)?;
    if events.is_empty() {
        return Ok(());
    }

    let url = format!("{}/api/v1/access-logs", config.backend_url);
    client
        .post(&url)
        .json(&LogUploadRequest { logs: &events })
        .send()
        .context("log upload failed")?
        .error_for_status()
        .context("log upload rejected")?;

    let ids: Vec<i64> = events.iter().filter_map(|e| e.id).collect();
    log.mark_synced(&ids)?;
    tracing::info!(uploaded = ids.len(), "access events uploaded");
    Ok(())
}

/// Start the sync worker thread.
pub fn spawn_sync_worker(
    config: SyncConfig,
    index: Arc<RwLock<FaceIndex>>,
    log: Arc<AccessLogger>,
    stop: Arc<AtomicBool>,
) -> Result<(SyncHandle, JoinHandle<()>)> {
    let status = Arc::new(Mutex::new(SyncStatus::default()));
    let force = Arc::new(AtomicBool::new(false));
    let handle = SyncHandle {
        status: Arc::clone(&status),
        force: Arc::clone(&force),
    };

    let thread = std::thread::Builder::new()
        .name("sync".into())
        .spawn(move || {
            let client = match reqwest::blocking::Client::builder()
                .timeout(config.request_timeout)
                .build()
            {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error = %e, "could not build HTTP client, sync disabled");
                    return;
                }
            };

            tracing::info!(
                backend = %config.backend_url,
                interval_secs = config.interval.as_secs(),
                faces = index.read().count(),
                version = ?index.read().version(),
                "sync worker started"
            );

            // Sync immediately on startup, then on the configured cadence.
            let mut next_sync = Instant::now();
            let mut last_retention = Instant::now();

            while !stop.load(Ordering::Relaxed) {
                if Instant::now() >= next_sync || force.swap(false, Ordering::Relaxed) {
                    next_sync = Instant::now() + config.interval;

                    let faces = sync_faces(&client, &config, &index);
                    let logs = faces.is_ok().then(|| upload_logs(&client, &config, &log));

                    let mut status = status.lock();
                    status.last_sync_time = Some(Utc::now());
                    match faces.and(logs.unwrap_or(Ok(()))) {
                        Ok(()) => {
                            status.last_success = true;
                            status.last_error = None;
                        }
                        Err(e) => {
                            tracing::warn!(error = %format!("{e:#}"), "sync tick failed");
                            status.last_success = false;
                            status.last_error = Some(format!("{e:#}"));
                        }
                    }

                    if last_retention.elapsed() >= RETENTION_INTERVAL {
                        last_retention = Instant::now();
                        if let Err(e) = log.prune_synced_older_than(config.retention_days) {
                            tracing::warn!(error = %e, "log retention failed");
                        }
                    }
                }

                std::thread::sleep(STOP_POLL);
            }

            tracing::info!("sync worker stopped");
        })
        .context("spawning sync worker")?;

    Ok((handle, thread))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Embedding, EMBEDDING_DIM};
    use face_index::FaceUpsert;
    use serde_json::json;

    fn upsert(id: &str, status: &str, axis: usize) -> FaceUpsert {
        let mut embedding = vec![0.0f32; EMBEDDING_DIM];
        embedding[axis] = 1.0;
        serde_json::from_value(json!({
            "id": id,
            "person_id": format!("p-{id}"),
            "full_name": format!("Person {id}"),
            "status": status,
            "embedding": embedding,
        }))
        .unwrap()
    }

    fn embedding(axis: usize) -> Embedding {
        let mut v = vec![0.0f32; EMBEDDING_DIM];
        v[axis] = 1.0;
        Embedding::normalized(v).unwrap()
    }

    #[test]
    fn delta_sync_applies_upserts_then_deletes_reflect() {
        let index = RwLock::new(FaceIndex::empty());

        // First sync: full set of three.
        let first = SyncResponse {
            version: "2026-08-01T09:00:00Z".to_string(),
            upserts: vec![
                upsert("f1", "AUTHORIZED", 0),
                upsert("f2", "AUTHORIZED", 1),
                upsert("f3", "WANTED", 2),
            ],
            deletes: vec![],
            count: 3,
        };
        assert_eq!(apply_delta(&index, first), (3, 0));
        assert_eq!(index.read().count(), 3);
        assert_eq!(index.read().version(), Some("2026-08-01T09:00:00Z"));

        // Second sync: update f2, delete f3.
        let second = SyncResponse {
            version: "2026-08-01T10:00:00Z".to_string(),
            upserts: vec![upsert("f2", "WANTED", 1)],
            deletes: vec!["f3".to_string()],
            count: 1,
        };
        assert_eq!(apply_delta(&index, second), (1, 1));

        let guard = index.read();
        assert_eq!(guard.count(), 2);
        assert_eq!(guard.version(), Some("2026-08-01T10:00:00Z"));

        // f3 is gone.
        let hits = guard.search(&embedding(2), 1);
        assert!(hits.is_empty() || hits[0].face_id != "f3");
        // f2's metadata reflects the update.
        let hits = guard.search(&embedding(1), 1);
        assert_eq!(hits[0].face_id, "f2");
        assert_eq!(hits[0].meta.status, common::PersonStatus::Wanted);
    }

    #[test]
    fn reapplying_the_same_payload_is_a_no_op() {
        let index = RwLock::new(FaceIndex::empty());
        let payload = || SyncResponse {
            version: "v1".to_string(),
            upserts: vec![upsert("f1", "AUTHORIZED", 0), upsert("f2", "WANTED", 1)],
            deletes: vec!["missing".to_string()],
            count: 2,
        };

        apply_delta(&index, payload());
        let count = index.read().count();
        let hit = index.read().search(&embedding(0), 1).remove(0);

        apply_delta(&index, payload());
        assert_eq!(index.read().count(), count);
        let hit_again = index.read().search(&embedding(0), 1).remove(0);
        assert_eq!(hit.face_id, hit_again.face_id);
        assert!((hit.distance - hit_again.distance).abs() < 1e-6);
    }

    #[test]
    fn index_size_change_is_bounded_by_delta() {
        let index = RwLock::new(FaceIndex::empty());
        apply_delta(
            &index,
            SyncResponse {
                version: "v1".to_string(),
                upserts: vec![upsert("f1", "AUTHORIZED", 0)],
                deletes: vec![],
                count: 1,
            },
        );
        let before = index.read().count() as i64;

        // 2 upserts (one a duplicate of f1) and 1 delete of an absent id:
        // the size may change by at most |U| - |D| = 1.
        apply_delta(
            &index,
            SyncResponse {
                version: "v2".to_string(),
                upserts: vec![upsert("f1", "AUTHORIZED", 0), upsert("f4", "AUTHORIZED", 3)],
                deletes: vec!["ghost".to_string()],
                count: 2,
            },
        );
        let after = index.read().count() as i64;
        assert!(after - before <= 1);
        assert_eq!(after, 2);
    }

    #[test]
    fn invalid_records_are_skipped_not_fatal() {
        let index = RwLock::new(FaceIndex::empty());
        let response = SyncResponse {
            version: "v1".to_string(),
            upserts: vec![upsert("good", "AUTHORIZED", 0), upsert("bad", "UNKNOWN", 1)],
            deletes: vec![],
            count: 2,
        };
        let (applied, _) = apply_delta(&index, response);
        assert_eq!(applied, 1);
        assert_eq!(index.read().count(), 1);
    }

    #[test]
    fn status_label_reflects_history() {
        let mut status = SyncStatus::default();
        assert_eq!(status.label(), "Unknown");
        status.last_sync_time = Some(Utc::now());
        status.last_success = true;
        assert_eq!(status.label(), "Synced");
        status.last_success = false;
        assert_eq!(status.label(), "Error");
    }
}
