//! Recognition dispatcher: at-most-once recognition per track on a small
//! worker pool.
//!
//! The main loop hands over CONFIRMED tracks; a pending set guarantees one
//! in-flight job per track, and the tracker's refusal semantics guarantee
//! one completed recognition per track even if that ever raced. A
//! saturated pool defers work to the next frame instead of blocking.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use common::{AccessEvent, Decision, Embedding, Frame, Identity};
use crossbeam_channel::{bounded, Sender, TrySendError};
use face_index::FaceIndex;
use parking_lot::{Mutex, RwLock};
use vision::{align_face, align_from_bbox, FaceEmbedder};

use crate::access_log::{encode_face_crop, AccessLogger};
use crate::alarm::{AlarmKind, AlarmSystem};
use crate::alert::{crop_face, AlertCenter};
use crate::decision::DecisionEngine;
use crate::gate::GateController;
use crate::tracker::{SharedTracker, TrackSnapshot};

/// Fallback crop margin when landmarks are unavailable.
const BBOX_ALIGN_MARGIN: f32 = 0.1;

/// Everything a worker needs to finish a recognition end to end.
pub struct RecognitionContext {
    pub tracker: SharedTracker,
    pub embedder: Arc<dyn FaceEmbedder>,
    pub index: Arc<RwLock<FaceIndex>>,
    pub decision: DecisionEngine,
    pub gate: GateController,
    pub log: Arc<AccessLogger>,
    pub alerts: AlertCenter,
    pub alarm: AlarmSystem,
    pub gate_id: String,
    pub max_attempts: u32,
}

struct RecognitionJob {
    track_id: u64,
    frame: Frame,
    snapshot: TrackSnapshot,
}

pub struct RecognitionDispatcher {
    tx: Option<Sender<RecognitionJob>>,
    pending: Arc<Mutex<HashSet<u64>>>,
    last_attempt: Arc<Mutex<HashMap<u64, Instant>>>,
    attempt_interval: Duration,
    bookkeeping_ttl: Duration,
    workers: Vec<JoinHandle<()>>,
}

impl RecognitionDispatcher {
    pub fn start(
        ctx: RecognitionContext,
        workers: usize,
        attempt_interval: Duration,
        bookkeeping_ttl: Duration,
    ) -> Result<Self> {
        let (tx, rx) = bounded::<RecognitionJob>(workers * 2);
        let ctx = Arc::new(ctx);
        let pending: Arc<Mutex<HashSet<u64>>> = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let rx = rx.clone();
            let ctx = Arc::clone(&ctx);
            let pending = Arc::clone(&pending);
            let handle = std::thread::Builder::new()
                .name(format!("recognize-{worker_id}"))
                .spawn(move || {
                    for job in rx.iter() {
                        let track_id = job.track_id;
                        process_job(&ctx, job);
                        pending.lock().remove(&track_id);
                    }
                    tracing::debug!(worker_id, "recognition worker stopped");
                })
                .context("spawning recognition worker")?;
            handles.push(handle);
        }

        Ok(Self {
            tx: Some(tx),
            pending,
            last_attempt: Arc::new(Mutex::new(HashMap::new())),
            attempt_interval,
            bookkeeping_ttl,
            workers: handles,
        })
    }

    /// Submit recognition jobs for tracks that are ready. Tracks already in
    /// flight, attempted too recently, or beyond pool capacity are skipped;
    /// they come back on the next frame. Returns the number submitted.
    pub fn dispatch(&self, ready: &[TrackSnapshot], frame: &Frame) -> usize {
        let Some(tx) = &self.tx else { return 0 };
        let now = Instant::now();
        let mut submitted = 0;

        for track in ready {
            {
                let pending = self.pending.lock();
                if pending.contains(&track.track_id) {
                    continue;
                }
            }
            {
                let last = self.last_attempt.lock();
                if let Some(t) = last.get(&track.track_id) {
                    if now.duration_since(*t) < self.attempt_interval {
                        continue;
                    }
                }
            }

            let job = RecognitionJob {
                track_id: track.track_id,
                frame: frame.clone(),
                snapshot: track.clone(),
            };
            match tx.try_send(job) {
                Ok(()) => {
                    self.pending.lock().insert(track.track_id);
                    self.last_attempt.lock().insert(track.track_id, now);
                    submitted += 1;
                }
                Err(TrySendError::Full(_)) => {
                    tracing::debug!("recognition pool saturated, deferring");
                    break;
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
        submitted
    }

    /// Drop attempt bookkeeping for tracks that no longer exist once the
    /// track cooldown has passed.
    pub fn prune(&self, live_track_ids: &HashSet<u64>) {
        let now = Instant::now();
        let ttl = self.bookkeeping_ttl;
        self.last_attempt
            .lock()
            .retain(|id, t| live_track_ids.contains(id) || now.duration_since(*t) < ttl);
    }

    /// Close the queue and join the workers.
    pub fn shutdown(mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        tracing::info!("recognition pool stopped");
    }
}

fn process_job(ctx: &RecognitionContext, job: RecognitionJob) {
    // The track may have died while the job sat in the queue.
    if ctx.tracker.get(job.track_id).is_none() {
        tracing::debug!(track_id = job.track_id, "track gone, result discarded");
        return;
    }

    let aligned = match &job.snapshot.landmarks {
        Some(landmarks) => align_face(job.frame.image(), landmarks)
            .unwrap_or_else(|| align_from_bbox(job.frame.image(), &job.snapshot.bbox, BBOX_ALIGN_MARGIN)),
        None => align_from_bbox(job.frame.image(), &job.snapshot.bbox, BBOX_ALIGN_MARGIN),
    };
    if !aligned.aligned {
        tracing::debug!(track_id = job.track_id, "recognizing from bbox crop, accuracy degraded");
    }

    let embedding = match ctx.embedder.embed(&aligned.image) {
        Ok(embedding) => embedding,
        Err(e) => {
            tracing::warn!(track_id = job.track_id, error = %e, "embedding failed");
            attempt_failed(ctx, &job, None);
            return;
        }
    };

    let hit = {
        let index = ctx.index.read();
        index.search(&embedding, 1).into_iter().next()
    };

    match hit {
        Some(hit) => {
            let confidence = 1.0 - hit.distance;
            let decision = ctx.decision.decide(Some((hit.meta.status, confidence)));
            match decision {
                Decision::Authorized | Decision::Wanted => {
                    let identity = Identity {
                        face_id: Some(hit.face_id),
                        person_id: hit.meta.person_id,
                        full_name: Some(hit.meta.full_name),
                        status: decision,
                        confidence,
                    };
                    complete_recognition(ctx, &job, identity, embedding);
                }
                Decision::Unknown => attempt_failed(ctx, &job, Some(embedding)),
            }
        }
        None => attempt_failed(ctx, &job, Some(embedding)),
    }
}

/// A successful match: mark the track, drive the gate, write the audit row,
/// alert and alarm for WANTED.
fn complete_recognition(ctx: &RecognitionContext, job: &RecognitionJob, identity: Identity, embedding: Embedding) {
    let decision = identity.status;
    let confidence = identity.confidence;
    let name = identity.full_name.clone();
    let person_id = identity.person_id.clone();
    let face_id = identity.face_id.clone();

    if !ctx.tracker.mark_recognized(job.track_id, identity, Some(embedding)) {
        // Another worker or a swap reset beat us; never act twice.
        tracing::debug!(track_id = job.track_id, "mark_recognized refused, dropping result");
        return;
    }

    ctx.gate.open(decision, person_id.as_deref(), job.track_id, confidence);

    let event = AccessEvent {
        id: None,
        timestamp: common::time::utc_timestamp(),
        gate_id: ctx.gate_id.clone(),
        track_id: job.track_id,
        face_id,
        person_id,
        name: name.clone(),
        status: decision,
        decision: decision.gate_action(),
        confidence,
        face_crop_b64: encode_face_crop(&job.frame, &job.snapshot.bbox),
        synced: false,
    };
    if let Err(e) = ctx.log.log_event(&event) {
        tracing::error!(error = %e, "failed to write access event");
    }

    if decision == Decision::Wanted {
        ctx.alerts.show_alert(
            job.track_id,
            Decision::Wanted,
            name.clone(),
            confidence,
            crop_face(&job.frame, &job.snapshot.bbox),
        );
        ctx.alarm.trigger(AlarmKind::Wanted, name.as_deref());
    }
}

/// A miss (no record, low confidence, or inference failure). Counts one
/// attempt; the final attempt terminally marks the track UNKNOWN.
fn attempt_failed(ctx: &RecognitionContext, job: &RecognitionJob, embedding: Option<Embedding>) {
    let Some(attempts) = ctx.tracker.record_attempt(job.track_id) else {
        return;
    };
    if attempts < ctx.max_attempts {
        tracing::debug!(track_id = job.track_id, attempts, "no match yet");
        return;
    }

    if !ctx.tracker.mark_recognized(job.track_id, Identity::unknown(), embedding) {
        return;
    }
    tracing::info!(track_id = job.track_id, attempts, "marked UNKNOWN after max attempts");

    ctx.gate.reject(job.track_id);

    let event = AccessEvent {
        id: None,
        timestamp: common::time::utc_timestamp(),
        gate_id: ctx.gate_id.clone(),
        track_id: job.track_id,
        face_id: None,
        person_id: None,
        name: None,
        status: Decision::Unknown,
        decision: common::GateAction::Close,
        confidence: 0.0,
        face_crop_b64: encode_face_crop(&job.frame, &job.snapshot.bbox),
        synced: false,
    };
    if let Err(e) = ctx.log.log_event(&event) {
        tracing::error!(error = %e, "failed to write access event");
    }

    ctx.alerts.show_alert(
        job.track_id,
        Decision::Unknown,
        None,
        0.0,
        crop_face(&job.frame, &job.snapshot.bbox),
    );
    ctx.alarm.trigger(AlarmKind::Unknown, None);
}
