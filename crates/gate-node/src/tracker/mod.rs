//! Phase-based multi-face tracker.
//!
//! The tracker's whole purpose is to count people rather than detections:
//! each physical face gets a stable `track_id`, a track moves through
//! TENTATIVE -> CONFIRMED -> RECOGNIZED exactly once, and recognition is
//! only ever attempted on CONFIRMED tracks. The single permitted regression
//! is the swap reset, which reclaims a RECOGNIZED track whose appearance
//! diverged sharply (a different person took over the same screen position
//! before the old track timed out).

mod assignment;

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{BoundingBox, Decision, Detection, Embedding, Identity, Landmarks};
use parking_lot::Mutex;

pub use assignment::{min_cost_assignment, COST_INVALID};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Pairs below this IoU are never matched.
    pub iou_threshold: f32,
    /// Matches required before a track is confirmed.
    pub min_hits: u32,
    /// Removal timeout (frames since last match) for confirmed tracks.
    pub max_age: u32,
    /// Removal timeout for tentative tracks.
    pub tentative_timeout: u32,
    /// Removal timeout for recognized tracks; short, so the position frees
    /// up quickly for the next person.
    pub recognized_timeout: u32,
    /// Weight of embedding distance in the match cost (0 = pure IoU).
    pub embedding_weight: f32,
    /// Hard gate: confirmed tracks reject matches further than this.
    pub max_embedding_distance: f32,
    /// Swap gate: a recognized track resets when a matched detection's
    /// embedding is further than this. Must exceed `max_embedding_distance`.
    pub swap_threshold: f32,
    /// Capacity of the per-track embedding ring.
    pub embedding_history: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        // Defaults assume >= 10 fps; at lower frame rates raise
        // `tentative_timeout` and lower `min_hits` so people are not lost
        // between frames.
        Self {
            iou_threshold: 0.3,
            min_hits: 3,
            max_age: 30,
            tentative_timeout: 3,
            recognized_timeout: 5,
            embedding_weight: 0.3,
            max_embedding_distance: 0.6,
            swap_threshold: 0.7,
            embedding_history: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackPhase {
    Tentative,
    Confirmed,
    Recognized,
}

impl std::fmt::Display for TrackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackPhase::Tentative => write!(f, "TENTATIVE"),
            TrackPhase::Confirmed => write!(f, "CONFIRMED"),
            TrackPhase::Recognized => write!(f, "RECOGNIZED"),
        }
    }
}

/// A tracked face. Owned exclusively by the tracker; external components
/// only ever see [`TrackSnapshot`]s.
#[derive(Debug)]
struct Track {
    track_id: u64,
    bbox: BoundingBox,
    score: f32,
    landmarks: Option<Landmarks>,
    phase: TrackPhase,
    hits: u32,
    age: u32,
    time_since_update: u32,
    embedding: Option<Embedding>,
    embedding_history: VecDeque<Embedding>,
    recognition_attempts: u32,
    identity: Option<Identity>,
    created_at: DateTime<Utc>,
    recognized_at: Option<DateTime<Utc>>,
}

impl Track {
    fn new(track_id: u64, detection: &Detection) -> Self {
        Self {
            track_id,
            bbox: detection.bbox,
            score: detection.score,
            landmarks: detection.landmarks,
            phase: TrackPhase::Tentative,
            hits: 1,
            age: 0,
            time_since_update: 0,
            embedding: None,
            embedding_history: VecDeque::new(),
            recognition_attempts: 0,
            identity: None,
            created_at: Utc::now(),
            recognized_at: None,
        }
    }

    fn recognized(&self) -> bool {
        self.phase == TrackPhase::Recognized
    }

    /// Push an embedding into the ring and recompute the renormalised mean.
    fn absorb_embedding(&mut self, embedding: Embedding, capacity: usize) {
        if self.embedding_history.len() == capacity {
            self.embedding_history.pop_front();
        }
        self.embedding_history.push_back(embedding);
        let contiguous: Vec<Embedding> = self.embedding_history.iter().cloned().collect();
        if let Some(mean) = Embedding::mean(&contiguous) {
            self.embedding = Some(mean);
        }
    }

    fn snapshot(&self) -> TrackSnapshot {
        TrackSnapshot {
            track_id: self.track_id,
            bbox: self.bbox,
            score: self.score,
            landmarks: self.landmarks,
            phase: self.phase,
            hits: self.hits,
            age: self.age,
            time_since_update: self.time_since_update,
            recognition_attempts: self.recognition_attempts,
            identity: self.identity.clone(),
            created_at: self.created_at,
            recognized_at: self.recognized_at,
        }
    }
}

/// Read-only copy of a track's externally relevant state.
#[derive(Debug, Clone)]
pub struct TrackSnapshot {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub score: f32,
    pub landmarks: Option<Landmarks>,
    pub phase: TrackPhase,
    pub hits: u32,
    pub age: u32,
    pub time_since_update: u32,
    pub recognition_attempts: u32,
    pub identity: Option<Identity>,
    pub created_at: DateTime<Utc>,
    pub recognized_at: Option<DateTime<Utc>>,
}

impl TrackSnapshot {
    pub fn recognized(&self) -> bool {
        self.phase == TrackPhase::Recognized
    }
}

/// Lifecycle counters, incremented on transitions only, never per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerStats {
    pub tracks_created: u64,
    pub tracks_confirmed: u64,
    pub tracks_recognized: u64,
    pub authorized_count: u64,
    pub wanted_count: u64,
    pub unknown_count: u64,
    pub swap_resets: u64,
}

pub struct Tracker {
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
    stats: TrackerStats,
}

impl Tracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
            stats: TrackerStats::default(),
        }
    }

    /// Per-frame update. Returns the currently CONFIRMED or RECOGNIZED
    /// tracks.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<TrackSnapshot> {
        for track in &mut self.tracks {
            track.age += 1;
            track.time_since_update += 1;
        }

        let pairs = if detections.is_empty() || self.tracks.is_empty() {
            Vec::new()
        } else {
            let cost = self.cost_matrix(detections);
            min_cost_assignment(&cost)
                .into_iter()
                .filter(|&(d, t)| cost[d][t] <= COST_INVALID / 2.0)
                .collect()
        };

        let mut matched_detections = vec![false; detections.len()];
        for &(d, t) in &pairs {
            matched_detections[d] = true;
            self.apply_match(t, &detections[d]);
        }

        for (d, detection) in detections.iter().enumerate() {
            if !matched_detections[d] {
                let track = Track::new(self.next_id, detection);
                tracing::debug!(track_id = track.track_id, "track created");
                self.next_id += 1;
                self.stats.tracks_created += 1;
                self.tracks.push(track);
            }
        }

        self.remove_dead();
        self.active_tracks()
    }

    /// Hard-gated cost matrix, detections x tracks.
    fn cost_matrix(&self, detections: &[Detection]) -> Vec<Vec<f32>> {
        let w = self.config.embedding_weight;
        detections
            .iter()
            .map(|det| {
                self.tracks
                    .iter()
                    .map(|track| {
                        let iou = det.bbox.iou(&track.bbox);
                        if iou < self.config.iou_threshold {
                            return COST_INVALID;
                        }
                        match (&det.embedding, &track.embedding, track.phase) {
                            // Tentative tracks match on IoU alone.
                            (Some(de), Some(te), phase) if phase != TrackPhase::Tentative => {
                                let dist = de.cosine_distance(te);
                                // The embedding hard gate protects confirmed
                                // tracks from identity bleed. Recognized
                                // tracks stay matchable past the gate so the
                                // swap reset can reclaim them.
                                if phase == TrackPhase::Confirmed
                                    && dist > self.config.max_embedding_distance
                                {
                                    return COST_INVALID;
                                }
                                (1.0 - w) * (1.0 - iou) + w * dist
                            }
                            _ => 1.0 - iou,
                        }
                    })
                    .collect()
            })
            .collect()
    }

    fn apply_match(&mut self, track_idx: usize, detection: &Detection) {
        let capacity = self.config.embedding_history;
        let swap_threshold = self.config.swap_threshold;
        let max_embedding_distance = self.config.max_embedding_distance;
        let min_hits = self.config.min_hits;

        let mut swap_reset = false;
        let mut promoted = false;

        let track = &mut self.tracks[track_idx];
        track.bbox = detection.bbox;
        track.score = detection.score;
        if detection.landmarks.is_some() {
            track.landmarks = detection.landmarks;
        }
        track.hits += 1;
        track.time_since_update = 0;

        if let Some(new_embedding) = &detection.embedding {
            match track.phase {
                TrackPhase::Recognized => {
                    let stored_distance = track
                        .embedding
                        .as_ref()
                        .map(|stored| stored.cosine_distance(new_embedding));
                    match stored_distance {
                        Some(dist) if dist > swap_threshold => {
                            // A different person took over this position
                            // before the old track timed out.
                            tracing::info!(
                                track_id = track.track_id,
                                distance = dist,
                                "appearance swap detected, resetting track"
                            );
                            track.phase = TrackPhase::Confirmed;
                            track.identity = None;
                            track.recognized_at = None;
                            track.recognition_attempts = 0;
                            track.embedding = None;
                            track.embedding_history.clear();
                            track.absorb_embedding(new_embedding.clone(), capacity);
                            swap_reset = true;
                        }
                        Some(dist) if dist <= max_embedding_distance => {
                            track.absorb_embedding(new_embedding.clone(), capacity);
                        }
                        // Drift between the match and swap gates: keep the
                        // track but do not contaminate the mean.
                        Some(_) => {}
                        None => track.absorb_embedding(new_embedding.clone(), capacity),
                    }
                }
                TrackPhase::Confirmed => {
                    track.absorb_embedding(new_embedding.clone(), capacity);
                }
                TrackPhase::Tentative => {}
            }
        }

        if track.phase == TrackPhase::Tentative && track.hits >= min_hits {
            track.phase = TrackPhase::Confirmed;
            if let Some(embedding) = &detection.embedding {
                track.absorb_embedding(embedding.clone(), capacity);
            }
            tracing::debug!(track_id = track.track_id, hits = track.hits, "track confirmed");
            promoted = true;
        }

        if swap_reset {
            self.stats.swap_resets += 1;
        }
        if promoted {
            self.stats.tracks_confirmed += 1;
        }
    }

    fn remove_dead(&mut self) {
        let config = &self.config;
        self.tracks.retain(|track| {
            let timeout = match track.phase {
                TrackPhase::Tentative => config.tentative_timeout,
                TrackPhase::Confirmed => config.max_age,
                TrackPhase::Recognized => config.recognized_timeout,
            };
            let keep = track.time_since_update <= timeout;
            if !keep {
                tracing::debug!(
                    track_id = track.track_id,
                    phase = %track.phase,
                    time_since_update = track.time_since_update,
                    "track removed"
                );
            }
            keep
        });
    }

    /// CONFIRMED tracks awaiting their one recognition.
    pub fn tracks_ready_for_recognition(&self) -> Vec<TrackSnapshot> {
        self.tracks
            .iter()
            .filter(|t| t.phase == TrackPhase::Confirmed)
            .map(Track::snapshot)
            .collect()
    }

    /// CONFIRMED and RECOGNIZED tracks.
    pub fn active_tracks(&self) -> Vec<TrackSnapshot> {
        self.tracks
            .iter()
            .filter(|t| t.phase != TrackPhase::Tentative)
            .map(Track::snapshot)
            .collect()
    }

    /// Every live track, tentative ones included (UI pending markers).
    pub fn all_tracks(&self) -> Vec<TrackSnapshot> {
        self.tracks.iter().map(Track::snapshot).collect()
    }

    pub fn get(&self, track_id: u64) -> Option<TrackSnapshot> {
        self.tracks.iter().find(|t| t.track_id == track_id).map(Track::snapshot)
    }

    /// Complete recognition for a track. Refused (returns false) when the
    /// track no longer exists or is already recognized, which makes the
    /// call idempotent under racing workers.
    pub fn mark_recognized(
        &mut self,
        track_id: u64,
        identity: Identity,
        embedding: Option<Embedding>,
    ) -> bool {
        let capacity = self.config.embedding_history;
        let Some(track) = self.tracks.iter_mut().find(|t| t.track_id == track_id) else {
            return false;
        };
        if track.recognized() {
            return false;
        }

        let status = identity.status;
        track.phase = TrackPhase::Recognized;
        track.identity = Some(identity);
        track.recognized_at = Some(Utc::now());
        track.recognition_attempts += 1;
        if let Some(embedding) = embedding {
            track.absorb_embedding(embedding, capacity);
        }

        self.stats.tracks_recognized += 1;
        match status {
            Decision::Authorized => self.stats.authorized_count += 1,
            Decision::Wanted => self.stats.wanted_count += 1,
            Decision::Unknown => self.stats.unknown_count += 1,
        }
        tracing::info!(track_id, status = %status, "track recognized");
        true
    }

    /// Count one failed recognition attempt. Returns the new attempt count,
    /// or None when the track is gone.
    pub fn record_attempt(&mut self, track_id: u64) -> Option<u32> {
        let track = self.tracks.iter_mut().find(|t| t.track_id == track_id)?;
        track.recognition_attempts += 1;
        Some(track.recognition_attempts)
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }
}

/// Thread-safe handle: the main loop calls `update`, recognition workers
/// reach back through the narrow mark/record API. All calls serialise on
/// the internal lock.
#[derive(Clone)]
pub struct SharedTracker(Arc<Mutex<Tracker>>);

impl SharedTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self(Arc::new(Mutex::new(Tracker::new(config))))
    }

    pub fn update(&self, detections: &[Detection]) -> Vec<TrackSnapshot> {
        self.0.lock().update(detections)
    }

    pub fn tracks_ready_for_recognition(&self) -> Vec<TrackSnapshot> {
        self.0.lock().tracks_ready_for_recognition()
    }

    pub fn active_tracks(&self) -> Vec<TrackSnapshot> {
        self.0.lock().active_tracks()
    }

    pub fn all_tracks(&self) -> Vec<TrackSnapshot> {
        self.0.lock().all_tracks()
    }

    pub fn get(&self, track_id: u64) -> Option<TrackSnapshot> {
        self.0.lock().get(track_id)
    }

    pub fn mark_recognized(&self, track_id: u64, identity: Identity, embedding: Option<Embedding>) -> bool {
        self.0.lock().mark_recognized(track_id, identity, embedding)
    }

    pub fn record_attempt(&self, track_id: u64) -> Option<u32> {
        self.0.lock().record_attempt(track_id)
    }

    pub fn stats(&self) -> TrackerStats {
        self.0.lock().stats()
    }
}
