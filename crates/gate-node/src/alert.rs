//! Multi-subject alert state.
//!
//! Alerts are keyed by track id: one person lingering at the gate is one
//! alert, however many frames they appear in. Entries expire after their
//! display duration; a short per-track cooldown stops an expired alert
//! from instantly reappearing for the same track.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{BoundingBox, Decision, Frame};
use image::RgbImage;
use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct AlertEntry {
    pub track_id: u64,
    /// WANTED or UNKNOWN; AUTHORIZED entries are never alerted.
    pub status: Decision,
    pub name: Option<String>,
    pub confidence: f32,
    pub crop: Option<RgbImage>,
    pub first_shown_at: Instant,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub wanted_duration: Duration,
    pub unknown_duration: Duration,
    /// Re-insert suppression per track.
    pub cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            wanted_duration: Duration::from_secs(60),
            unknown_duration: Duration::from_secs(60),
            cooldown: Duration::from_secs(3),
        }
    }
}

/// Status line shown on the idle dashboard.
#[derive(Debug, Clone)]
pub struct SystemStatus {
    pub face_count: usize,
    pub sync_status: String,
    pub gate_state: String,
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            face_count: 0,
            sync_status: "Unknown".to_string(),
            gate_state: "CLOSED".to_string(),
        }
    }
}

struct AlertState {
    entries: HashMap<u64, AlertEntry>,
    last_shown: HashMap<u64, Instant>,
    system: SystemStatus,
}

/// Shared alert set; recognition workers insert, the UI thread reads.
#[derive(Clone)]
pub struct AlertCenter {
    config: AlertConfig,
    state: Arc<Mutex<AlertState>>,
}

impl AlertCenter {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(AlertState {
                entries: HashMap::new(),
                last_shown: HashMap::new(),
                system: SystemStatus::default(),
            })),
        }
    }

    fn duration_for(&self, status: Decision) -> Duration {
        match status {
            Decision::Wanted => self.config.wanted_duration,
            _ => self.config.unknown_duration,
        }
    }

    /// Insert or refresh an alert. Returns false when suppressed by the
    /// per-track cooldown.
    pub fn show_alert(
        &self,
        track_id: u64,
        status: Decision,
        name: Option<String>,
        confidence: f32,
        crop: Option<RgbImage>,
    ) -> bool {
        let mut state = self.state.lock();
        let now = Instant::now();

        if let Some(entry) = state.entries.get_mut(&track_id) {
            entry.status = status;
            entry.name = name;
            entry.confidence = confidence;
            if crop.is_some() {
                entry.crop = crop;
            }
            return true;
        }

        if let Some(last) = state.last_shown.get(&track_id) {
            if now.duration_since(*last) < self.config.cooldown {
                tracing::debug!(track_id, "alert suppressed by per-track cooldown");
                return false;
            }
        }

        tracing::info!(track_id, status = %status, "alert shown");
        state.last_shown.insert(track_id, now);
        state.entries.insert(
            track_id,
            AlertEntry {
                track_id,
                status,
                name,
                confidence,
                crop,
                first_shown_at: now,
            },
        );
        true
    }

    /// Drop expired entries and stale cooldown bookkeeping.
    pub fn expire(&self) {
        let mut state = self.state.lock();
        let now = Instant::now();
        let config = &self.config;
        state.entries.retain(|track_id, entry| {
            let ttl = match entry.status {
                Decision::Wanted => config.wanted_duration,
                _ => config.unknown_duration,
            };
            let keep = now.duration_since(entry.first_shown_at) < ttl;
            if !keep {
                tracing::debug!(track_id = *track_id, "alert expired");
            }
            keep
        });
        let horizon = config.cooldown * 4;
        state.last_shown.retain(|_, t| now.duration_since(*t) < horizon);
    }

    /// Active alerts, WANTED before UNKNOWN, oldest first within a status.
    pub fn active_alerts(&self) -> Vec<AlertEntry> {
        let state = self.state.lock();
        let mut alerts: Vec<AlertEntry> = state.entries.values().cloned().collect();
        alerts.sort_by(|a, b| {
            let rank = |s: Decision| if s == Decision::Wanted { 0 } else { 1 };
            rank(a.status)
                .cmp(&rank(b.status))
                .then(a.first_shown_at.cmp(&b.first_shown_at))
        });
        alerts
    }

    /// Fraction of an alert's display time remaining, in [0, 1]; drives the
    /// diminishing progress bar.
    pub fn remaining_fraction(&self, entry: &AlertEntry) -> f32 {
        let ttl = self.duration_for(entry.status);
        let elapsed = entry.first_shown_at.elapsed();
        if elapsed >= ttl {
            return 0.0;
        }
        1.0 - elapsed.as_secs_f32() / ttl.as_secs_f32()
    }

    pub fn set_system_status(&self, face_count: usize, sync_status: String, gate_state: String) {
        let mut state = self.state.lock();
        state.system = SystemStatus {
            face_count,
            sync_status,
            gate_state,
        };
    }

    pub fn system_status(&self) -> SystemStatus {
        self.state.lock().system.clone()
    }
}

/// Face crop for alert cells and audit rows: bbox with a small margin,
/// clamped to the frame.
pub fn crop_face(frame: &Frame, bbox: &BoundingBox) -> Option<RgbImage> {
    let padded = bbox.expanded(10.0).clamped(frame.width(), frame.height());
    let (w, h) = (padded.width() as u32, padded.height() as u32);
    if w == 0 || h == 0 {
        return None;
    }
    Some(image::imageops::crop_imm(frame.image(), padded.x1 as u32, padded.y1 as u32, w, h).to_image())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn center(wanted_ms: u64, unknown_ms: u64, cooldown_ms: u64) -> AlertCenter {
        AlertCenter::new(AlertConfig {
            wanted_duration: Duration::from_millis(wanted_ms),
            unknown_duration: Duration::from_millis(unknown_ms),
            cooldown: Duration::from_millis(cooldown_ms),
        })
    }

    #[test]
    fn insert_refresh_and_read_back() {
        let alerts = center(60_000, 60_000, 3_000);
        assert!(alerts.show_alert(1, Decision::Unknown, None, 0.0, None));
        // Same track again: refresh, not a duplicate.
        assert!(alerts.show_alert(1, Decision::Unknown, Some("update".into()), 0.4, None));

        let active = alerts.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].name.as_deref(), Some("update"));
    }

    #[test]
    fn wanted_sorts_before_unknown() {
        let alerts = center(60_000, 60_000, 0);
        alerts.show_alert(1, Decision::Unknown, None, 0.0, None);
        alerts.show_alert(2, Decision::Wanted, Some("Kai Novak".into()), 0.8, None);
        alerts.show_alert(3, Decision::Unknown, None, 0.0, None);

        let active = alerts.active_alerts();
        assert_eq!(active[0].track_id, 2);
        assert_eq!(active[0].status, Decision::Wanted);
    }

    #[test]
    fn entries_expire_after_their_duration() {
        let alerts = center(60_000, 30, 0);
        alerts.show_alert(1, Decision::Unknown, None, 0.0, None);
        std::thread::sleep(Duration::from_millis(60));
        alerts.expire();
        assert!(alerts.active_alerts().is_empty());
    }

    #[test]
    fn cooldown_blocks_reinsert_after_expiry() {
        let alerts = center(60_000, 20, 5_000);
        assert!(alerts.show_alert(1, Decision::Unknown, None, 0.0, None));
        std::thread::sleep(Duration::from_millis(40));
        alerts.expire();
        assert!(alerts.active_alerts().is_empty());
        // Still cooling down: the same track cannot alert again yet.
        assert!(!alerts.show_alert(1, Decision::Unknown, None, 0.0, None));
        // A different track is unaffected.
        assert!(alerts.show_alert(2, Decision::Unknown, None, 0.0, None));
    }

    #[test]
    fn progress_fraction_diminishes() {
        let alerts = center(60_000, 100, 0);
        alerts.show_alert(1, Decision::Unknown, None, 0.0, None);
        let entry = alerts.active_alerts().remove(0);
        let early = alerts.remaining_fraction(&entry);
        std::thread::sleep(Duration::from_millis(50));
        let later = alerts.remaining_fraction(&entry);
        assert!(early > later);
        std::thread::sleep(Duration::from_millis(80));
        assert_eq!(alerts.remaining_fraction(&entry), 0.0);
    }

    #[test]
    fn system_status_round_trip() {
        let alerts = center(1, 1, 1);
        alerts.set_system_status(42, "Synced".into(), "OPEN".into());
        let status = alerts.system_status();
        assert_eq!(status.face_count, 42);
        assert_eq!(status.sync_status, "Synced");
        assert_eq!(status.gate_state, "OPEN");
    }
}
