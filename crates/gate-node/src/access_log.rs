//! Append-only access log in a local SQLite database.
//!
//! Every decision writes exactly one row, synchronously, so the audit
//! trail survives power loss and full network outages. A background upload
//! loop drains rows with `synced = 0`; a retention job prunes old rows that
//! have already been shipped.

use std::path::Path;

use anyhow::{Context, Result};
use base64::Engine;
use common::{AccessEvent, BoundingBox, Decision, Frame, GateAction};
use parking_lot::Mutex;
use rusqlite::{params, Connection, Row};

/// Pixel margin added around the face bbox before encoding the audit crop.
const CROP_MARGIN: f32 = 20.0;
const CROP_JPEG_QUALITY: u8 = 85;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogStats {
    pub total_events: u64,
    pub unsynced_events: u64,
    pub authorized: u64,
    pub wanted: u64,
    pub unknown: u64,
    pub today: u64,
}

pub struct AccessLogger {
    conn: Mutex<Connection>,
}

impl AccessLogger {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating log directory {}", dir.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("opening access log at {}", path.display()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS access_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                gate_id TEXT NOT NULL,
                track_id INTEGER NOT NULL,
                face_id TEXT,
                user_id TEXT,
                name TEXT,
                status TEXT NOT NULL,
                decision TEXT NOT NULL,
                confidence REAL NOT NULL,
                face_crop_b64 TEXT,
                synced INTEGER DEFAULT 0,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            CREATE INDEX IF NOT EXISTS idx_timestamp ON access_events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_synced ON access_events(synced);
            CREATE INDEX IF NOT EXISTS idx_status ON access_events(status);
            "#,
        )
        .context("initializing access log schema")?;

        tracing::info!(path = %path.display(), "access log opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Append one event; returns its row id.
    pub fn log_event(&self, event: &AccessEvent) -> Result<i64> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
            INSERT INTO access_events
                (timestamp, gate_id, track_id, face_id, user_id, name, status, decision, confidence, face_crop_b64, synced)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0)
            "#,
            params![
                event.timestamp,
                event.gate_id,
                event.track_id as i64,
                event.face_id,
                event.person_id,
                event.name,
                event.status.to_string(),
                event.decision.to_string(),
                event.confidence as f64,
                event.face_crop_b64,
            ],
        )
        .context("inserting access event")?;
        let id = conn.last_insert_rowid();
        tracing::info!(event_id = id, status = %event.status, decision = %event.decision, "access event logged");
        Ok(id)
    }

    /// Oldest-first batch of rows not yet shipped to the backend.
    pub fn unsynced(&self, limit: usize) -> Result<Vec<AccessEvent>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, timestamp, gate_id, track_id, face_id, user_id, name,
                   status, decision, confidence, face_crop_b64, synced
            FROM access_events
            WHERE synced = 0
            ORDER BY timestamp ASC
            LIMIT ?1
            "#,
        )?;
        let events = stmt
            .query_map(params![limit as i64], row_to_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }

    pub fn mark_synced(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("UPDATE access_events SET synced = 1 WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        stmt.execute(rusqlite::params_from_iter(ids.iter()))?;
        tracing::debug!(count = ids.len(), "access events marked synced");
        Ok(())
    }

    /// Most recent rows, optionally filtered by status.
    pub fn recent(&self, limit: usize, status: Option<Decision>) -> Result<Vec<AccessEvent>> {
        let conn = self.conn.lock();
        let events = match status {
            Some(status) => {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, timestamp, gate_id, track_id, face_id, user_id, name,
                           status, decision, confidence, face_crop_b64, synced
                    FROM access_events
                    WHERE status = ?1
                    ORDER BY timestamp DESC
                    LIMIT ?2
                    "#,
                )?;
                stmt.query_map(params![status.to_string(), limit as i64], row_to_event)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
            None => {
                let mut stmt = conn.prepare(
                    r#"
                    SELECT id, timestamp, gate_id, track_id, face_id, user_id, name,
                           status, decision, confidence, face_crop_b64, synced
                    FROM access_events
                    ORDER BY timestamp DESC
                    LIMIT ?1
                    "#,
                )?;
                stmt.query_map(params![limit as i64], row_to_event)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            }
        };
        Ok(events)
    }

    pub fn stats(&self) -> Result<LogStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as u64)
        };
        Ok(LogStats {
            total_events: count("SELECT COUNT(*) FROM access_events")?,
            unsynced_events: count("SELECT COUNT(*) FROM access_events WHERE synced = 0")?,
            authorized: count("SELECT COUNT(*) FROM access_events WHERE status = 'AUTHORIZED'")?,
            wanted: count("SELECT COUNT(*) FROM access_events WHERE status = 'WANTED'")?,
            unknown: count("SELECT COUNT(*) FROM access_events WHERE status = 'UNKNOWN'")?,
            today: count("SELECT COUNT(*) FROM access_events WHERE date(timestamp) = date('now')")?,
        })
    }

    /// Delete already-synced rows older than `days`. Returns rows removed.
    pub fn prune_synced_older_than(&self, days: u32) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            r#"
            DELETE FROM access_events
            WHERE synced = 1
              AND datetime(timestamp) < datetime('now', ?1)
            "#,
            params![format!("-{days} days")],
        )?;
        if removed > 0 {
            tracing::info!(removed, days, "old access events pruned");
        }
        Ok(removed)
    }
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<AccessEvent> {
    Ok(AccessEvent {
        id: Some(row.get(0)?),
        timestamp: row.get(1)?,
        gate_id: row.get(2)?,
        track_id: row.get::<_, i64>(3)? as u64,
        face_id: row.get(4)?,
        person_id: row.get(5)?,
        name: row.get(6)?,
        status: row.get::<_, String>(7)?.parse().unwrap_or(Decision::Unknown),
        decision: row.get::<_, String>(8)?.parse().unwrap_or(GateAction::Close),
        confidence: row.get::<_, f64>(9)? as f32,
        face_crop_b64: row.get(10)?,
        synced: row.get::<_, i64>(11)? != 0,
    })
}

/// Margin-padded JPEG crop of the decisive face, base64 encoded for the
/// event row. `None` when the crop would be empty or encoding fails.
pub fn encode_face_crop(frame: &Frame, bbox: &BoundingBox) -> Option<String> {
    let padded = bbox.expanded(CROP_MARGIN).clamped(frame.width(), frame.height());
    let (w, h) = (padded.width() as u32, padded.height() as u32);
    if w == 0 || h == 0 {
        return None;
    }

    let crop = image::imageops::crop_imm(frame.image(), padded.x1 as u32, padded.y1 as u32, w, h)
        .to_image();

    let mut jpeg = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, CROP_JPEG_QUALITY);
    if let Err(e) = crop.write_with_encoder(encoder) {
        tracing::warn!(error = %e, "failed to encode face crop");
        return None;
    }
    Some(base64::engine::general_purpose::STANDARD.encode(jpeg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::time::utc_timestamp;
    use image::RgbImage;

    fn event(status: Decision, decision: GateAction) -> AccessEvent {
        AccessEvent {
            id: None,
            timestamp: utc_timestamp(),
            gate_id: "gate-001".to_string(),
            track_id: 1,
            face_id: Some("f-1".to_string()),
            person_id: Some("p-1".to_string()),
            name: Some("Amina Diallo".to_string()),
            status,
            decision,
            confidence: 0.8,
            face_crop_b64: None,
            synced: false,
        }
    }

    fn logger() -> (AccessLogger, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLogger::open(&dir.path().join("logs.db")).unwrap();
        (log, dir)
    }

    #[test]
    fn log_and_read_back() {
        let (log, _dir) = logger();
        let id = log.log_event(&event(Decision::Authorized, GateAction::Open)).unwrap();
        assert!(id > 0);

        let recent = log.recent(10, None).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, Some(id));
        assert_eq!(recent[0].status, Decision::Authorized);
        assert_eq!(recent[0].decision, GateAction::Open);
        assert!(!recent[0].synced);
    }

    #[test]
    fn unsynced_batch_and_mark_synced() {
        let (log, _dir) = logger();
        let a = log.log_event(&event(Decision::Unknown, GateAction::Close)).unwrap();
        let b = log.log_event(&event(Decision::Authorized, GateAction::Open)).unwrap();

        let unsynced = log.unsynced(50).unwrap();
        assert_eq!(unsynced.len(), 2);

        log.mark_synced(&[a]).unwrap();
        let unsynced = log.unsynced(50).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, Some(b));

        assert_eq!(log.stats().unwrap().unsynced_events, 1);
    }

    #[test]
    fn recent_filters_by_status() {
        let (log, _dir) = logger();
        log.log_event(&event(Decision::Unknown, GateAction::Close)).unwrap();
        log.log_event(&event(Decision::Wanted, GateAction::Open)).unwrap();

        let wanted = log.recent(10, Some(Decision::Wanted)).unwrap();
        assert_eq!(wanted.len(), 1);
        assert_eq!(wanted[0].status, Decision::Wanted);
    }

    #[test]
    fn retention_prunes_only_synced_rows() {
        let (log, _dir) = logger();
        let mut old = event(Decision::Authorized, GateAction::Open);
        old.timestamp = "2020-01-01T00:00:00.000Z".to_string();
        let old_synced = log.log_event(&old).unwrap();
        let old_unsynced = log.log_event(&old).unwrap();
        log.log_event(&event(Decision::Authorized, GateAction::Open)).unwrap();

        log.mark_synced(&[old_synced]).unwrap();
        let removed = log.prune_synced_older_than(30).unwrap();
        assert_eq!(removed, 1);

        let remaining = log.recent(10, None).unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|e| e.id == Some(old_unsynced)));
    }

    #[test]
    fn stats_count_by_status() {
        let (log, _dir) = logger();
        log.log_event(&event(Decision::Authorized, GateAction::Open)).unwrap();
        log.log_event(&event(Decision::Unknown, GateAction::Close)).unwrap();
        log.log_event(&event(Decision::Unknown, GateAction::Close)).unwrap();

        let stats = log.stats().unwrap();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.authorized, 1);
        assert_eq!(stats.unknown, 2);
        assert_eq!(stats.today, 3);
    }

    #[test]
    fn face_crop_encodes_for_valid_bbox() {
        let frame = Frame::new(RgbImage::from_pixel(320, 240, image::Rgb([128, 64, 32])), 0);
        let crop = encode_face_crop(&frame, &BoundingBox::new(100.0, 80.0, 180.0, 170.0));
        assert!(crop.is_some());
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(crop.unwrap())
            .unwrap();
        // JPEG magic bytes.
        assert_eq!(&decoded[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn face_crop_empty_for_degenerate_bbox() {
        let frame = Frame::new(RgbImage::new(320, 240), 0);
        // Fully outside the frame after clamping.
        assert!(encode_face_crop(&frame, &BoundingBox::new(400.0, 300.0, 500.0, 400.0)).is_none());
    }
}
