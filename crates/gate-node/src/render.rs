//! Canvas composition for the three display modes.
//!
//! Rendering is pure: state in, `RgbImage` out. The UI thread decides what
//! to render and where the canvas goes (terminal preview, headless log).
//! Text needs a font file from the host; when none is available the
//! renderer still paints boxes, bars and markers, just without labels.

use ab_glyph::{FontVec, PxScale};
use chrono::Local;
use common::Decision;
use common::Frame;
use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut,
};
use imageproc::rect::Rect;

use crate::alert::{AlertCenter, AlertEntry, SystemStatus};
use crate::tracker::{TrackPhase, TrackSnapshot};

const BACKGROUND: Rgb<u8> = Rgb([16, 18, 24]);
const PANEL: Rgb<u8> = Rgb([28, 32, 42]);
const TEXT: Rgb<u8> = Rgb([220, 224, 232]);
const TEXT_DIM: Rgb<u8> = Rgb([140, 146, 158]);
const WANTED_RED: Rgb<u8> = Rgb([214, 48, 49]);
const UNKNOWN_AMBER: Rgb<u8> = Rgb([225, 160, 40]);
const AUTHORIZED_GREEN: Rgb<u8> = Rgb([46, 184, 92]);
const PENDING_GRAY: Rgb<u8> = Rgb([150, 150, 150]);

/// Colour conventions shared by alert cells and live overlays.
pub fn status_color(status: Decision) -> Rgb<u8> {
    match status {
        Decision::Wanted => WANTED_RED,
        Decision::Unknown => UNKNOWN_AMBER,
        Decision::Authorized => AUTHORIZED_GREEN,
    }
}

pub struct Renderer {
    width: u32,
    height: u32,
    font: Option<FontVec>,
}

impl Renderer {
    pub fn new(width: u32, height: u32, font_path: &str) -> Self {
        let font = match std::fs::read(font_path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(font_path, error = %e, "font unusable, rendering without labels");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(font_path, error = %e, "font not found, rendering without labels");
                None
            }
        };
        Self {
            width,
            height,
            font,
        }
    }

    fn text(&self, canvas: &mut RgbImage, text: &str, x: i32, y: i32, size: f32, color: Rgb<u8>) {
        if let Some(font) = &self.font {
            draw_text_mut(canvas, color, x, y, PxScale::from(size), font, text);
        }
    }

    /// Idle dashboard: identity, counts, sync state, clock.
    pub fn render_idle(&self, status: &SystemStatus, gate_id: &str) -> RgbImage {
        let mut canvas = RgbImage::from_pixel(self.width, self.height, BACKGROUND);

        let bar_y = (self.height as i32 / 2) - 60;
        draw_filled_rect_mut(
            &mut canvas,
            Rect::at(self.width as i32 / 2 - 180, bar_y).of_size(360, 4),
            AUTHORIZED_GREEN,
        );

        let cx = self.width as i32 / 2 - 160;
        self.text(&mut canvas, gate_id, cx, bar_y + 24, 44.0, TEXT);
        self.text(
            &mut canvas,
            &format!("Faces enrolled: {}", status.face_count),
            cx,
            bar_y + 80,
            24.0,
            TEXT_DIM,
        );
        self.text(
            &mut canvas,
            &format!("Sync: {}   Gate: {}", status.sync_status, status.gate_state),
            cx,
            bar_y + 112,
            24.0,
            TEXT_DIM,
        );
        self.text(
            &mut canvas,
            &Local::now().format("%H:%M:%S").to_string(),
            cx,
            bar_y + 144,
            24.0,
            TEXT_DIM,
        );

        self.draw_status_bar(&mut canvas, status);
        canvas
    }

    /// Alert canvas: up to four cells, WANTED first.
    pub fn render_alerts(
        &self,
        alerts: &[AlertEntry],
        center: &AlertCenter,
        status: &SystemStatus,
        gate_id: &str,
    ) -> RgbImage {
        if alerts.is_empty() {
            return self.render_idle(status, gate_id);
        }

        let mut canvas = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        let shown = &alerts[..alerts.len().min(4)];

        let cells: Vec<Rect> = match shown.len() {
            1 => vec![Rect::at(self.width as i32 / 4, 40).of_size(self.width / 2, self.height - 120)],
            2 => {
                let w = self.width / 2 - 30;
                let h = self.height - 120;
                vec![
                    Rect::at(20, 40).of_size(w, h),
                    Rect::at(self.width as i32 / 2 + 10, 40).of_size(w, h),
                ]
            }
            _ => {
                let w = self.width / 2 - 30;
                let h = (self.height - 140) / 2;
                vec![
                    Rect::at(20, 30).of_size(w, h),
                    Rect::at(self.width as i32 / 2 + 10, 30).of_size(w, h),
                    Rect::at(20, self.height as i32 / 2 + 10).of_size(w, h),
                    Rect::at(self.width as i32 / 2 + 10, self.height as i32 / 2 + 10).of_size(w, h),
                ]
            }
        };

        for (alert, cell) in shown.iter().zip(cells.iter()) {
            self.draw_alert_cell(&mut canvas, alert, *cell, center.remaining_fraction(alert));
        }

        self.draw_status_bar(&mut canvas, status);
        canvas
    }

    fn draw_alert_cell(&self, canvas: &mut RgbImage, alert: &AlertEntry, cell: Rect, remaining: f32) {
        let color = status_color(alert.status);
        draw_filled_rect_mut(canvas, cell, PANEL);
        for inset in 0..3 {
            draw_hollow_rect_mut(
                canvas,
                Rect::at(cell.left() + inset, cell.top() + inset)
                    .of_size(cell.width() - 2 * inset as u32, cell.height() - 2 * inset as u32),
                color,
            );
        }

        // Face crop fills the upper part of the cell.
        if let Some(crop) = &alert.crop {
            let crop_h = (cell.height() as f32 * 0.55) as u32;
            let crop_w = cell.width() - 24;
            if crop_w > 0 && crop_h > 0 {
                let resized =
                    image::imageops::resize(crop, crop_w, crop_h, image::imageops::FilterType::Triangle);
                image::imageops::overlay(canvas, &resized, (cell.left() + 12) as i64, (cell.top() + 12) as i64);
            }
        }

        let text_y = cell.top() + (cell.height() as f32 * 0.6) as i32 + 20;
        self.text(canvas, &alert.status.to_string(), cell.left() + 14, text_y, 32.0, color);
        if let Some(name) = &alert.name {
            self.text(canvas, name, cell.left() + 14, text_y + 40, 26.0, TEXT);
        }
        if alert.confidence > 0.0 {
            self.text(
                canvas,
                &format!("confidence {:.0}%", alert.confidence * 100.0),
                cell.left() + 14,
                text_y + 72,
                22.0,
                TEXT_DIM,
            );
        }

        // Diminishing progress bar along the bottom edge.
        let bar_w = ((cell.width() - 24) as f32 * remaining.clamp(0.0, 1.0)) as u32;
        if bar_w > 0 {
            draw_filled_rect_mut(
                canvas,
                Rect::at(cell.left() + 12, cell.bottom() - 14).of_size(bar_w, 6),
                color,
            );
        }
    }

    /// Live view with per-face annotations.
    pub fn render_continuous(
        &self,
        frame: &Frame,
        tracks: &[TrackSnapshot],
        status: &SystemStatus,
    ) -> RgbImage {
        let mut canvas =
            image::imageops::resize(frame.image(), self.width, self.height, image::imageops::FilterType::Triangle);
        let sx = self.width as f32 / frame.width() as f32;
        let sy = self.height as f32 / frame.height() as f32;

        for track in tracks {
            match track.phase {
                TrackPhase::Tentative | TrackPhase::Confirmed => {
                    // Landmark dots while identification is pending.
                    if let Some(landmarks) = &track.landmarks {
                        for p in landmarks.points() {
                            draw_filled_circle_mut(
                                &mut canvas,
                                ((p[0] * sx) as i32, (p[1] * sy) as i32),
                                3,
                                PENDING_GRAY,
                            );
                        }
                    }
                    let r = scaled_rect(&track.bbox, sx, sy);
                    draw_hollow_rect_mut(&mut canvas, r, PENDING_GRAY);
                }
                TrackPhase::Recognized => {
                    let color = track
                        .identity
                        .as_ref()
                        .map(|i| status_color(i.status))
                        .unwrap_or(PENDING_GRAY);
                    let r = scaled_rect(&track.bbox, sx, sy);
                    for inset in 0..2 {
                        draw_hollow_rect_mut(
                            &mut canvas,
                            Rect::at(r.left() + inset, r.top() + inset)
                                .of_size(r.width().saturating_sub(2 * inset as u32).max(1), r.height().saturating_sub(2 * inset as u32).max(1)),
                            color,
                        );
                    }
                    let label = match &track.identity {
                        Some(identity) => format!(
                            "#{} {} {:.0}%",
                            track.track_id,
                            identity.full_name.as_deref().unwrap_or("UNKNOWN"),
                            identity.confidence * 100.0
                        ),
                        None => format!("#{}", track.track_id),
                    };
                    self.text(&mut canvas, &label, r.left(), r.top() - 22, 18.0, color);
                }
            }
        }

        self.draw_status_bar(&mut canvas, status);
        canvas
    }

    /// Raw stream with just a mode/time overlay.
    pub fn render_streaming(&self, frame: &Frame) -> RgbImage {
        let mut canvas =
            image::imageops::resize(frame.image(), self.width, self.height, image::imageops::FilterType::Triangle);
        self.text(
            &mut canvas,
            &format!("STREAMING  {}", Local::now().format("%H:%M:%S")),
            12,
            12,
            20.0,
            TEXT,
        );
        canvas
    }

    fn draw_status_bar(&self, canvas: &mut RgbImage, status: &SystemStatus) {
        let bar_h = 28u32;
        let y = self.height as i32 - bar_h as i32;
        draw_filled_rect_mut(canvas, Rect::at(0, y).of_size(self.width, bar_h), PANEL);
        self.text(
            canvas,
            &format!(
                "Gate {}   Sync {}   Faces {}   {}",
                status.gate_state,
                status.sync_status,
                status.face_count,
                Local::now().format("%Y-%m-%d %H:%M:%S")
            ),
            10,
            y + 5,
            18.0,
            TEXT_DIM,
        );
    }
}

fn scaled_rect(bbox: &common::BoundingBox, sx: f32, sy: f32) -> Rect {
    let x = (bbox.x1 * sx) as i32;
    let y = (bbox.y1 * sy) as i32;
    let w = (bbox.width() * sx).max(1.0) as u32;
    let h = (bbox.height() * sy).max(1.0) as u32;
    Rect::at(x, y).of_size(w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::AlertConfig;
    use common::{BoundingBox, Identity};
    use std::time::Instant;

    fn renderer() -> Renderer {
        // No font on purpose: rendering must not depend on one.
        Renderer::new(640, 360, "/nonexistent/font.ttf")
    }

    fn status() -> SystemStatus {
        SystemStatus {
            face_count: 3,
            sync_status: "Synced".to_string(),
            gate_state: "CLOSED".to_string(),
        }
    }

    #[test]
    fn idle_canvas_has_configured_size_and_accent() {
        let canvas = renderer().render_idle(&status(), "gate-001");
        assert_eq!((canvas.width(), canvas.height()), (640, 360));
        // The accent bar is painted at centre height - 60.
        assert_eq!(canvas.get_pixel(320, 121), &AUTHORIZED_GREEN);
    }

    #[test]
    fn empty_alert_set_falls_back_to_idle() {
        let center = AlertCenter::new(AlertConfig::default());
        let canvas = renderer().render_alerts(&[], &center, &status(), "gate-001");
        assert_eq!(canvas.get_pixel(320, 121), &AUTHORIZED_GREEN);
    }

    #[test]
    fn wanted_alert_cell_has_red_border() {
        let center = AlertCenter::new(AlertConfig::default());
        let alert = AlertEntry {
            track_id: 1,
            status: Decision::Wanted,
            name: Some("Kai Novak".to_string()),
            confidence: 0.8,
            crop: None,
            first_shown_at: Instant::now(),
        };
        let canvas = renderer().render_alerts(&[alert], &center, &status(), "gate-001");
        // Single-cell layout starts at x = width/4, y = 40.
        assert_eq!(canvas.get_pixel(160, 40), &WANTED_RED);
    }

    #[test]
    fn continuous_mode_draws_recognized_box() {
        let frame = Frame::new(image::RgbImage::from_pixel(640, 360, Rgb([0, 0, 0])), 1);
        let track = TrackSnapshot {
            track_id: 1,
            bbox: BoundingBox::new(100.0, 100.0, 200.0, 200.0),
            score: 0.9,
            landmarks: None,
            phase: TrackPhase::Recognized,
            hits: 5,
            age: 10,
            time_since_update: 0,
            recognition_attempts: 1,
            identity: Some(Identity {
                face_id: Some("f-1".to_string()),
                person_id: None,
                full_name: Some("Amina Diallo".to_string()),
                status: Decision::Authorized,
                confidence: 0.9,
            }),
            created_at: chrono::Utc::now(),
            recognized_at: Some(chrono::Utc::now()),
        };
        let canvas = renderer().render_continuous(&frame, &[track], &status());
        // Box edge at the bbox corner (scale is 1:1 here).
        assert_eq!(canvas.get_pixel(100, 100), &AUTHORIZED_GREEN);
    }

    #[test]
    fn streaming_mode_returns_display_sized_frame() {
        let frame = Frame::new(image::RgbImage::from_pixel(320, 240, Rgb([9, 9, 9])), 1);
        let canvas = renderer().render_streaming(&frame);
        assert_eq!((canvas.width(), canvas.height()), (640, 360));
    }
}
