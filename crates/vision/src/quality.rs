//! Face quality gates applied before a detection reaches the tracker.
//!
//! Low-quality faces waste recognition attempts and produce unreliable
//! matches, so they are rejected early: too small, too blurry, or too far
//! off-axis (estimated from the five landmarks alone).

use common::{Detection, Frame, Landmarks};
use image::imageops;
use imageproc::filter::laplacian_filter;

#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Minimum face width in pixels.
    pub min_face_width: f32,
    /// Laplacian-variance blur gate. Off by default: motion blur on a gate
    /// camera rejects too many genuine walk-ups.
    pub check_blur: bool,
    pub blur_threshold: f64,
    /// Maximum yaw asymmetry ratio (0 = frontal).
    pub max_yaw: f32,
    /// Maximum pitch ratio deviation (0 = frontal).
    pub max_pitch: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_face_width: 60.0,
            check_blur: false,
            blur_threshold: 100.0,
            max_yaw: 0.5,
            max_pitch: 0.4,
        }
    }
}

impl QualityConfig {
    /// Stricter profile for enrolment-grade captures.
    pub fn strict() -> Self {
        Self {
            min_face_width: 80.0,
            check_blur: true,
            ..Self::default()
        }
    }
}

/// Why a detection was rejected, surfaced at debug level only.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityVerdict {
    Pass,
    TooSmall { width: f32 },
    TooBlurry { variance: f64 },
    ExtremeYaw { score: f32 },
    ExtremePitch { score: f32 },
}

impl QualityVerdict {
    pub fn passed(&self) -> bool {
        matches!(self, QualityVerdict::Pass)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QualityFilter {
    config: QualityConfig,
}

impl QualityFilter {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Assess one detection against the configured gates.
    pub fn assess(&self, detection: &Detection, frame: &Frame) -> QualityVerdict {
        let width = detection.bbox.width();
        if width < self.config.min_face_width {
            return QualityVerdict::TooSmall { width };
        }

        if self.config.check_blur {
            let clamped = detection.bbox.clamped(frame.width(), frame.height());
            let (w, h) = (clamped.width() as u32, clamped.height() as u32);
            if w > 0 && h > 0 {
                let crop =
                    imageops::crop_imm(frame.image(), clamped.x1 as u32, clamped.y1 as u32, w, h)
                        .to_image();
                let variance = laplacian_variance(&crop);
                if variance < self.config.blur_threshold {
                    return QualityVerdict::TooBlurry { variance };
                }
            }
        }

        if let Some(landmarks) = &detection.landmarks {
            let (yaw, pitch) = estimate_pose(landmarks);
            if yaw > self.config.max_yaw {
                return QualityVerdict::ExtremeYaw { score: yaw };
            }
            if pitch > self.config.max_pitch {
                return QualityVerdict::ExtremePitch { score: pitch };
            }
        }

        QualityVerdict::Pass
    }

    /// Split detections into those worth tracking and the rejects (the UI
    /// may still paint the rejects as pending landmark points).
    pub fn split(&self, detections: Vec<Detection>, frame: &Frame) -> (Vec<Detection>, Vec<Detection>) {
        let mut kept = Vec::with_capacity(detections.len());
        let mut rejected = Vec::new();
        for detection in detections {
            let verdict = self.assess(&detection, frame);
            if verdict.passed() {
                kept.push(detection);
            } else {
                tracing::debug!(?verdict, score = detection.score, "detection rejected by quality filter");
                rejected.push(detection);
            }
        }
        (kept, rejected)
    }
}

/// Sharpness score: variance of the Laplacian response. Higher is sharper.
pub fn laplacian_variance(crop: &image::RgbImage) -> f64 {
    let gray = imageops::grayscale(crop);
    let response = laplacian_filter(&gray);
    let n = response.len() as f64;
    if n == 0.0 {
        return 0.0;
    }
    let mean: f64 = response.iter().map(|v| *v as f64).sum::<f64>() / n;
    response.iter().map(|v| (*v as f64 - mean).powi(2)).sum::<f64>() / n
}

/// Estimate (yaw, pitch) scores from the five landmarks; 0 is frontal,
/// scores saturate at 1.
pub fn estimate_pose(landmarks: &Landmarks) -> (f32, f32) {
    let left_eye = landmarks.left_eye();
    let right_eye = landmarks.right_eye();
    let nose = landmarks.nose();
    let left_mouth = landmarks.left_mouth();
    let right_mouth = landmarks.right_mouth();

    let eye_dist = ((right_eye[0] - left_eye[0]).powi(2) + (right_eye[1] - left_eye[1]).powi(2)).sqrt();
    if eye_dist < 1.0 {
        return (0.0, 0.0);
    }

    // Yaw: in a frontal face the nose sits on the eye midline.
    let eye_center_x = (left_eye[0] + right_eye[0]) / 2.0;
    let yaw = ((nose[0] - eye_center_x).abs() / (eye_dist / 2.0)).min(1.0);

    // Pitch: eyes-to-nose vs nose-to-mouth vertical distances are roughly
    // equal in a frontal face.
    let eye_center_y = (left_eye[1] + right_eye[1]) / 2.0;
    let mouth_center_y = (left_mouth[1] + right_mouth[1]) / 2.0;
    let nose_to_eyes = nose[1] - eye_center_y;
    let nose_to_mouth = mouth_center_y - nose[1];
    let pitch = if mouth_center_y - eye_center_y <= 0.0 || nose_to_mouth <= 0.0 {
        1.0
    } else {
        (nose_to_eyes / nose_to_mouth - 1.0).abs().min(1.0)
    };

    (yaw, pitch)
}
