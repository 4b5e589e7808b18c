//! SCRFD-style ONNX face detector adapter.
//!
//! The model is consumed purely through its tensor contract: a letterboxed
//! 640x640 input, and per-stride score / bbox-distance / keypoint-distance
//! outputs for three FPN strides with two anchors each.

use common::{BoundingBox, Detection, Landmarks};
use image::{imageops, RgbImage};
use ndarray::{Array, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use parking_lot::Mutex;

use crate::error::VisionError;

/// FPN strides of the detection head.
const FEAT_STRIDES: [u32; 3] = [8, 16, 32];
/// Anchors per spatial location.
const NUM_ANCHORS: usize = 2;

/// Capability trait the node consumes; concrete backends are injected at
/// startup.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, VisionError>;
}

#[derive(Debug, Clone)]
pub struct ScrfdConfig {
    pub model_path: String,
    /// Square input side length the model expects.
    pub input_size: u32,
    /// Minimum detection score to keep.
    pub score_threshold: f32,
    /// IoU above which overlapping candidates are suppressed.
    pub nms_iou: f32,
    pub intra_threads: usize,
}

impl Default for ScrfdConfig {
    fn default() -> Self {
        Self {
            model_path: "models/face_detector.onnx".to_string(),
            input_size: 640,
            score_threshold: 0.4,
            nms_iou: 0.4,
            intra_threads: 2,
        }
    }
}

pub struct ScrfdDetector {
    session: Mutex<Session>,
    output_names: Vec<String>,
    config: ScrfdConfig,
}

impl ScrfdDetector {
    pub fn load(config: ScrfdConfig) -> Result<Self, VisionError> {
        let session = build_session(&config.model_path, config.intra_threads)
            .map_err(|source| VisionError::ModelLoad {
                path: config.model_path.clone(),
                source,
            })?;

        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.len() < FEAT_STRIDES.len() * 2 {
            return Err(VisionError::MalformedOutput(format!(
                "detector exposes {} outputs, expected at least {}",
                output_names.len(),
                FEAT_STRIDES.len() * 2
            )));
        }

        tracing::info!(
            model = %config.model_path,
            outputs = output_names.len(),
            "face detector loaded"
        );

        Ok(Self {
            session: Mutex::new(session),
            output_names,
            config,
        })
    }

    fn preprocess(&self, frame: &RgbImage) -> (Array<f32, IxDyn>, f32) {
        let size = self.config.input_size;
        let scale = letterbox_scale(frame.width(), frame.height(), size);
        let new_w = ((frame.width() as f32 * scale).round() as u32).max(1);
        let new_h = ((frame.height() as f32 * scale).round() as u32).max(1);

        let resized = imageops::resize(frame, new_w, new_h, imageops::FilterType::Triangle);

        // Letterbox: paste into a black square, padding right and bottom.
        let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));
        input.fill(normalize_pixel(0));
        for (x, y, pixel) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = normalize_pixel(pixel[c]);
            }
        }

        (input, scale)
    }
}

impl FaceDetector for ScrfdDetector {
    fn detect(&self, frame: &RgbImage) -> Result<Vec<Detection>, VisionError> {
        let (input, scale) = self.preprocess(frame);
        let input_tensor = Value::from_array(input)?;

        let raw: Vec<Vec<f32>> = {
            let mut session = self.session.lock();
            let outputs = session.run(ort::inputs![input_tensor])?;
            let mut raw = Vec::with_capacity(self.output_names.len());
            for name in &self.output_names {
                let value = outputs.get(name.as_str()).ok_or_else(|| {
                    VisionError::MalformedOutput(format!("missing output tensor {name}"))
                })?;
                let (_, data) = value.try_extract_tensor::<f32>()?;
                raw.push(data.to_vec());
            }
            raw
        };

        let has_landmarks = raw.len() >= FEAT_STRIDES.len() * 3;
        let mut candidates = Vec::new();

        for (idx, stride) in FEAT_STRIDES.iter().enumerate() {
            let scores = &raw[idx];
            let bbox_preds = &raw[idx + FEAT_STRIDES.len()];
            let kps_preds = if has_landmarks {
                Some(&raw[idx + FEAT_STRIDES.len() * 2])
            } else {
                None
            };

            let centers = anchor_centers(*stride, self.config.input_size);
            if scores.len() < centers.len() || bbox_preds.len() < centers.len() * 4 {
                return Err(VisionError::MalformedOutput(format!(
                    "stride {stride} outputs shorter than {} anchor cells",
                    centers.len()
                )));
            }

            for (i, center) in centers.iter().enumerate() {
                let score = scores[i];
                if score < self.config.score_threshold {
                    continue;
                }

                let d = &bbox_preds[i * 4..i * 4 + 4];
                let bbox = distance_to_bbox(*center, d, *stride as f32);

                let landmarks = kps_preds.and_then(|kps| {
                    let offsets = kps.get(i * 10..i * 10 + 10)?;
                    Some(distance_to_landmarks(*center, offsets, *stride as f32))
                });

                candidates.push(Candidate {
                    bbox,
                    score,
                    landmarks,
                });
            }
        }

        let kept = nms(candidates, self.config.nms_iou);

        let inv = 1.0 / scale;
        Ok(kept
            .into_iter()
            .map(|c| {
                let bbox = BoundingBox::new(c.bbox.x1 * inv, c.bbox.y1 * inv, c.bbox.x2 * inv, c.bbox.y2 * inv)
                    .clamped(frame.width(), frame.height());
                Detection::new(bbox, c.score, c.landmarks.map(|l| l.scaled(inv)))
            })
            .collect())
    }
}

fn build_session(path: &str, intra_threads: usize) -> Result<Session, ort::Error> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(path)
}

#[derive(Debug, Clone)]
struct Candidate {
    bbox: BoundingBox,
    score: f32,
    landmarks: Option<Landmarks>,
}

pub(crate) fn normalize_pixel(p: u8) -> f32 {
    (p as f32 - 127.5) / 128.0
}

/// Scale factor that fits a `width` x `height` frame inside a square of
/// `target` pixels while preserving aspect ratio.
fn letterbox_scale(width: u32, height: u32, target: u32) -> f32 {
    (target as f32 / width as f32).min(target as f32 / height as f32)
}

/// Anchor centre coordinates for one stride, row-major, each spatial
/// location repeated once per anchor.
fn anchor_centers(stride: u32, input_size: u32) -> Vec<[f32; 2]> {
    let cells = (input_size / stride) as usize;
    let mut centers = Vec::with_capacity(cells * cells * NUM_ANCHORS);
    for y in 0..cells {
        for x in 0..cells {
            let c = [(x as u32 * stride) as f32, (y as u32 * stride) as f32];
            for _ in 0..NUM_ANCHORS {
                centers.push(c);
            }
        }
    }
    centers
}

/// Decode left/top/right/bottom distances (in stride units) into a box.
fn distance_to_bbox(center: [f32; 2], d: &[f32], stride: f32) -> BoundingBox {
    BoundingBox::new(
        center[0] - d[0] * stride,
        center[1] - d[1] * stride,
        center[0] + d[2] * stride,
        center[1] + d[3] * stride,
    )
}

/// Decode five (dx, dy) keypoint offsets (in stride units) into landmarks.
fn distance_to_landmarks(center: [f32; 2], offsets: &[f32], stride: f32) -> Landmarks {
    let mut pts = [[0.0f32; 2]; 5];
    for (k, pt) in pts.iter_mut().enumerate() {
        pt[0] = center[0] + offsets[k * 2] * stride;
        pt[1] = center[1] + offsets[k * 2 + 1] * stride;
    }
    Landmarks(pts)
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| k.bbox.iou(&candidate.bbox) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn letterbox_scale_fits_longest_side() {
        assert_relative_eq!(letterbox_scale(640, 480, 640), 1.0);
        assert_relative_eq!(letterbox_scale(1280, 720, 640), 0.5);
        assert_relative_eq!(letterbox_scale(480, 960, 640), 640.0 / 960.0);
    }

    #[test]
    fn anchor_centers_cover_grid_with_two_anchors() {
        let centers = anchor_centers(32, 640);
        assert_eq!(centers.len(), 20 * 20 * NUM_ANCHORS);
        assert_eq!(centers[0], [0.0, 0.0]);
        assert_eq!(centers[1], [0.0, 0.0]);
        assert_eq!(centers[2], [32.0, 0.0]);
        assert_eq!(centers[2 * 20], [0.0, 32.0]);
    }

    #[test]
    fn distance_decode_round_trip() {
        let bbox = distance_to_bbox([64.0, 96.0], &[2.0, 1.0, 3.0, 4.0], 8.0);
        assert_eq!(bbox.x1, 64.0 - 16.0);
        assert_eq!(bbox.y1, 96.0 - 8.0);
        assert_eq!(bbox.x2, 64.0 + 24.0);
        assert_eq!(bbox.y2, 96.0 + 32.0);

        let lm = distance_to_landmarks([10.0, 20.0], &[1.0, 1.0, 2.0, 1.0, 1.5, 2.0, 1.0, 3.0, 2.0, 3.0], 2.0);
        assert_eq!(lm.left_eye(), [12.0, 22.0]);
        assert_eq!(lm.nose(), [13.0, 24.0]);
    }

    #[test]
    fn nms_suppresses_overlapping_lower_scores() {
        let candidates = vec![
            Candidate {
                bbox: BoundingBox::new(0.0, 0.0, 100.0, 100.0),
                score: 0.9,
                landmarks: None,
            },
            Candidate {
                bbox: BoundingBox::new(5.0, 5.0, 105.0, 105.0),
                score: 0.8,
                landmarks: None,
            },
            Candidate {
                bbox: BoundingBox::new(300.0, 300.0, 400.0, 400.0),
                score: 0.7,
                landmarks: None,
            },
        ];
        let kept = nms(candidates, 0.4);
        assert_eq!(kept.len(), 2);
        assert_relative_eq!(kept[0].score, 0.9);
        assert_relative_eq!(kept[1].score, 0.7);
    }

    #[test]
    fn nms_keeps_all_disjoint_boxes() {
        let candidates = (0..4)
            .map(|i| Candidate {
                bbox: BoundingBox::new(i as f32 * 200.0, 0.0, i as f32 * 200.0 + 50.0, 50.0),
                score: 0.5 + i as f32 * 0.1,
                landmarks: None,
            })
            .collect();
        assert_eq!(nms(candidates, 0.4).len(), 4);
    }

    #[test]
    fn pixel_normalization_matches_recognition_contract() {
        assert_relative_eq!(normalize_pixel(0), -127.5 / 128.0);
        assert_relative_eq!(normalize_pixel(255), 127.5 / 128.0);
        assert_relative_eq!(normalize_pixel(128), 0.5 / 128.0);
    }
}
