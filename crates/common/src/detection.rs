use crate::embedding::Embedding;
use crate::geometry::{BoundingBox, Landmarks};

/// A single face found by the detector in one frame.
///
/// Detections live for one frame only; the tracker copies what it needs.
/// `embedding` is populated by the main loop only when the detection
/// overlaps an already-recognised track, so the tracker's swap gate has
/// something to compare against.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub score: f32,
    pub landmarks: Option<Landmarks>,
    pub embedding: Option<Embedding>,
}

impl Detection {
    pub fn new(bbox: BoundingBox, score: f32, landmarks: Option<Landmarks>) -> Self {
        Self {
            bbox,
            score,
            landmarks,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Embedding) -> Self {
        self.embedding = Some(embedding);
        self
    }
}
