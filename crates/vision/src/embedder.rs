//! ArcFace-style ONNX embedding adapter.
//!
//! The preprocessing contract is fixed and must match the pipeline that
//! produced the enrolled embeddings: RGB, `(p - 127.5) / 128`, channel-first,
//! batch dimension. Output is flattened and L2-normalised.

use common::{Embedding, EMBEDDING_DIM};
use image::RgbImage;
use ndarray::{Array, IxDyn};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use parking_lot::Mutex;

use crate::aligner::ALIGNED_SIZE;
use crate::detector::normalize_pixel;
use crate::error::VisionError;

/// Capability trait the recognition workers consume.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, face: &RgbImage) -> Result<Embedding, VisionError>;
}

pub struct ArcFaceEmbedder {
    session: Mutex<Session>,
    output_name: String,
}

impl ArcFaceEmbedder {
    pub fn load(model_path: &str, intra_threads: usize) -> Result<Self, VisionError> {
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(intra_threads))
            .and_then(|b| b.commit_from_file(model_path))
            .map_err(|source| VisionError::ModelLoad {
                path: model_path.to_string(),
                source,
            })?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| VisionError::MalformedOutput("embedder has no outputs".into()))?;

        tracing::info!(model = %model_path, output = %output_name, "face embedder loaded");

        Ok(Self {
            session: Mutex::new(session),
            output_name,
        })
    }
}

impl FaceEmbedder for ArcFaceEmbedder {
    fn embed(&self, face: &RgbImage) -> Result<Embedding, VisionError> {
        if face.width() != ALIGNED_SIZE || face.height() != ALIGNED_SIZE {
            return Err(VisionError::InvalidInput(format!(
                "embedder expects a {ALIGNED_SIZE}x{ALIGNED_SIZE} face, got {}x{}",
                face.width(),
                face.height()
            )));
        }

        let input = preprocess(face);
        let input_tensor = Value::from_array(input)?;

        let mut session = self.session.lock();
        let outputs = session.run(ort::inputs![input_tensor])?;
        let value = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            VisionError::MalformedOutput(format!("missing output tensor {}", self.output_name))
        })?;
        let (_, data) = value.try_extract_tensor::<f32>()?;

        if data.len() != EMBEDDING_DIM {
            return Err(VisionError::MalformedOutput(format!(
                "embedder returned {} values, expected {EMBEDDING_DIM}",
                data.len()
            )));
        }

        Ok(Embedding::normalized(data.to_vec())?)
    }
}

fn preprocess(face: &RgbImage) -> Array<f32, IxDyn> {
    let size = ALIGNED_SIZE as usize;
    let mut input = Array::zeros(IxDyn(&[1, 3, size, size]));
    for (x, y, pixel) in face.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = normalize_pixel(pixel[c]);
        }
    }
    input
}
