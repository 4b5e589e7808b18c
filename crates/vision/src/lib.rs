//! Vision adapters for the gate node: face detection, alignment to the
//! recognition template, embedding extraction and quality filtering.
//!
//! The neural networks themselves are external; this crate owns only their
//! tensor contracts. Detector and embedder are consumed by the node through
//! the [`FaceDetector`] and [`FaceEmbedder`] capability traits so tests can
//! inject synthetic implementations.

pub mod aligner;
pub mod detector;
pub mod embedder;
pub mod error;
pub mod quality;

pub use aligner::{align_face, align_from_bbox, AlignedFace, ALIGNED_SIZE};
pub use detector::{FaceDetector, ScrfdDetector, ScrfdConfig};
pub use embedder::{ArcFaceEmbedder, FaceEmbedder};
pub use error::VisionError;
pub use quality::{QualityConfig, QualityFilter, QualityVerdict};
