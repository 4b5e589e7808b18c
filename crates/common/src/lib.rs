//! Shared contracts for the Gatewarden edge node.
//!
//! Everything that crosses a crate boundary lives here: frames, detections,
//! embeddings, identity enums, face records and access events.

pub mod detection;
pub mod embedding;
pub mod events;
pub mod frame;
pub mod geometry;
pub mod identity;
pub mod time;

pub use detection::Detection;
pub use embedding::{Embedding, EmbeddingError, EMBEDDING_DIM};
pub use events::AccessEvent;
pub use frame::Frame;
pub use geometry::{BoundingBox, Landmarks};
pub use identity::{Decision, FaceRecord, GateAction, Identity, PersonStatus};
