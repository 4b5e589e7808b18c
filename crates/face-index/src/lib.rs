//! Local face database: an in-memory index over 512-D embeddings under
//! cosine distance, with persisted metadata and a sync version token.
//!
//! At gate-node scale (hundreds to low thousands of enrolled faces) an
//! exact flat scan over normalised vectors answers nearest-neighbour
//! queries in well under a millisecond, so the index is exact; the public
//! contract leaves room for an approximate backend behind the same
//! operations if a deployment ever outgrows it.

pub mod error;
pub mod index;
pub mod protocol;
mod store;

pub use error::IndexError;
pub use index::{FaceIndex, FaceMeta, IndexPaths, SearchHit};
pub use protocol::{CountResponse, FaceUpsert, LogUploadRequest, SyncResponse};
