use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("index metadata malformed: {0}")]
    Metadata(#[from] serde_json::Error),
    #[error("record {face_id} carries invalid status {status:?}")]
    InvalidStatus { face_id: String, status: String },
    #[error(transparent)]
    Embedding(#[from] common::EmbeddingError),
}

impl From<tempfile::PersistError> for IndexError {
    fn from(e: tempfile::PersistError) -> Self {
        IndexError::Io(e.error)
    }
}
