use thiserror::Error;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("failed to load model from {path}: {source}")]
    ModelLoad {
        path: String,
        #[source]
        source: ort::Error,
    },
    #[error("inference failed: {0}")]
    Inference(#[from] ort::Error),
    #[error("model output malformed: {0}")]
    MalformedOutput(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Embedding(#[from] common::EmbeddingError),
}
