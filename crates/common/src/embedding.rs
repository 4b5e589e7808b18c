use thiserror::Error;

/// Dimensionality of the face embedding space.
pub const EMBEDDING_DIM: usize = 512;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding has {got} dimensions, expected {EMBEDDING_DIM}")]
    WrongDimension { got: usize },
    #[error("embedding has zero norm")]
    ZeroNorm,
    #[error("embedding buffer has {got} bytes, expected {expected}")]
    TruncatedBuffer { got: usize, expected: usize },
}

/// An L2-normalised 512-dimensional face embedding.
///
/// Construction via [`Embedding::normalized`] enforces the unit-norm
/// invariant, so cosine similarity between two embeddings is their dot
/// product.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Build an embedding from raw model output, L2-normalising it.
    pub fn normalized(mut values: Vec<f32>) -> Result<Self, EmbeddingError> {
        if values.len() != EMBEDDING_DIM {
            return Err(EmbeddingError::WrongDimension { got: values.len() });
        }
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm <= f32::EPSILON {
            return Err(EmbeddingError::ZeroNorm);
        }
        for v in &mut values {
            *v /= norm;
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn norm(&self) -> f32 {
        self.0.iter().map(|v| v * v).sum::<f32>().sqrt()
    }

    /// Dot product; equals cosine similarity for unit-norm vectors.
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }

    /// `1 - cosine_similarity`, in `[0, 2]`.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        1.0 - self.cosine_similarity(other)
    }

    /// Renormalised mean of a set of embeddings. `None` when the set is
    /// empty or the mean collapses to zero.
    pub fn mean(items: &[Embedding]) -> Option<Embedding> {
        if items.is_empty() {
            return None;
        }
        let mut acc = vec![0.0f32; EMBEDDING_DIM];
        for item in items {
            for (a, v) in acc.iter_mut().zip(item.0.iter()) {
                *a += v;
            }
        }
        let n = items.len() as f32;
        for a in &mut acc {
            *a /= n;
        }
        Embedding::normalized(acc).ok()
    }

    /// Encode as little-endian f32 bytes. Decoding with
    /// [`Embedding::from_le_bytes`] is bit-exact.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(EMBEDDING_DIM * 4);
        for v in &self.0 {
            out.extend_from_slice(&v.to_le_bytes());
        }
        out
    }

    /// Decode little-endian f32 bytes. Does not renormalise, preserving the
    /// stored values bit-for-bit.
    pub fn from_le_bytes(bytes: &[u8]) -> Result<Self, EmbeddingError> {
        let expected = EMBEDDING_DIM * 4;
        if bytes.len() != expected {
            return Err(EmbeddingError::TruncatedBuffer {
                got: bytes.len(),
                expected,
            });
        }
        let mut values = Vec::with_capacity(EMBEDDING_DIM);
        for chunk in bytes.chunks_exact(4) {
            values.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
        }
        Ok(Self(values))
    }
}
