use sha2::{Digest, Sha256};

use crate::config::Number;
use crate::error::PipelineError;
use crate::vector_ops::normalize_vector;

/// Seam for the external embedding model. The pipeline only depends on this
/// trait; swapping in a remote model service changes nothing upstream.
pub trait Embedder {
    /// Stable model identifier, recorded in the store so a mismatched model
    /// is caught before serving queries.
    fn id(&self) -> &str;

    fn dimensions(&self) -> usize;

    /// Embed one text. A failure to reach the model surfaces as
    /// `PipelineError::Unavailable`.
    fn embed(&self, text: &str) -> Result<Vec<Number>, PipelineError>;

    /// Embed a batch, preserving input order.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<Number>>, PipelineError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

/// Deterministic feature-hashing encoder: each lowercase alphanumeric token is
/// hashed with SHA-256 into a bucket and a sign, accumulated, and the result
/// is L2-normalized. Not a semantic model, but it is cheap, needs no external
/// service, and re-embedding the same text always yields the same vector.
pub struct HashEmbedder {
    id: String,
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(id: impl Into<String>, dimensions: usize) -> Result<Self, PipelineError> {
        if dimensions == 0 {
            return Err(PipelineError::Config(
                "embedding dimensions must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            id: id.into(),
            dimensions,
        })
    }

    fn bucket_for(&self, token: &str) -> (usize, Number) {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(b"\0");
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();

        let index = u64::from_le_bytes(digest[..8].try_into().unwrap()) as usize;
        // One digest byte decides the sign, so colliding tokens of opposite
        // sign cancel instead of piling up.
        let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
        (index % self.dimensions, sign)
    }
}

impl Embedder for HashEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<Number>, PipelineError> {
        let mut vector = vec![0.0; self.dimensions];
        for token in tokenize(text) {
            let (bucket, sign) = self.bucket_for(token);
            vector[bucket] += sign;
        }
        normalize_vector(&mut vector);
        Ok(vector)
    }
}

/// Lowercased alphanumeric runs. The loader already lowercases narratives,
/// but queries arrive raw.
fn tokenize(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
}
