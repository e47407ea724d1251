use serde::Serialize;
use tracing::info;

use crate::embedding::Embedder;
use crate::error::PipelineError;
use crate::store::VectorStore;

/// One retrieved chunk with its originating complaint metadata, ready for the
/// caller (the dashboard renders these as-is).
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub distance: f32,
    pub complaint_id: usize,
    pub company: String,
    pub product: String,
    pub issue: String,
    pub state: String,
    pub date_received: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct RetrievalResponse {
    pub query: String,
    pub model_id: String,
    pub store_record_count: usize,
    pub requested_results_count: usize,
    pub results: Vec<RetrievedChunk>,
}

/// Query-time façade: embeds free text, runs the nearest-neighbor query, and
/// formats the hits. Holds the shared embedder and store handle for the life
/// of the process.
pub struct RetrievalService<E: Embedder> {
    embedder: E,
    store: VectorStore,
    default_k: usize,
}

impl<E: Embedder> RetrievalService<E> {
    pub fn new(embedder: E, store: VectorStore, default_k: usize) -> Self {
        Self {
            embedder,
            store,
            default_k,
        }
    }

    /// Retrieve the chunks most similar to `query_text`, most similar first.
    /// `k` falls back to the configured default when absent.
    pub fn search(
        &self,
        query_text: &str,
        k: Option<usize>,
    ) -> Result<RetrievalResponse, PipelineError> {
        let k = k.unwrap_or(self.default_k);
        let query_vector = self.embedder.embed(query_text)?;
        let hits = self.store.query(&query_vector, k)?;

        info!(
            query = query_text,
            hits = hits.len(),
            k,
            "retrieval query served"
        );

        let results = hits
            .into_iter()
            .map(|hit| RetrievedChunk {
                chunk_id: hit.chunk_id,
                distance: hit.distance,
                complaint_id: hit.metadata.complaint_id,
                company: hit.metadata.company,
                product: hit.metadata.product,
                issue: hit.metadata.issue,
                state: hit.metadata.state,
                date_received: hit.metadata.date_received,
                text: hit.metadata.text,
            })
            .collect();

        Ok(RetrievalResponse {
            query: query_text.to_string(),
            model_id: self.embedder.id().to_string(),
            store_record_count: self.store.len(),
            requested_results_count: k,
            results,
        })
    }
}
