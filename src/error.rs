use thiserror::Error;

/// Classified failures of the retrieval pipeline.
///
/// `Validation` and `Config` are caller mistakes (bad input data, bad
/// parameter combinations); `Unavailable` means the embedding model could not
/// be reached and the caller should show a degraded-service message. Anything
/// else from the storage layer is wrapped in `Store`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("data validation failed: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("embedding model unavailable: {0}")]
    Unavailable(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
