//! Retrieval pipeline over consumer-complaint narratives: CSV loading,
//! character chunking, deterministic embeddings, and an exact
//! nearest-neighbor vector store.

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod loader;
pub mod retrieval;
pub mod store;
pub mod vector_ops;
