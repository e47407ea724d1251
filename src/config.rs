use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::env;
use std::mem::size_of;

use crate::error::PipelineError;

pub type Number = f32;

pub const EPSILON: f32 = 1e-6;

/// Raw values as they come out of the layered config sources. Everything is
/// optional here; defaults and validation are applied in `Settings::load`.
#[derive(Deserialize)]
pub struct TrustvoiceConfig {
    pub data_path: Option<String>,
    pub store_path: Option<String>,
    pub dimensions: Option<usize>,
    pub label_size: Option<usize>,
    pub top_k: Option<usize>,
    pub max_chunk_len: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub model_id: Option<String>,
}

impl TrustvoiceConfig {
    pub fn try_from(config: &Config) -> Result<Self, ConfigError> {
        Ok(TrustvoiceConfig {
            data_path: config.get("data_path").ok(),
            store_path: config.get("store_path").ok(),
            dimensions: config.get("dimensions").ok(),
            label_size: config.get("label_size").ok(),
            top_k: config.get("top_k").ok(),
            max_chunk_len: config.get("max_chunk_len").ok(),
            chunk_overlap: config.get("chunk_overlap").ok(),
            model_id: config.get("model_id").ok(),
        })
    }
}

/// Resolved, validated pipeline settings shared by every command.
pub struct Settings {
    pub data_path: String,
    pub store_path: String,
    pub dimensions: usize,
    pub label_size: usize,
    pub vector_size: usize,
    pub top_k: usize,
    pub max_chunk_len: usize,
    pub chunk_overlap: usize,
    pub model_id: String,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let mut config = Config::default();
        #[allow(deprecated)]
        {
            config.merge(ConfigFile::with_name("trustvoice").required(false))?;
            config.merge(Environment::with_prefix("TRUSTVOICE"))?;
        }

        let raw = TrustvoiceConfig::try_from(&config)?;

        let data_path = raw
            .data_path
            .or_else(|| env::var("TRUSTVOICE_DATA_PATH").ok())
            .unwrap_or_else(|| "data/cfpb_complaints.csv".to_string());

        let store_path = raw
            .store_path
            .or_else(|| env::var("TRUSTVOICE_STORE_PATH").ok())
            .context("TRUSTVOICE_STORE_PATH not set in config or environment")?;

        let dimensions = raw.dimensions.unwrap_or(384);
        let label_size = raw.label_size.unwrap_or(64);
        let top_k = raw.top_k.unwrap_or(5);
        let max_chunk_len = raw.max_chunk_len.unwrap_or(500);
        let chunk_overlap = raw.chunk_overlap.unwrap_or(50);
        let model_id = raw
            .model_id
            .unwrap_or_else(|| "feature-hash-v1".to_string());

        // The SIMD cosine kernel works on f32x8 lanes.
        if dimensions == 0 || dimensions % 8 != 0 {
            return Err(PipelineError::Config(format!(
                "dimensions must be a non-zero multiple of 8, got {dimensions}"
            ))
            .into());
        }
        if chunk_overlap >= max_chunk_len {
            return Err(PipelineError::Config(format!(
                "chunk_overlap ({chunk_overlap}) must be smaller than max_chunk_len ({max_chunk_len})"
            ))
            .into());
        }
        // Chunk ids look like "<row>:<chunk index>" and must fit the padded
        // label slot with room for the trailing zero byte.
        if label_size < 16 {
            return Err(PipelineError::Config(format!(
                "label_size must be at least 16 bytes, got {label_size}"
            ))
            .into());
        }

        let vector_size = dimensions * size_of::<Number>();

        Ok(Self {
            data_path,
            store_path,
            dimensions,
            label_size,
            vector_size,
            top_k,
            max_chunk_len,
            chunk_overlap,
            model_id,
        })
    }

    pub fn print_config(&self) {
        println!("data_path={}", self.data_path);
        println!("store_path={}", self.store_path);
        println!("dimensions={}", self.dimensions);
        println!("label_size={}", self.label_size);
        println!("vector_size={}", self.vector_size);
        println!("top_k={}", self.top_k);
        println!("max_chunk_len={}", self.max_chunk_len);
        println!("chunk_overlap={}", self.chunk_overlap);
        println!("model_id={}", self.model_id);
    }
}
