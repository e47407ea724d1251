use std::fs::{self, OpenOptions};
use std::io::Write;
use std::mem::size_of;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use heed::types::*;
use heed::EnvOpenOptions;
use memmap2::Mmap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Number;
use crate::error::PipelineError;
use crate::vector_ops::{cosine_distance_simd, normalize_vector};

const META_KEY: &str = "__trustvoice_meta__";
const RECORDS_FILE: &str = "records.bin";
const LMDB_DIR: &str = "entries_lmdb";
const LMDB_MAP_SIZE: usize = 1024 * 1024 * 1024; // 1GB

/// Complaint provenance carried with every stored chunk and returned on every
/// query hit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub complaint_id: usize,
    pub chunk_index: usize,
    pub char_offset: usize,
    pub company: String,
    pub product: String,
    pub issue: String,
    pub state: String,
    pub date_received: String,
    pub text: String,
}

/// Full entry as kept in LMDB, keyed by chunk id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEntry {
    pub chunk_id: String,
    pub vector: Vec<Number>,
    pub metadata: ChunkMetadata,
}

/// Store-wide parameters fixed at creation time. Reopening with different
/// values is a configuration error and the process must not serve queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct StoreMeta {
    dimensions: usize,
    model_id: String,
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: PathBuf,
    pub dimensions: usize,
    pub label_size: usize,
    pub model_id: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub distance: Number,
    pub metadata: ChunkMetadata,
}

#[derive(Debug)]
struct LmdbWrapper {
    env: heed::Env,
    db: heed::Database<Str, SerdeBincode<Vec<u8>>>,
}

impl LmdbWrapper {
    fn new(path: &Path) -> Result<Self, PipelineError> {
        fs::create_dir_all(path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(LMDB_MAP_SIZE)
                .max_dbs(1)
                .open(path)
                .map_err(|e| {
                    PipelineError::Store(format!(
                        "failed to open LMDB environment at '{}': {e}",
                        path.display()
                    ))
                })?
        };

        let mut wtxn = env
            .write_txn()
            .map_err(|e| PipelineError::Store(format!("LMDB write transaction: {e}")))?;
        let db: heed::Database<Str, SerdeBincode<Vec<u8>>> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| PipelineError::Store(format!("LMDB create database: {e}")))?;
        wtxn.commit()
            .map_err(|e| PipelineError::Store(format!("LMDB commit: {e}")))?;

        Ok(Self { env, db })
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<(), PipelineError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| PipelineError::Store(format!("LMDB write transaction: {e}")))?;
        self.db
            .put(&mut wtxn, key, &value.to_vec())
            .map_err(|e| PipelineError::Store(format!("LMDB put '{key}': {e}")))?;
        wtxn.commit()
            .map_err(|e| PipelineError::Store(format!("LMDB commit: {e}")))?;
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PipelineError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| PipelineError::Store(format!("LMDB read transaction: {e}")))?;
        let value = self
            .db
            .get(&rtxn, key)
            .map_err(|e| PipelineError::Store(format!("LMDB get '{key}': {e}")))?;
        Ok(value.map(|v| v.to_vec()))
    }
}

/// Write-once, read-many store of (vector, metadata) pairs.
///
/// Layout follows the append-only record file + LMDB pairing: the record file
/// is memory-mapped and scanned for queries (vector bytes, zero-padded chunk-id
/// label, u32 metadata length, metadata JSON per record); LMDB holds the same
/// entries keyed by chunk id for direct lookup plus the store meta record.
#[derive(Debug)]
pub struct VectorStore {
    mmap: Arc<Mmap>,
    offsets: Vec<usize>,
    records_path: PathBuf,
    dimensions: usize,
    vector_size: usize,
    label_size: usize,
    lmdb: LmdbWrapper,
}

impl VectorStore {
    /// Open or create a store at `options.path`. A dimensionality or model
    /// mismatch against an existing store is a fatal configuration error.
    pub fn open(options: &StoreOptions) -> Result<Self, PipelineError> {
        fs::create_dir_all(&options.path)?;

        let lmdb = LmdbWrapper::new(&options.path.join(LMDB_DIR))?;

        let meta = StoreMeta {
            dimensions: options.dimensions,
            model_id: options.model_id.clone(),
        };
        match lmdb.get(META_KEY)? {
            Some(bytes) => {
                let existing: StoreMeta = bincode::deserialize(&bytes)
                    .map_err(|e| PipelineError::Store(format!("corrupt store meta: {e}")))?;
                if existing != meta {
                    return Err(PipelineError::Config(format!(
                        "store at '{}' was built with dimensions={} model='{}', \
                         configured dimensions={} model='{}'",
                        options.path.display(),
                        existing.dimensions,
                        existing.model_id,
                        meta.dimensions,
                        meta.model_id
                    )));
                }
            }
            None => {
                let bytes = bincode::serialize(&meta)
                    .map_err(|e| PipelineError::Store(format!("serialize store meta: {e}")))?;
                lmdb.put(META_KEY, &bytes)?;
            }
        }

        let records_path = options.path.join(RECORDS_FILE);
        let vector_size = options.dimensions * size_of::<Number>();

        let mut store = Self {
            mmap: Arc::new(Self::map_file(&records_path)?),
            offsets: Vec::new(),
            records_path,
            dimensions: options.dimensions,
            vector_size,
            label_size: options.label_size,
            lmdb,
        };
        store.offsets = store.build_offsets()?;
        debug!(records = store.len(), path = %options.path.display(), "opened vector store");
        Ok(store)
    }

    fn map_file(path: &Path) -> Result<Mmap, PipelineError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(|e| {
                PipelineError::Store(format!(
                    "failed to open record file '{}': {e}",
                    path.display()
                ))
            })?;
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| PipelineError::Store(format!("failed to mmap record file: {e}")))?;
        Ok(mmap)
    }

    fn build_offsets(&self) -> Result<Vec<usize>, PipelineError> {
        let mut offsets = Vec::new();
        let mut pos = 0;
        let header = self.vector_size + self.label_size;
        let mmap_len = self.mmap.len();

        while pos < mmap_len {
            if pos + header + 4 > mmap_len {
                return Err(PipelineError::Store(format!(
                    "truncated record at byte {pos}"
                )));
            }
            offsets.push(pos);
            let length_bytes: [u8; 4] = self.mmap[pos + header..pos + header + 4]
                .try_into()
                .expect("slice is exactly 4 bytes");
            let metadata_length = u32::from_le_bytes(length_bytes) as usize;
            pos += header + 4 + metadata_length;
        }
        if pos != mmap_len {
            return Err(PipelineError::Store(format!(
                "record file ends mid-record at byte {mmap_len}"
            )));
        }

        Ok(offsets)
    }

    /// Remap the record file after a batch of inserts so queries see them.
    pub fn refresh(&mut self) -> Result<(), PipelineError> {
        self.mmap = Arc::new(Self::map_file(&self.records_path)?);
        self.offsets = self.build_offsets()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Append one (vector, metadata) pair. Vectors are L2-normalized before
    /// storage. Returns false (and leaves the store untouched) for a
    /// duplicate chunk id.
    pub fn insert(
        &self,
        chunk_id: &str,
        vector: &[Number],
        metadata: &ChunkMetadata,
    ) -> Result<bool, PipelineError> {
        if vector.len() != self.dimensions {
            return Err(PipelineError::Config(format!(
                "vector dimension mismatch: store holds {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        if chunk_id == META_KEY {
            return Err(PipelineError::Store(format!(
                "chunk id '{chunk_id}' is reserved"
            )));
        }
        if self.lmdb.get(chunk_id)?.is_some() {
            warn!(chunk_id, "duplicate chunk id, skipping");
            return Ok(false);
        }

        let mut normalized = vector.to_vec();
        normalize_vector(&mut normalized);

        let record = self.serialize_record(chunk_id, &normalized, metadata)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.records_path)
            .map_err(|e| {
                PipelineError::Store(format!(
                    "failed to open record file '{}': {e}",
                    self.records_path.display()
                ))
            })?;
        file.write_all(&record)
            .map_err(|e| PipelineError::Store(format!("failed to append record: {e}")))?;

        let entry = StoredEntry {
            chunk_id: chunk_id.to_string(),
            vector: normalized,
            metadata: metadata.clone(),
        };
        let bytes = bincode::serialize(&entry)
            .map_err(|e| PipelineError::Store(format!("serialize entry: {e}")))?;
        self.lmdb.put(chunk_id, &bytes)?;

        Ok(true)
    }

    fn serialize_record(
        &self,
        chunk_id: &str,
        vector: &[Number],
        metadata: &ChunkMetadata,
    ) -> Result<Vec<u8>, PipelineError> {
        let label_bytes = chunk_id.as_bytes();
        if label_bytes.len() >= self.label_size {
            return Err(PipelineError::Config(format!(
                "chunk id '{chunk_id}' is too long (max {} bytes)",
                self.label_size - 1
            )));
        }

        let mut record = Vec::with_capacity(self.vector_size + self.label_size + 64);
        record.extend(vector.iter().flat_map(|&num| num.to_le_bytes()));
        record.extend(label_bytes);
        record.resize(self.vector_size + self.label_size, 0);

        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| PipelineError::Store(format!("serialize metadata: {e}")))?;
        let metadata_bytes = metadata_json.as_bytes();
        record.extend(&(metadata_bytes.len() as u32).to_le_bytes());
        record.extend(metadata_bytes);

        Ok(record)
    }

    fn vector_at(&self, index: usize) -> Result<Vec<Number>, PipelineError> {
        let start = self.offsets[index];
        let end = start + self.vector_size;
        let vector = self.mmap[start..end]
            .chunks_exact(size_of::<Number>())
            .map(|b| Number::from_le_bytes(b.try_into().expect("chunk is 4 bytes")))
            .collect();
        Ok(vector)
    }

    fn label_at(&self, index: usize) -> Result<String, PipelineError> {
        let start = self.offsets[index] + self.vector_size;
        let label_bytes = &self.mmap[start..start + self.label_size];
        let label_end = label_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.label_size);
        Ok(String::from_utf8_lossy(&label_bytes[..label_end]).to_string())
    }

    fn metadata_at(&self, index: usize) -> Result<ChunkMetadata, PipelineError> {
        let start = self.offsets[index] + self.vector_size + self.label_size;
        let length_bytes: [u8; 4] = self.mmap[start..start + 4]
            .try_into()
            .expect("slice is exactly 4 bytes");
        let metadata_length = u32::from_le_bytes(length_bytes) as usize;
        let json = std::str::from_utf8(&self.mmap[start + 4..start + 4 + metadata_length])
            .map_err(|e| PipelineError::Store(format!("corrupt metadata at record {index}: {e}")))?;
        serde_json::from_str(json)
            .map_err(|e| PipelineError::Store(format!("corrupt metadata at record {index}: {e}")))
    }

    /// Direct lookup by chunk id.
    pub fn get(&self, chunk_id: &str) -> Result<Option<StoredEntry>, PipelineError> {
        match self.lmdb.get(chunk_id)? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes).map_err(|e| {
                PipelineError::Store(format!("corrupt entry '{chunk_id}': {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// All stored chunk ids in insertion order.
    pub fn chunk_ids(&self) -> Result<Vec<String>, PipelineError> {
        (0..self.len()).map(|i| self.label_at(i)).collect()
    }

    /// Exact nearest-neighbor scan: at most `k` hits ordered by ascending
    /// cosine distance, ties broken by ascending chunk id. An empty store
    /// returns an empty result.
    pub fn query(&self, query_vector: &[Number], k: usize) -> Result<Vec<SearchHit>, PipelineError> {
        if query_vector.len() != self.dimensions {
            return Err(PipelineError::Config(format!(
                "query vector dimension mismatch: store holds {}, got {}",
                self.dimensions,
                query_vector.len()
            )));
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut normalized = query_vector.to_vec();
        normalize_vector(&mut normalized);

        let mut hits = (0..self.len())
            .into_par_iter()
            .map(|i| -> Result<SearchHit, PipelineError> {
                let vector = self.vector_at(i)?;
                let chunk_id = self.label_at(i)?;
                let metadata = self.metadata_at(i)?;
                let distance = cosine_distance_simd(&normalized, &vector).ok_or_else(|| {
                    PipelineError::Store(format!("stored vector {i} has wrong length"))
                })?;
                Ok(SearchHit {
                    chunk_id,
                    distance,
                    metadata,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        hits.sort_unstable_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(k);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(dir: &TempDir, dimensions: usize) -> StoreOptions {
        StoreOptions {
            path: dir.path().join("store"),
            dimensions,
            label_size: 64,
            model_id: "feature-hash-v1".to_string(),
        }
    }

    fn metadata(complaint_id: usize, text: &str) -> ChunkMetadata {
        ChunkMetadata {
            complaint_id,
            chunk_index: 0,
            char_offset: 0,
            company: "Acme Bank".to_string(),
            product: "Credit card".to_string(),
            issue: "Billing dispute".to_string(),
            state: "CA".to_string(),
            date_received: "2023-01-15".to_string(),
            text: text.to_string(),
        }
    }

    fn basis_vector(dimensions: usize, axis: usize) -> Vec<Number> {
        let mut v = vec![0.0; dimensions];
        v[axis] = 1.0;
        v
    }

    #[test]
    fn empty_store_query_returns_no_hits() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(&options(&dir, 16)).unwrap();
        let hits = store.query(&basis_vector(16, 0), 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn query_orders_by_ascending_distance_and_caps_at_k() {
        let dir = TempDir::new().unwrap();
        let mut store = VectorStore::open(&options(&dir, 16)).unwrap();

        // 0:0 aligned with the query, 1:0 orthogonal, 2:0 opposite.
        store
            .insert("0:0", &basis_vector(16, 0), &metadata(0, "aligned"))
            .unwrap();
        store
            .insert("1:0", &basis_vector(16, 1), &metadata(1, "orthogonal"))
            .unwrap();
        let mut opposite = basis_vector(16, 0);
        opposite[0] = -1.0;
        store.insert("2:0", &opposite, &metadata(2, "opposite")).unwrap();
        store.refresh().unwrap();

        let hits = store.query(&basis_vector(16, 0), 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "0:0");
        assert_eq!(hits[1].chunk_id, "1:0");
        assert!(hits[0].distance <= hits[1].distance);

        let all = store.query(&basis_vector(16, 0), 10).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
    }

    #[test]
    fn equal_distances_tie_break_by_chunk_id() {
        let dir = TempDir::new().unwrap();
        let mut store = VectorStore::open(&options(&dir, 16)).unwrap();
        let v = basis_vector(16, 3);
        store.insert("5:1", &v, &metadata(5, "b")).unwrap();
        store.insert("5:0", &v, &metadata(5, "a")).unwrap();
        store.refresh().unwrap();

        let hits = store.query(&v, 2).unwrap();
        assert_eq!(hits[0].chunk_id, "5:0");
        assert_eq!(hits[1].chunk_id, "5:1");
    }

    #[test]
    fn insert_rejects_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(&options(&dir, 16)).unwrap();
        let err = store
            .insert("0:0", &basis_vector(8, 0), &metadata(0, "short"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn query_rejects_dimension_mismatch() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(&options(&dir, 16)).unwrap();
        let err = store.query(&basis_vector(8, 0), 3).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn reopening_with_different_dimensions_is_fatal() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 16);
        drop(VectorStore::open(&opts).unwrap());

        let mut changed = opts.clone();
        changed.dimensions = 32;
        let err = VectorStore::open(&changed).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn reopening_with_different_model_is_fatal() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 16);
        drop(VectorStore::open(&opts).unwrap());

        let mut changed = opts.clone();
        changed.model_id = "feature-hash-v2".to_string();
        assert!(VectorStore::open(&changed).is_err());
    }

    #[test]
    fn duplicate_chunk_ids_are_skipped() {
        let dir = TempDir::new().unwrap();
        let mut store = VectorStore::open(&options(&dir, 16)).unwrap();
        assert!(store
            .insert("0:0", &basis_vector(16, 0), &metadata(0, "first"))
            .unwrap());
        assert!(!store
            .insert("0:0", &basis_vector(16, 1), &metadata(0, "second"))
            .unwrap());
        store.refresh().unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 16);
        {
            let store = VectorStore::open(&opts).unwrap();
            store
                .insert("0:0", &basis_vector(16, 2), &metadata(0, "persisted"))
                .unwrap();
        }

        let store = VectorStore::open(&opts).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.chunk_ids().unwrap(), vec!["0:0".to_string()]);

        let entry = store.get("0:0").unwrap().unwrap();
        assert_eq!(entry.metadata.text, "persisted");

        let hits = store.query(&basis_vector(16, 2), 1).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.company, "Acme Bank");
        assert!(hits[0].distance.abs() < 1e-5);
    }

    #[test]
    fn metadata_round_trips_through_the_record_file() {
        let dir = TempDir::new().unwrap();
        let mut store = VectorStore::open(&options(&dir, 16)).unwrap();
        let m = metadata(9, "the bank charged me twice");
        store.insert("9:0", &basis_vector(16, 1), &m).unwrap();
        store.refresh().unwrap();

        let hits = store.query(&basis_vector(16, 1), 1).unwrap();
        assert_eq!(hits[0].metadata, m);
    }

    #[test]
    fn overlong_chunk_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = VectorStore::open(&options(&dir, 16)).unwrap();
        let long_id = "x".repeat(64);
        let err = store
            .insert(&long_id, &basis_vector(16, 0), &metadata(0, "t"))
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
