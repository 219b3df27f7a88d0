//! RocksDB-backed document store.
//!
//! Column families:
//! - `documents` — current state per document id (bincode `StoredDocument`)
//! - `history`   — append-only audit log, keyed `doc_id:version`
//!
//! The store is shared behind an `Arc` and safe for concurrent calls from
//! independent sessions; RocksDB serialises the writes.

use std::path::PathBuf;
use std::time::SystemTime;

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, Direction, IteratorMode, Options, SingleThreaded,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CF_DOCUMENTS: &str = "documents";
const CF_HISTORY: &str = "history";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_HISTORY];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory.
    pub path: PathBuf,
    /// Block cache size in bytes.
    pub block_cache_size: usize,
    /// Bloom filter bits per key.
    pub bloom_filter_bits: f64,
    /// Max open files for RocksDB.
    pub max_open_files: i32,
    /// Write buffer size per column family.
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("tandem_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10.0,
            max_open_files: 512,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests against a temp directory.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10.0,
            max_open_files: 64,
            write_buffer_size: 1024 * 1024,
        }
    }
}

/// Persisted state of one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub content: String,
    pub version: u64,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub updated_at: u64,
}

/// One entry of the append-only audit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub content: String,
    pub author: String,
    pub version: u64,
    pub saved_at: u64,
}

/// Storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// The document store.
pub struct DocumentStore {
    // Single-threaded mode: concurrency is handled by RocksDB's internal
    // locking for reads/writes, sessions never create column families.
    db: DBWithThreadMode<SingleThreaded>,
}

impl DocumentStore {
    /// Open (or create) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(
            std::thread::available_parallelism().map_or(2, |n| n.get() as i32),
        );

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self { db })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits, false);
        opts.set_block_based_table_factory(&block_opts);

        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("missing column family {name}")))
    }

    /// Load a document by id.
    pub fn load(&self, id: &str) -> Result<StoredDocument, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(cf, id.as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(id.to_string())),
        }
    }

    /// Create a fresh document record at version 0.
    pub fn create(&self, id: &str, content: &str) -> Result<StoredDocument, StoreError> {
        let now = now_secs();
        let doc = StoredDocument {
            content: content.to_string(),
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let cf = self.cf(CF_DOCUMENTS)?;
        self.db.put_cf(cf, id.as_bytes(), encode(&doc)?)?;
        Ok(doc)
    }

    /// Write the current content and version, preserving `created_at`.
    pub fn update(&self, id: &str, content: &str, version: u64) -> Result<(), StoreError> {
        let created_at = match self.load(id) {
            Ok(existing) => existing.created_at,
            Err(StoreError::NotFound(_)) => now_secs(),
            Err(e) => return Err(e),
        };
        let doc = StoredDocument {
            content: content.to_string(),
            version,
            created_at,
            updated_at: now_secs(),
        };
        let cf = self.cf(CF_DOCUMENTS)?;
        self.db.put_cf(cf, id.as_bytes(), encode(&doc)?)?;
        Ok(())
    }

    /// Append an audit log entry for a saved version.
    pub fn append_history(
        &self,
        id: &str,
        content: &str,
        author: &str,
        version: u64,
    ) -> Result<(), StoreError> {
        let record = HistoryRecord {
            content: content.to_string(),
            author: author.to_string(),
            version,
            saved_at: now_secs(),
        };
        let cf = self.cf(CF_HISTORY)?;
        let key = history_key(id, version);
        self.db.put_cf(cf, key.as_bytes(), encode(&record)?)?;
        Ok(())
    }

    /// Audit log entries for one document, oldest first.
    pub fn document_history(&self, id: &str) -> Result<Vec<HistoryRecord>, StoreError> {
        let cf = self.cf(CF_HISTORY)?;
        let prefix = format!("{id}:");
        let mut records = Vec::new();
        for item in self.db.iterator_cf(
            cf,
            IteratorMode::From(prefix.as_bytes(), Direction::Forward),
        ) {
            let (key, value) = item?;
            let Some(rest) = key.strip_prefix(prefix.as_bytes()) else {
                break;
            };
            // Another document id sharing the prefix ("a" vs "a:b") would
            // leave non-digits after the separator.
            if !rest.iter().all(u8::is_ascii_digit) {
                continue;
            }
            records.push(decode(&value)?);
        }
        Ok(records)
    }

    /// Ids of all persisted documents.
    pub fn list_documents(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            if let Ok(id) = String::from_utf8(key.to_vec()) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Force buffered writes to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

fn history_key(id: &str, version: u64) -> String {
    // Zero-padded so lexicographic order matches version order.
    format!("{id}:{version:020}")
}
