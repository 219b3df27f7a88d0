//! Durable document storage.
//!
//! ```text
//! ┌────────────┐   save_if_dirty    ┌───────────────┐
//! │  Session   │ ─────────────────► │ DocumentStore │
//! │ (in-memory)│                    │   (RocksDB)   │
//! └─────┬──────┘                    └──────┬────────┘
//!       │ first attach                     │ column families
//!       ▼                                  ▼
//! ┌────────────┐        ┌─────────────────────────────────────┐
//! │ Document   │        │ CF "documents" — content + version   │
//! │ Engine     │        │ CF "history"   — append-only audit   │
//! └────────────┘        └─────────────────────────────────────┘
//! ```
//!
//! Sessions load on first reference, a background tick flushes dirty
//! sessions, and shutdown performs a final synchronous flush.

pub mod rocks;

pub use rocks::{DocumentStore, HistoryRecord, StoreConfig, StoreError, StoredDocument};
