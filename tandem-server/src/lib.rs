//! # tandem-server — real-time collaborative text editing server
//!
//! Clients hold a WebSocket per document, submit whole-buffer updates,
//! and converge through the OT engine in `tandem-ot`.
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐
//!            ├── /ws?doc=<id> ── Connection ──► Session (per document)
//! Client B ──┘       │                             │
//!                    │                             ├── DocumentEngine (OT)
//!                 Hub (doc_id → Session)           ├── PresenceTracker
//!                    │                             └── outbound queues ──► fan-out
//!                    ▼
//!              DocumentStore (RocksDB, optional)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — JSON frame vocabulary, both directions
//! - [`session`] — per-document single-writer actor with fan-out
//! - [`presence`] — cursors, selections, stale sweep
//! - [`hub`] — process-wide session directory and lifecycle
//! - [`connection`] — per-socket reader/writer pumps and deadlines
//! - [`server`] — axum routes, maintenance tick, shutdown
//! - [`storage`] — RocksDB persistence adapter
//! - [`config`] / [`metrics`] — tunables and process-wide counters

pub mod config;
pub mod connection;
pub mod hub;
pub mod metrics;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

pub use config::ServerConfig;
pub use hub::{Hub, HubStats};
pub use metrics::{Metrics, MetricsSnapshot};
pub use presence::PresenceTracker;
pub use protocol::{ClientFrame, ProtocolError, ServerFrame};
pub use server::{build_state, router, run, AppState};
pub use session::{Participant, Session};
pub use storage::{DocumentStore, StoreConfig, StoreError, StoredDocument};
