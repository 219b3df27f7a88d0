//! Process-wide counters, exposed by `/metrics`.
//!
//! Tracked with atomics so the message hot path never takes a lock; reads
//! go through [`Metrics::snapshot`]. The struct is created once at startup
//! and shared by `Arc` — there is no global.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct Metrics {
    active_connections: AtomicI64,
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    documents_active: AtomicI64,
    documents_saved: AtomicU64,
}

/// Point-in-time copy of the counters, in the wire shape of `/metrics`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub active_connections: i64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub documents_active: i64,
    pub documents_saved: u64,
}

impl Metrics {
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn document_opened(&self) {
        self.documents_active.fetch_add(1, Ordering::Relaxed);
    }

    pub fn document_closed(&self) {
        self.documents_active.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn document_saved(&self) {
        self.documents_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_connections: self.active_connections.load(Ordering::Relaxed),
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            documents_active: self.documents_active.load(Ordering::Relaxed),
            documents_saved: self.documents_saved.load(Ordering::Relaxed),
        }
    }
}
