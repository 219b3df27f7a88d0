//! Process-wide directory of live sessions.
//!
//! The hub maps document ids to sessions, creating them lazily on first
//! connect (loading from the store when persistence is on) and evicting
//! them once the last participant leaves and the document is flushed. It
//! sits off the hot path: message routing happens inside sessions, the
//! hub is only consulted on connect/disconnect and maintenance ticks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use tandem_ot::DocumentEngine;

use crate::metrics::Metrics;
use crate::protocol::ServerFrame;
use crate::session::Session;
use crate::storage::{DocumentStore, StoreError};

/// Hub statistics for `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct HubStats {
    pub documents: usize,
    pub participants: usize,
    pub documents_detail: HashMap<String, usize>,
}

pub struct Hub {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    store: Option<Arc<DocumentStore>>,
    metrics: Arc<Metrics>,
}

impl Hub {
    pub fn new(store: Option<Arc<DocumentStore>>, metrics: Arc<Metrics>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            store,
            metrics,
        }
    }

    pub fn store(&self) -> Option<&Arc<DocumentStore>> {
        self.store.as_ref()
    }

    /// Return the session for `doc_id`, creating it on first reference.
    ///
    /// Creation loads the document from the store; an unknown id starts an
    /// empty document and registers it. A load failure on an existing
    /// document propagates to the caller.
    pub async fn get_or_create(&self, doc_id: &str) -> Result<Arc<Session>, StoreError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(doc_id) {
                return Ok(session.clone());
            }
        }

        let mut sessions = self.sessions.write().await;
        // Another connection may have created it while we waited.
        if let Some(session) = sessions.get(doc_id) {
            return Ok(session.clone());
        }

        let engine = match &self.store {
            Some(store) => match store.load(doc_id) {
                Ok(doc) => {
                    log::info!(
                        "loaded document {doc_id} from store (version {})",
                        doc.version
                    );
                    DocumentEngine::with_content(doc.content, doc.version)
                }
                Err(StoreError::NotFound(_)) => {
                    store.create(doc_id, "")?;
                    DocumentEngine::new()
                }
                Err(e) => return Err(e),
            },
            None => DocumentEngine::new(),
        };

        let session = Arc::new(Session::new(doc_id, engine, self.metrics.clone()));
        sessions.insert(doc_id.to_string(), session.clone());
        self.metrics.document_opened();
        log::info!("session created for document {doc_id}");
        Ok(session)
    }

    /// Look up an existing session without creating one.
    pub async fn get(&self, doc_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(doc_id).cloned()
    }

    /// Detach a client; flush and evict the session if it became empty.
    pub async fn unregister(&self, doc_id: &str, client_id: &str) {
        let Some(session) = self.get(doc_id).await else {
            return;
        };
        session.detach(client_id).await;

        if session.participant_count().await > 0 {
            return;
        }
        if let Some(store) = &self.store {
            if let Err(e) = session.save_if_dirty(store, Duration::ZERO).await {
                log::error!("final save of {doc_id} failed: {e}");
            }
        }
        let mut sessions = self.sessions.write().await;
        // A new participant may have attached while we were saving.
        if let Some(current) = sessions.get(doc_id) {
            if current.participant_count().await == 0 {
                sessions.remove(doc_id);
                self.metrics.document_closed();
                log::info!("session for document {doc_id} removed (empty)");
            }
        }
    }

    /// Flush every dirty session that has been quiet long enough.
    pub async fn save_dirty(&self, quiescence: Duration) {
        let Some(store) = &self.store else {
            return;
        };
        let sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            if let Err(e) = session.save_if_dirty(store, quiescence).await {
                log::error!("auto-save of {} failed: {e}", session.doc_id());
            }
        }
    }

    /// Drop stale presence in every session.
    pub async fn sweep_presence(&self, timeout: Duration) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.sweep_presence(timeout).await;
        }
    }

    /// Fan one frame out to every participant of every session.
    pub async fn broadcast_all(&self, frame: &ServerFrame) {
        let sessions: Vec<Arc<Session>> =
            self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            session.broadcast_all(frame).await;
        }
    }

    /// Orderly teardown: flush every dirty session, then close all
    /// outbound queues so writer tasks terminate.
    pub async fn shutdown_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.write().await;
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            if let Some(store) = &self.store {
                if let Err(e) = session.save_if_dirty(store, Duration::ZERO).await {
                    log::error!("shutdown save of {} failed: {e}", session.doc_id());
                }
            }
            session.close_all().await;
            self.metrics.document_closed();
        }
        log::info!("hub shutdown complete");
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn stats(&self) -> HubStats {
        let sessions = self.sessions.read().await;
        let mut detail = HashMap::new();
        let mut participants = 0;
        for (doc_id, session) in sessions.iter() {
            let count = session.participant_count().await;
            participants += count;
            detail.insert(doc_id.clone(), count);
        }
        HubStats {
            documents: sessions.len(),
            participants,
            documents_detail: detail,
        }
    }
}
