//! Per-document session: the single-writer boundary.
//!
//! A session owns the document engine, the presence tracker, and the set
//! of attached participants. Every mutation happens under one mutex, so
//! per-document state is serialised no matter how many connections feed
//! it. Fan-out enqueues pre-encoded frames on each participant's bounded
//! outbound queue; a full queue evicts that participant on the spot —
//! slow consumers are dropped, never waited on.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;
use tokio::sync::Mutex;

use tandem_ot::DocumentEngine;

use crate::metrics::Metrics;
use crate::presence::PresenceTracker;
use crate::protocol::{
    CursorInfo, SaveInfo, SelectionInfo, ServerFrame, UserInfo, UserRef,
};
use crate::storage::{DocumentStore, StoreError};

/// Pre-encoded outbound frame, shared across receivers.
pub type OutboundFrame = Arc<str>;

/// One attached client, as the session sees it.
#[derive(Debug, Clone)]
pub struct Participant {
    pub client_id: String,
    pub username: String,
    pub color: String,
    sender: mpsc::Sender<OutboundFrame>,
}

impl Participant {
    pub fn new(
        client_id: impl Into<String>,
        username: impl Into<String>,
        color: impl Into<String>,
        sender: mpsc::Sender<OutboundFrame>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            username: username.into(),
            color: color.into(),
            sender,
        }
    }

    fn user_info(&self) -> UserInfo {
        UserInfo {
            user_id: self.client_id.clone(),
            username: self.username.clone(),
            color: self.color.clone(),
        }
    }
}

struct SessionState {
    engine: DocumentEngine,
    presence: PresenceTracker,
    participants: HashMap<String, Participant>,
    dirty: bool,
    last_saved: Instant,
    updated_at: Instant,
}

/// The per-document coordinator.
pub struct Session {
    doc_id: String,
    created_at: SystemTime,
    state: Mutex<SessionState>,
    metrics: Arc<Metrics>,
}

impl Session {
    pub fn new(doc_id: impl Into<String>, engine: DocumentEngine, metrics: Arc<Metrics>) -> Self {
        Self {
            doc_id: doc_id.into(),
            created_at: SystemTime::now(),
            state: Mutex::new(SessionState {
                engine,
                presence: PresenceTracker::new(),
                participants: HashMap::new(),
                dirty: false,
                last_saved: Instant::now(),
                updated_at: Instant::now(),
            }),
            metrics,
        }
    }

    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    /// Add a participant: greet it with `init`, the document snapshot and
    /// the roster, then announce it to everyone else.
    pub async fn attach(&self, participant: Participant) {
        let mut s = self.state.lock().await;

        let joined = ServerFrame::UserJoined {
            client_id: participant.client_id.clone(),
            document_id: self.doc_id.clone(),
            data: participant.user_info(),
        };

        self.send_to(
            &participant,
            &ServerFrame::Init {
                client_id: participant.client_id.clone(),
                data: participant.user_info(),
            },
        );
        let (content, version) = s.engine.snapshot();
        self.send_to(
            &participant,
            &ServerFrame::DocumentState {
                content: content.to_string(),
                version,
                doc_id: self.doc_id.clone(),
            },
        );

        let client_id = participant.client_id.clone();
        s.participants.insert(client_id.clone(), participant);

        let roster = ServerFrame::ActiveUsers {
            data: Self::roster_locked(&s),
        };
        if let Some(p) = s.participants.get(&client_id) {
            self.send_to(p, &roster);
        }

        self.broadcast(&mut s, &joined, Some(&client_id));
        log::info!(
            "client {client_id} joined document {} ({} participants)",
            self.doc_id,
            s.participants.len()
        );
    }

    /// Remove a participant and tell the survivors. Idempotent.
    pub async fn detach(&self, client_id: &str) {
        let mut s = self.state.lock().await;
        if s.participants.remove(client_id).is_none() {
            return;
        }
        s.presence.remove_client(client_id);

        self.broadcast(&mut s, &ServerFrame::cursor_remove(client_id), None);
        let left = self.user_left_frame(client_id);
        self.broadcast(&mut s, &left, None);
        log::info!(
            "client {client_id} left document {} ({} participants)",
            self.doc_id,
            s.participants.len()
        );
    }

    /// Run a whole-buffer update through the engine and fan out the result.
    pub async fn handle_text_update(&self, client_id: &str, client_version: u64, content: &str) {
        let mut s = self.state.lock().await;
        match s.engine.process_update(client_id, content, client_version) {
            Ok(update) => {
                if update.changed {
                    s.dirty = true;
                    s.updated_at = Instant::now();
                    let frame = ServerFrame::TextUpdate {
                        client_id: client_id.to_string(),
                        document_id: self.doc_id.clone(),
                        content: update.content,
                        version: update.version,
                    };
                    self.broadcast(&mut s, &frame, Some(client_id));
                }
                let ack = ServerFrame::UpdateAck {
                    document_id: self.doc_id.clone(),
                    version: update.version,
                };
                if let Some(p) = s.participants.get(client_id) {
                    self.send_to(p, &ack);
                }
            }
            Err(e) => {
                log::warn!(
                    "rejected update from {client_id} on {}: {e}",
                    self.doc_id
                );
                if let Some(p) = s.participants.get(client_id) {
                    self.send_to(p, &ServerFrame::error(e.to_string()));
                }
            }
        }
    }

    pub async fn handle_cursor(&self, client_id: &str, position: usize) {
        let mut s = self.state.lock().await;
        let Some(p) = s.participants.get(client_id) else {
            return;
        };
        let data = CursorInfo {
            client_id: client_id.to_string(),
            username: p.username.clone(),
            color: p.color.clone(),
            position,
        };
        s.presence
            .update_cursor(client_id, &data.username, &data.color, position);
        let frame = ServerFrame::CursorPosition {
            client_id: client_id.to_string(),
            document_id: self.doc_id.clone(),
            data,
        };
        self.broadcast(&mut s, &frame, Some(client_id));
    }

    /// Record a selection; `start == end` clears it, and the clearing
    /// frame is still broadcast so peers drop the highlight.
    pub async fn handle_selection(&self, client_id: &str, start: usize, end: usize) {
        let mut s = self.state.lock().await;
        let Some(p) = s.participants.get(client_id) else {
            return;
        };
        let data = SelectionInfo {
            client_id: client_id.to_string(),
            username: p.username.clone(),
            color: p.color.clone(),
            start,
            end,
        };
        s.presence
            .update_selection(client_id, &data.username, &data.color, start, end);
        let frame = ServerFrame::SelectionChange {
            client_id: client_id.to_string(),
            document_id: self.doc_id.clone(),
            data,
        };
        self.broadcast(&mut s, &frame, Some(client_id));
    }

    /// Typing indicators are relayed, never stored.
    pub async fn handle_typing(&self, client_id: &str, started: bool) {
        let mut s = self.state.lock().await;
        let Some(p) = s.participants.get(client_id) else {
            return;
        };
        let frame = if started {
            ServerFrame::TypingStart {
                client_id: client_id.to_string(),
                document_id: self.doc_id.clone(),
                data: p.user_info(),
            }
        } else {
            ServerFrame::TypingStop {
                client_id: client_id.to_string(),
                document_id: self.doc_id.clone(),
                data: UserRef {
                    user_id: client_id.to_string(),
                },
            }
        };
        self.broadcast(&mut s, &frame, Some(client_id));
    }

    /// Explicit flush requested by a client.
    pub async fn handle_save(&self, client_id: &str, store: Option<&DocumentStore>) {
        let saved = match store {
            Some(store) => match self.save_if_dirty(store, Duration::ZERO).await {
                Ok(_) => true,
                Err(e) => {
                    log::error!("save of {} failed: {e}", self.doc_id);
                    false
                }
            },
            // Memory-only mode: nothing to flush to.
            None => false,
        };
        let confirmation = ServerFrame::SaveConfirmation {
            data: SaveInfo {
                document_id: self.doc_id.clone(),
                saved,
                timestamp: SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
            },
        };
        let s = self.state.lock().await;
        if let Some(p) = s.participants.get(client_id) {
            self.send_to(p, &confirmation);
        }
    }

    /// Re-send the full document state to one client.
    pub async fn resend_state(&self, client_id: &str) {
        let s = self.state.lock().await;
        let (content, version) = s.engine.snapshot();
        let frame = ServerFrame::DocumentState {
            content: content.to_string(),
            version,
            doc_id: self.doc_id.clone(),
        };
        if let Some(p) = s.participants.get(client_id) {
            self.send_to(p, &frame);
        }
    }

    /// All tracked cursors, excluding `exclude`'s own.
    pub async fn cursors(&self, exclude: &str) -> Vec<CursorInfo> {
        self.state.lock().await.presence.cursors_except(exclude)
    }

    /// All tracked selections, excluding `exclude`'s own.
    pub async fn selections(&self, exclude: &str) -> Vec<SelectionInfo> {
        self.state.lock().await.presence.selections_except(exclude)
    }

    /// Every currently-attached participant.
    pub async fn roster(&self) -> Vec<UserInfo> {
        let s = self.state.lock().await;
        Self::roster_locked(&s)
    }

    fn roster_locked(s: &SessionState) -> Vec<UserInfo> {
        s.participants.values().map(Participant::user_info).collect()
    }

    /// Flush to storage if dirty and quiet for at least `quiescence`.
    ///
    /// Returns whether a save happened. On failure the dirty flag stays
    /// set so the next tick retries.
    pub async fn save_if_dirty(
        &self,
        store: &DocumentStore,
        quiescence: Duration,
    ) -> Result<bool, StoreError> {
        let mut s = self.state.lock().await;
        if !s.dirty || s.last_saved.elapsed() < quiescence {
            return Ok(false);
        }
        let (content, version) = s.engine.snapshot();
        let content = content.to_string();
        store.update(&self.doc_id, &content, version)?;
        store.append_history(&self.doc_id, &content, "system", version)?;
        s.dirty = false;
        s.last_saved = Instant::now();
        self.metrics.document_saved();
        log::info!("saved document {} at version {version}", self.doc_id);
        Ok(true)
    }

    /// Drop presence for idle clients and tell peers their cursors died.
    pub async fn sweep_presence(&self, timeout: Duration) {
        let mut s = self.state.lock().await;
        for client_id in s.presence.sweep_stale(timeout) {
            self.broadcast(&mut s, &ServerFrame::cursor_remove(&client_id), None);
        }
    }

    /// Broadcast one frame to every participant (used for shutdown notices).
    pub async fn broadcast_all(&self, frame: &ServerFrame) {
        let mut s = self.state.lock().await;
        self.broadcast(&mut s, frame, None);
    }

    /// Close every outbound queue, releasing the writer tasks.
    pub async fn close_all(&self) {
        let mut s = self.state.lock().await;
        s.participants.clear();
    }

    pub async fn participant_count(&self) -> usize {
        self.state.lock().await.participants.len()
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    pub async fn snapshot(&self) -> (String, u64) {
        let s = self.state.lock().await;
        let (content, version) = s.engine.snapshot();
        (content.to_string(), version)
    }

    /// Time since the document last changed.
    pub async fn idle_for(&self) -> Duration {
        self.state.lock().await.updated_at.elapsed()
    }

    fn user_left_frame(&self, client_id: &str) -> ServerFrame {
        ServerFrame::UserLeft {
            client_id: client_id.to_string(),
            document_id: self.doc_id.clone(),
            data: UserRef {
                user_id: client_id.to_string(),
            },
        }
    }

    /// Best-effort single-target send; a full queue just drops the frame
    /// (the participant will be evicted by the next broadcast if it stays
    /// wedged).
    fn send_to(&self, participant: &Participant, frame: &ServerFrame) {
        let encoded: OutboundFrame = match frame.encode() {
            Ok(text) => text.into(),
            Err(e) => {
                log::error!("failed to encode frame: {e}");
                return;
            }
        };
        match participant.sender.try_send(encoded) {
            Ok(()) => self.metrics.message_sent(),
            Err(_) => log::debug!(
                "client {} not ready, dropped direct frame",
                participant.client_id
            ),
        }
    }

    /// Encode once, enqueue on everyone except `exclude`. Participants
    /// whose queue is full (or closed) are evicted, and the eviction
    /// itself is announced to the survivors.
    fn broadcast(&self, s: &mut SessionState, frame: &ServerFrame, exclude: Option<&str>) {
        let mut pending: Vec<(ServerFrame, Option<String>)> =
            vec![(frame.clone(), exclude.map(str::to_string))];

        while let Some((frame, exclude)) = pending.pop() {
            let encoded: OutboundFrame = match frame.encode() {
                Ok(text) => text.into(),
                Err(e) => {
                    log::error!("failed to encode frame: {e}");
                    continue;
                }
            };

            let mut evicted = Vec::new();
            for (id, p) in &s.participants {
                if exclude.as_deref() == Some(id.as_str()) {
                    continue;
                }
                match p.sender.try_send(encoded.clone()) {
                    Ok(()) => self.metrics.message_sent(),
                    Err(_) => evicted.push(id.clone()),
                }
            }

            for id in evicted {
                log::warn!(
                    "evicting slow participant {id} from document {}",
                    self.doc_id
                );
                s.participants.remove(&id);
                s.presence.remove_client(&id);
                pending.push((ServerFrame::cursor_remove(&id), None));
                pending.push((self.user_left_frame(&id), None));
            }
        }
    }
}
