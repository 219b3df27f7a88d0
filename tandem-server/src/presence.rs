//! Per-document presence: who is where.
//!
//! Tracks cursor positions and selection ranges keyed by client id. The
//! tracker is plain data owned by a session, which serialises access; all
//! reads exclude a nominated client so a peer never sees its own echo.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::protocol::{CursorInfo, SelectionInfo};

#[derive(Debug, Clone)]
struct CursorState {
    username: String,
    color: String,
    position: usize,
    updated_at: Instant,
}

#[derive(Debug, Clone)]
struct SelectionState {
    username: String,
    color: String,
    start: usize,
    end: usize,
}

/// Cursor and selection registry for one document.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    cursors: HashMap<String, CursorState>,
    selections: HashMap<String, SelectionState>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update_cursor(&mut self, client_id: &str, username: &str, color: &str, position: usize) {
        self.cursors.insert(
            client_id.to_string(),
            CursorState {
                username: username.to_string(),
                color: color.to_string(),
                position,
                updated_at: Instant::now(),
            },
        );
    }

    /// Record a selection. An empty range (`start == end`) clears the
    /// entry; returns false in that case so callers can emit a clearing
    /// frame.
    pub fn update_selection(
        &mut self,
        client_id: &str,
        username: &str,
        color: &str,
        start: usize,
        end: usize,
    ) -> bool {
        if start == end {
            self.selections.remove(client_id);
            return false;
        }
        self.selections.insert(
            client_id.to_string(),
            SelectionState {
                username: username.to_string(),
                color: color.to_string(),
                start,
                end,
            },
        );
        true
    }

    /// Drop every trace of a client.
    pub fn remove_client(&mut self, client_id: &str) {
        self.cursors.remove(client_id);
        self.selections.remove(client_id);
    }

    /// All cursors except the requesting client's. Order is unspecified.
    pub fn cursors_except(&self, exclude: &str) -> Vec<CursorInfo> {
        self.cursors
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .map(|(id, c)| CursorInfo {
                client_id: id.clone(),
                username: c.username.clone(),
                color: c.color.clone(),
                position: c.position,
            })
            .collect()
    }

    /// All selections except the requesting client's.
    pub fn selections_except(&self, exclude: &str) -> Vec<SelectionInfo> {
        self.selections
            .iter()
            .filter(|(id, _)| id.as_str() != exclude)
            .map(|(id, s)| SelectionInfo {
                client_id: id.clone(),
                username: s.username.clone(),
                color: s.color.clone(),
                start: s.start,
                end: s.end,
            })
            .collect()
    }

    /// Evict clients whose cursor has not moved within `timeout`.
    ///
    /// Removes both cursor and selection for each and returns the swept
    /// ids so the caller can notify peers.
    pub fn sweep_stale(&mut self, timeout: Duration) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .cursors
            .iter()
            .filter(|(_, c)| now.duration_since(c.updated_at) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.cursors.remove(id);
            self.selections.remove(id);
        }
        stale
    }

    pub fn has_cursor(&self, client_id: &str) -> bool {
        self.cursors.contains_key(client_id)
    }

    pub fn has_selection(&self, client_id: &str) -> bool {
        self.selections.contains_key(client_id)
    }

    pub fn cursor_count(&self) -> usize {
        self.cursors.len()
    }
}
