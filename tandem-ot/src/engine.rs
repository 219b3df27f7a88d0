//! Per-document state machine: authoritative content, monotonic version,
//! and a bounded history of applied operations.
//!
//! The engine is single-threaded by design; the enclosing session
//! serialises every call. Clients submit their whole buffer together with
//! the version they last acknowledged. The engine reconstructs the content
//! at that base version from its history window, diffs the buffer against
//! it to recover the client's edit, rebases the edit through every
//! operation the client has not seen, and applies it.
//!
//! ```text
//! window_base ──[hist v-2]──[hist v-1]──[hist v]── content
//!      ▲                                              ▲
//!      └── content_at(client_version) ── diff ── op ──┘ (rebased, applied)
//! ```

use std::collections::VecDeque;

use crate::operation::{apply, diff, transform, Operation, OtError};

/// Number of acknowledged operations retained for rebasing.
pub const DEFAULT_HISTORY_WINDOW: usize = 256;

/// Outcome of a processed update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    /// Authoritative content after the update.
    pub content: String,
    /// Authoritative version after the update.
    pub version: u64,
    /// False when the proposed buffer carried no change.
    pub changed: bool,
    /// True when the update could not be expressed as an operation and the
    /// client content overwrote the document instead.
    pub diverged: bool,
}

struct HistoryEntry {
    op: Operation,
    /// Document version this entry produced.
    version: u64,
}

/// The authoritative document.
///
/// Invariants: `version` counts the updates ever applied (divergence
/// overwrites included); history entries carry strictly increasing
/// versions; `window_base` is the content at version
/// `version - history.len()`, so replaying the window from it reproduces
/// the current content.
pub struct DocumentEngine {
    content: String,
    version: u64,
    history: VecDeque<HistoryEntry>,
    window_base: String,
    history_window: usize,
}

impl DocumentEngine {
    /// Empty document at version 0.
    pub fn new() -> Self {
        Self::with_content("", 0)
    }

    /// Restore a document loaded from storage.
    pub fn with_content(content: impl Into<String>, version: u64) -> Self {
        let content = content.into();
        Self {
            window_base: content.clone(),
            content,
            version,
            history: VecDeque::new(),
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    /// Shrink the rebase window, mainly for exercising the exhaustion path.
    pub fn with_history_window(mut self, window: usize) -> Self {
        self.history_window = window.max(1);
        self
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Current content and version.
    pub fn snapshot(&self) -> (&str, u64) {
        (&self.content, self.version)
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Process a whole-buffer update from `client`, who last acknowledged
    /// `client_version`.
    ///
    /// On an apply error the document is left untouched and the error
    /// surfaces unchanged. Updates whose base version has fallen out of
    /// the history window, or that are not a single contiguous edit,
    /// overwrite the document with the client content and are reported as
    /// diverged.
    pub fn process_update(
        &mut self,
        client: &str,
        proposed: &str,
        client_version: u64,
    ) -> Result<Update, OtError> {
        let behind = client_version < self.version;
        let base = if behind {
            match self.content_at(client_version) {
                Some(content) => content,
                None => {
                    log::warn!(
                        "divergence: client {client} at v{client_version} predates history \
                         (server v{}), overwriting",
                        self.version
                    );
                    return Ok(self.overwrite(proposed));
                }
            }
        } else {
            self.content.clone()
        };

        let op = diff(&base, proposed, client).with_version(client_version);

        if op.is_retain() {
            if proposed == base {
                // No change relative to what the client last saw.
                return Ok(Update {
                    content: self.content.clone(),
                    version: self.version,
                    changed: false,
                    diverged: false,
                });
            }
            // Equal-length replace or a non-contiguous edit: not expressible
            // as one operation, so the client content wins wholesale.
            log::warn!(
                "divergence: update from {client} (v{client_version}) is not a single edit, \
                 overwriting"
            );
            return Ok(self.overwrite(proposed));
        }

        let op = if behind {
            self.rebase(op, client_version, client)
        } else {
            op
        };

        let next = apply(&self.content, &op)?;
        self.version += 1;
        self.history.push_back(HistoryEntry {
            op,
            version: self.version,
        });
        self.content = next;
        self.trim_window();
        Ok(Update {
            content: self.content.clone(),
            version: self.version,
            changed: true,
            diverged: false,
        })
    }

    /// Version of `window_base`: the oldest version still reconstructible.
    fn window_base_version(&self) -> u64 {
        self.version - self.history.len() as u64
    }

    /// Reconstruct the content at `version` by replaying the window.
    ///
    /// `None` when the version predates the retained history.
    fn content_at(&self, version: u64) -> Option<String> {
        if version < self.window_base_version() {
            return None;
        }
        let mut content = self.window_base.clone();
        for entry in &self.history {
            if entry.version > version {
                break;
            }
            content = apply(&content, &entry.op).ok()?;
        }
        Some(content)
    }

    /// Shift the incoming operation past every retained operation the
    /// client has not seen, in application order. The client's own entries
    /// are already reflected in its buffer and are skipped.
    fn rebase(&self, mut op: Operation, client_version: u64, client: &str) -> Operation {
        for entry in &self.history {
            if entry.version <= client_version {
                continue;
            }
            if entry.op.client() == Some(client) {
                continue;
            }
            op = transform(&op, &entry.op).0;
        }
        op
    }

    fn trim_window(&mut self) {
        while self.history.len() > self.history_window {
            let Some(entry) = self.history.pop_front() else {
                break;
            };
            match apply(&self.window_base, &entry.op) {
                Ok(next) => self.window_base = next,
                Err(e) => {
                    // The window no longer replays; fall back to covering
                    // only the current version.
                    log::error!("history window inconsistent, dropping it: {e}");
                    self.history.clear();
                    self.window_base.clone_from(&self.content);
                }
            }
        }
    }

    /// Divergence fallback: the client content replaces the document.
    ///
    /// The history cannot span the jump, so the window restarts at the new
    /// content; older clients take this same path until they resync.
    fn overwrite(&mut self, proposed: &str) -> Update {
        self.content = proposed.to_string();
        self.version += 1;
        self.window_base.clone_from(&self.content);
        self.history.clear();
        Update {
            content: self.content.clone(),
            version: self.version,
            changed: true,
            diverged: true,
        }
    }
}

impl Default for DocumentEngine {
    fn default() -> Self {
        Self::new()
    }
}
