//! JSON wire protocol between editor clients and the server.
//!
//! Every frame is a JSON object with a `type` discriminant. Inbound and
//! outbound vocabularies are separate enums so that deserialization
//! validates exactly the fields each frame type requires, instead of the
//! anything-goes envelope a single struct would give.
//!
//! ```text
//! client ──► {"type":"text_update","content":"hello","version":3}
//! server ──► {"type":"text_update","clientId":"1f0c…","documentId":"d1",
//!             "content":"hello","version":4}
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Protocol-level failures.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// Not valid JSON, unknown `type`, or missing required fields.
    #[error("malformed frame: {0}")]
    Malformed(String),
    /// Frame exceeds the configured size limit.
    #[error("frame of {size} bytes exceeds the {limit} byte limit")]
    Oversized { size: usize, limit: usize },
    /// Outbound frame failed to serialize.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

/// A text selection carried in a `selection_change` frame.
///
/// `start == end` means the selection was cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRange {
    pub start: usize,
    pub end: usize,
}

/// Frames the server accepts from clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Whole-buffer update at the version the client believes current.
    TextUpdate { content: String, version: u64 },
    /// Cursor moved to a byte offset.
    CursorPosition { position: usize },
    /// Selection changed or cleared.
    SelectionChange { data: SelectionRange },
    TypingStart,
    TypingStop,
    /// Request an immediate flush to storage.
    SaveDocument,
    /// Re-send the full document state.
    RequestDocument,
    /// Application-level keepalive; no response required.
    Ping,
}

impl ClientFrame {
    /// Parse an inbound text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Display metadata for one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub username: String,
    pub color: String,
}

/// Payload of `cursor_position` broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorInfo {
    pub client_id: String,
    pub username: String,
    pub color: String,
    pub position: usize,
}

/// Payload of `selection_change` broadcasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionInfo {
    pub client_id: String,
    pub username: String,
    pub color: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRef {
    pub client_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRef {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveInfo {
    pub document_id: String,
    pub saved: bool,
    pub timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
}

/// Frames the server emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// First frame on every connection: the assigned identity.
    #[serde(rename_all = "camelCase")]
    Init { client_id: String, data: UserInfo },
    /// Full content snapshot.
    #[serde(rename_all = "camelCase")]
    DocumentState {
        content: String,
        version: u64,
        doc_id: String,
    },
    /// Broadcast of an applied update, with the server-assigned version.
    #[serde(rename_all = "camelCase")]
    TextUpdate {
        client_id: String,
        document_id: String,
        content: String,
        version: u64,
    },
    /// Acknowledgement to the originator of a `text_update`. Echo
    /// suppression forbids reflecting the update itself.
    #[serde(rename_all = "camelCase")]
    UpdateAck { document_id: String, version: u64 },
    #[serde(rename_all = "camelCase")]
    CursorPosition {
        client_id: String,
        document_id: String,
        data: CursorInfo,
    },
    #[serde(rename_all = "camelCase")]
    SelectionChange {
        client_id: String,
        document_id: String,
        data: SelectionInfo,
    },
    /// A peer's cursor is gone (disconnect or staleness).
    CursorRemove { data: ClientRef },
    #[serde(rename_all = "camelCase")]
    TypingStart {
        client_id: String,
        document_id: String,
        data: UserInfo,
    },
    #[serde(rename_all = "camelCase")]
    TypingStop {
        client_id: String,
        document_id: String,
        data: UserRef,
    },
    #[serde(rename_all = "camelCase")]
    UserJoined {
        client_id: String,
        document_id: String,
        data: UserInfo,
    },
    #[serde(rename_all = "camelCase")]
    UserLeft {
        client_id: String,
        document_id: String,
        data: UserRef,
    },
    /// Full roster snapshot, sent on membership transitions.
    ActiveUsers { data: Vec<UserInfo> },
    SaveConfirmation { data: SaveInfo },
    Error { data: ErrorInfo },
}

impl ServerFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Error {
            data: ErrorInfo {
                message: message.into(),
            },
        }
    }

    pub fn cursor_remove(client_id: impl Into<String>) -> Self {
        ServerFrame::CursorRemove {
            data: ClientRef {
                client_id: client_id.into(),
            },
        }
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}
