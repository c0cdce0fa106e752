//! Typed items emitted by live providers.
//!
//! A provider yields either comments ([`CommentEvent`]), control events that affect
//! session semantics ([`ControlEvent`]), or [`LiveItem::Invalid`] when a payload could
//! not be understood. Only comments are meant to be persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single public comment posted in a live room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
    /// Username of the streamer whose room the comment was posted in
    pub streamer: String,
    /// Display name (or unique id) of the commenter
    pub author: String,
    /// Platform user id of the commenter, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// Comment text
    pub text: String,
    /// When the comment was received
    pub received_at: DateTime<Utc>,
}

impl CommentEvent {
    /// Create a comment received now.
    pub fn new(
        streamer: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            streamer: streamer.into(),
            author: author.into(),
            author_id: None,
            text: text.into(),
            received_at: Utc::now(),
        }
    }

    /// Set the commenter's platform id.
    pub fn with_author_id(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    /// Set the receive timestamp.
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }
}

/// Control events produced by the live room that affect session semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlEvent {
    /// The host ended the broadcast.
    StreamEnded {
        /// Optional human-readable reason provided by the platform.
        reason: Option<String>,
    },
    /// Other platform-specific control event.
    Other { kind: String },
}

/// A single item in the live event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LiveItem {
    Comment(CommentEvent),
    Control(ControlEvent),
    /// A payload that could not be decoded. The session is still usable.
    Invalid { reason: String },
}

impl LiveItem {
    /// Whether this item terminates the session.
    pub fn ends_stream(&self) -> bool {
        matches!(self, Self::Control(ControlEvent::StreamEnded { .. }))
    }
}
