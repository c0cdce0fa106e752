//! Live provider trait and connection types.
//!
//! Defines the capability the scraper consumes: open a session for a username,
//! pull items until the session ends, close it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::event::LiveItem;

/// Connection handle for an active live session.
#[derive(Debug)]
pub struct LiveConnection {
    /// Unique connection ID
    pub id: String,
    /// Username of the streamer
    pub username: String,
    /// Whether the connection is active
    pub is_connected: bool,
    /// Connection start time
    pub connected_at: DateTime<Utc>,
}

impl LiveConnection {
    /// Create a new connection handle.
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            is_connected: false,
            connected_at: Utc::now(),
        }
    }

    /// Mark the connection as connected.
    pub fn set_connected(&mut self) {
        self.is_connected = true;
        self.connected_at = Utc::now();
    }

    /// Mark the connection as disconnected.
    pub fn set_disconnected(&mut self) {
        self.is_connected = false;
    }
}

/// A source of live-room items for TikTok usernames.
///
/// `receive` must be cancel-safe: the scraper races it against shutdown.
#[async_trait]
pub trait LiveProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Open a live session for `username`.
    ///
    /// Fails with [`crate::LiveError::RateLimited`] when the attempt was throttled.
    async fn connect(&self, username: &str) -> Result<LiveConnection>;

    /// Wait for the next item.
    ///
    /// Returns `Ok(None)` once the session has ended and no more items will arrive.
    async fn receive(&self, connection: &LiveConnection) -> Result<Option<LiveItem>>;

    /// Close the session and release its resources.
    async fn disconnect(&self, connection: &mut LiveConnection) -> Result<()>;
}
