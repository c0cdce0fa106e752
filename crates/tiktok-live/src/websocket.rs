//! WebSocket bridge provider.
//!
//! TikTok's live protocol needs request signing that is best left to a dedicated
//! sidecar. The bridge speaks that protocol and relays room events to us as JSON
//! text frames over a plain WebSocket, one connection per username:
//!
//! ```text
//! {"type":"connected","room_id":"7301..."}
//! {"type":"comment","user":"bob","user_id":"42","comment":"hi","timestamp":1700000000000}
//! {"type":"stream_end","reason":"host ended the live"}
//! {"type":"error","message":"rate_limit_ip_day","rate_limited":true}
//! ```
//!
//! The first frame must be `connected` (or `error`). Frames of any other type are ignored.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, protocol::Message},
};
use tracing::{debug, info, trace, warn};

use crate::error::{LiveError, Result};
use crate::event::{CommentEvent, ControlEvent, LiveItem};
use crate::provider::{LiveConnection, LiveProvider};

/// Default bridge endpoint; `{username}` is replaced per connection.
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:8765/live/{username}";

const MAX_ACTIVE_CONNECTIONS: usize = 1024;

type BridgeStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Settings for the bridge provider.
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Endpoint template containing a `{username}` placeholder.
    pub url_template: String,
    /// Upper bound for the WebSocket upgrade plus the `connected` frame.
    pub handshake_timeout: Duration,
    /// Interval between keep-alive pings.
    pub heartbeat_interval: Duration,
    /// Capacity of the per-connection item buffer.
    pub channel_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url_template: DEFAULT_BRIDGE_URL.to_string(),
            handshake_timeout: Duration::from_secs(45),
            heartbeat_interval: Duration::from_secs(30),
            channel_capacity: 256,
        }
    }
}

impl BridgeConfig {
    /// Create a config for the given endpoint template.
    pub fn with_url(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            ..Default::default()
        }
    }

    /// Resolve the endpoint for a username.
    pub fn url_for(&self, username: &str) -> String {
        self.url_template.replace("{username}", username)
    }
}

/// Wire frames sent by the bridge.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeFrame {
    Connected {
        #[serde(default)]
        room_id: Option<String>,
    },
    Comment {
        user: String,
        #[serde(default)]
        user_id: Option<String>,
        comment: String,
        /// Milliseconds since the epoch
        #[serde(default)]
        timestamp: Option<i64>,
    },
    StreamEnd {
        #[serde(default)]
        reason: Option<String>,
    },
    Error {
        message: String,
        #[serde(default)]
        rate_limited: bool,
    },
    #[serde(other)]
    Unknown,
}

/// Outcome of decoding one text frame.
#[derive(Debug)]
enum Decoded {
    Handshake,
    Item(LiveItem),
    Failure(LiveError),
    Ignored,
}

fn decode_frame(username: &str, text: &str) -> Decoded {
    let frame = match serde_json::from_str::<BridgeFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            return Decoded::Item(LiveItem::Invalid {
                reason: format!("undecodable frame: {e}"),
            });
        }
    };

    match frame {
        BridgeFrame::Connected { room_id } => {
            debug!(streamer = %username, room_id = ?room_id, "Bridge confirmed room");
            Decoded::Handshake
        }
        BridgeFrame::Comment {
            user,
            user_id,
            comment,
            timestamp,
        } => {
            // Timestamp: bridge-provided > current time
            let received_at = timestamp
                .filter(|&t| t > 0)
                .and_then(|t| Utc.timestamp_millis_opt(t).single())
                .unwrap_or_else(Utc::now);
            let mut event = CommentEvent::new(username, user, comment).with_received_at(received_at);
            event.author_id = user_id;
            Decoded::Item(LiveItem::Comment(event))
        }
        BridgeFrame::StreamEnd { reason } => {
            Decoded::Item(LiveItem::Control(ControlEvent::StreamEnded { reason }))
        }
        BridgeFrame::Error {
            message,
            rate_limited,
        } => {
            if rate_limited {
                Decoded::Failure(LiveError::rate_limited(message))
            } else {
                Decoded::Failure(LiveError::classify(message))
            }
        }
        BridgeFrame::Unknown => {
            debug!(streamer = %username, "Ignoring bridge frame of unknown type");
            Decoded::Ignored
        }
    }
}

fn map_ws_error(error: WsError) -> LiveError {
    match error {
        WsError::Http(response) if response.status().as_u16() == 429 => {
            LiveError::rate_limited(format!("bridge refused upgrade: {}", response.status()))
        }
        WsError::Http(response) => {
            LiveError::classify(format!("bridge refused upgrade: {}", response.status()))
        }
        other => LiveError::classify(other.to_string()),
    }
}

/// Internal state for one bridge connection.
struct BridgeConnectionState {
    /// Items (or the terminal error) forwarded by the reader task
    item_rx: mpsc::Receiver<Result<LiveItem>>,
    /// Reader task
    task: Option<JoinHandle<()>>,
    /// Shutdown sender
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Limits total active connections in case callers forget to disconnect.
    #[allow(dead_code)]
    connection_permit: OwnedSemaphorePermit,
}

impl Drop for BridgeConnectionState {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Live provider backed by a WebSocket bridge.
pub struct WebSocketBridgeProvider {
    config: BridgeConfig,
    connections: RwLock<HashMap<String, Arc<Mutex<BridgeConnectionState>>>>,
    connection_semaphore: Arc<Semaphore>,
}

impl WebSocketBridgeProvider {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            connections: RwLock::new(HashMap::new()),
            connection_semaphore: Arc::new(Semaphore::new(MAX_ACTIVE_CONNECTIONS)),
        }
    }

    /// Number of sessions currently held open.
    pub async fn active_connections(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Upgrade the connection and wait for the bridge to confirm the room.
    ///
    /// Items that arrive before the confirmation are returned so they are not lost.
    async fn open(&self, url: &str, username: &str) -> Result<(BridgeStream, Vec<LiveItem>)> {
        let (mut stream, _) = connect_async(url).await.map_err(map_ws_error)?;
        let mut early = Vec::new();

        loop {
            let text = match stream.next().await {
                Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.as_str().to_owned()).unwrap_or_default();
                    return Err(LiveError::classify(format!(
                        "bridge closed during handshake: {reason}"
                    )));
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => {
                    return Err(LiveError::connection("bridge closed during handshake"));
                }
            };

            match decode_frame(username, &text) {
                Decoded::Handshake => return Ok((stream, early)),
                Decoded::Failure(e) => {
                    let _ = stream.close(None).await;
                    return Err(e);
                }
                Decoded::Item(item) => {
                    // A bridge that skips the confirmation is treated as connected.
                    early.push(item);
                    return Ok((stream, early));
                }
                Decoded::Ignored => {}
            }
        }
    }
}

/// Pump frames from the bridge into the item channel until the stream ends.
async fn run_reader(
    username: String,
    mut stream: BridgeStream,
    item_tx: mpsc::Sender<Result<LiveItem>>,
    mut shutdown_rx: mpsc::Receiver<()>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                let _ = stream.close(None).await;
                return;
            }

            _ = heartbeat.tick() => {
                if let Err(e) = stream.send(Message::Ping(Default::default())).await {
                    let _ = item_tx.send(Err(LiveError::connection(format!("heartbeat failed: {e}")))).await;
                    break;
                }
                trace!(streamer = %username, "Sent heartbeat");
            }

            msg = stream.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            let invalid = LiveItem::Invalid { reason: "non UTF-8 binary frame".into() };
                            if item_tx.send(Ok(invalid)).await.is_err() {
                                break;
                            }
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(streamer = %username, "Bridge stream closed");
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = item_tx.send(Err(map_ws_error(e))).await;
                        break;
                    }
                };

                match decode_frame(&username, &text) {
                    Decoded::Item(item) => {
                        let ends = item.ends_stream();
                        if item_tx.send(Ok(item)).await.is_err() {
                            break;
                        }
                        if ends {
                            let _ = stream.close(None).await;
                            break;
                        }
                    }
                    Decoded::Failure(e) => {
                        warn!(streamer = %username, error = %e, "Bridge reported an error");
                        let _ = item_tx.send(Err(e)).await;
                        break;
                    }
                    Decoded::Handshake | Decoded::Ignored => {}
                }
            }
        }
    }
    debug!(streamer = %username, "Bridge reader stopped");
}

#[async_trait]
impl LiveProvider for WebSocketBridgeProvider {
    fn name(&self) -> &str {
        "bridge"
    }

    async fn connect(&self, username: &str) -> Result<LiveConnection> {
        let connection_permit = self
            .connection_semaphore
            .clone()
            .try_acquire_owned()
            .map_err(|_| {
                LiveError::connection(format!(
                    "Too many active connections (max {})",
                    MAX_ACTIVE_CONNECTIONS
                ))
            })?;

        let url = self.config.url_for(username);
        info!(streamer = %username, url = %url, "Connecting to bridge");

        let (stream, early) =
            tokio::time::timeout(self.config.handshake_timeout, self.open(&url, username))
                .await
                .map_err(|_| LiveError::Timeout(self.config.handshake_timeout))??;

        let (item_tx, item_rx) = mpsc::channel(self.config.channel_capacity.max(early.len() + 1));
        for item in early {
            let _ = item_tx.try_send(Ok(item));
        }
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let task = tokio::spawn(run_reader(
            username.to_string(),
            stream,
            item_tx,
            shutdown_rx,
            self.config.heartbeat_interval,
        ));

        let connection_id = format!("{}-{}-{}", self.name(), username, uuid::Uuid::new_v4());
        let state = BridgeConnectionState {
            item_rx,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            connection_permit,
        };
        self.connections
            .write()
            .await
            .insert(connection_id.clone(), Arc::new(Mutex::new(state)));

        let mut conn = LiveConnection::new(connection_id, username);
        conn.set_connected();
        Ok(conn)
    }

    async fn receive(&self, connection: &LiveConnection) -> Result<Option<LiveItem>> {
        let state_arc = {
            let map = self.connections.read().await;
            map.get(&connection.id).cloned()
        };

        let Some(state_arc) = state_arc else {
            return Err(LiveError::connection("Connection not found"));
        };

        let mut state = state_arc.lock().await;
        match state.item_rx.recv().await {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    async fn disconnect(&self, connection: &mut LiveConnection) -> Result<()> {
        // Release the map lock before joining the reader; other sessions need it.
        let removed = self.connections.write().await.remove(&connection.id);
        if let Some(state_arc) = removed {
            let mut state = state_arc.lock().await;
            if let Some(tx) = state.shutdown_tx.take() {
                let _ = tx.try_send(());
            }
            if let Some(task) = state.task.take() {
                // Give the reader a moment to send a close frame before aborting.
                let abort = task.abort_handle();
                if tokio::time::timeout(Duration::from_secs(1), task).await.is_err() {
                    abort.abort();
                }
            }
        }
        connection.set_disconnected();
        Ok(())
    }
}
