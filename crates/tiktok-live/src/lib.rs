//! # tiktok-live
//!
//! Adapter layer between the scraper and TikTok live rooms.
//!
//! The scraper only depends on the [`LiveProvider`] trait: connect to a username,
//! receive [`LiveItem`]s until the session ends, disconnect. The bundled
//! [`WebSocketBridgeProvider`] implements it on top of a local bridge process
//! that handles TikTok's signing and protobuf framing.

pub mod error;
pub mod event;
pub mod provider;
pub mod rate_limit;
pub mod websocket;

pub use error::{LiveError, Result};
pub use event::{CommentEvent, ControlEvent, LiveItem};
pub use provider::{LiveConnection, LiveProvider};
pub use rate_limit::{RATE_LIMIT_INDICATORS, is_rate_limit_message};
pub use websocket::{BridgeConfig, DEFAULT_BRIDGE_URL, WebSocketBridgeProvider};
