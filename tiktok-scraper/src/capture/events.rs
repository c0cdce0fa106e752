//! Supervisor states and lifecycle events.
//!
//! The current state of each supervisor is published on a `watch` channel; lifecycle
//! transitions are broadcast as [`CaptureEvent`]s so observers can follow every
//! streamer from one subscription.

use std::path::PathBuf;
use std::time::Duration;

/// Lifecycle state of a streamer supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SupervisorState {
    Idle,
    Connecting,
    Live,
    /// The session ended normally (stream end or bridge close).
    Disconnected,
    /// The connection attempt or the session failed.
    Failed,
    Backoff,
    Stopped,
}

impl SupervisorState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Connecting => "CONNECTING",
            Self::Live => "LIVE",
            Self::Disconnected => "DISCONNECTED",
            Self::Failed => "FAILED",
            Self::Backoff => "BACKOFF",
            Self::Stopped => "STOPPED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

impl std::fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events emitted by streamer supervisors.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// A session started and its output file was opened
    Connected {
        streamer: String,
        output_path: PathBuf,
    },
    /// A session ended
    Disconnected {
        streamer: String,
        /// How long the session stayed live
        live_for: Duration,
        /// Failure description, `None` for a normal stream end
        error: Option<String>,
    },
    /// A connection attempt failed before going live
    ConnectFailed {
        streamer: String,
        error: String,
        rate_limited: bool,
    },
    /// Waiting before the next attempt
    BackoffScheduled {
        streamer: String,
        /// Policy delay (rate-limit floor applied)
        delay: Duration,
        /// Actual sleep after jitter
        sleep: Duration,
        /// Consecutive failures before this one
        failures: u32,
        rate_limited: bool,
    },
    /// The supervisor hit an unrecoverable error and is stopping
    Fatal { streamer: String, error: String },
    /// The supervisor exited
    Stopped { streamer: String },
}

impl CaptureEvent {
    pub fn streamer(&self) -> &str {
        match self {
            Self::Connected { streamer, .. }
            | Self::Disconnected { streamer, .. }
            | Self::ConnectFailed { streamer, .. }
            | Self::BackoffScheduled { streamer, .. }
            | Self::Fatal { streamer, .. }
            | Self::Stopped { streamer } => streamer,
        }
    }
}
