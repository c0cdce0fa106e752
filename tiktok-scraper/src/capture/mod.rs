//! Comment capture pipeline.
//!
//! Items from a [`tiktok_live::LiveProvider`] pass through the emoji filter and the
//! [`Deduplicator`] before the [`SessionWriter`] appends them to the session file.
//! [`StreamerSupervisor`] drives that pipeline for one streamer and reconnects with
//! [`ReconnectState`] backoff when the session ends.

pub mod backoff;
pub mod dedup;
pub mod events;
pub mod filter;
pub mod gate;
pub mod stats;
pub mod supervisor;
pub mod writer;

pub use backoff::{Backoff, ReconnectPolicy, ReconnectState, next_delay};
pub use dedup::{Deduplicator, Fingerprint};
pub use events::{CaptureEvent, SupervisorState};
pub use gate::ConnectGate;
pub use stats::{StatKind, StatsSnapshot, StatsTracker, StreamerStats, run_stats_task};
pub use supervisor::{CaptureContext, StreamerSupervisor, SupervisorHandle};
pub use writer::{SessionRecord, SessionWriter};
