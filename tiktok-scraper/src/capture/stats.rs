//! Process-wide capture statistics.
//!
//! Each streamer owns one set of atomic counters; only that streamer's supervisor
//! writes to it. A single background task serialises snapshots to disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::utils::fs;

/// Counter selector for [`StatsTracker::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatKind {
    Comment,
    Duplicate,
    Reconnect,
    Error,
    Filtered,
    RateLimit,
    ConnectionAttempt,
}

#[derive(Debug, Default)]
struct StreamerCounters {
    comments: AtomicU64,
    duplicates: AtomicU64,
    reconnects: AtomicU64,
    errors: AtomicU64,
    filtered: AtomicU64,
    rate_limits: AtomicU64,
    connection_attempts: AtomicU64,
    live: AtomicBool,
    /// Milliseconds since the epoch, 0 = never
    last_comment_ms: AtomicI64,
}

impl StreamerCounters {
    fn counter(&self, kind: StatKind) -> &AtomicU64 {
        match kind {
            StatKind::Comment => &self.comments,
            StatKind::Duplicate => &self.duplicates,
            StatKind::Reconnect => &self.reconnects,
            StatKind::Error => &self.errors,
            StatKind::Filtered => &self.filtered,
            StatKind::RateLimit => &self.rate_limits,
            StatKind::ConnectionAttempt => &self.connection_attempts,
        }
    }

    fn snapshot(&self) -> StreamerStats {
        let last_ms = self.last_comment_ms.load(Ordering::Relaxed);
        StreamerStats {
            comments: self.comments.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            filtered: self.filtered.load(Ordering::Relaxed),
            rate_limits: self.rate_limits.load(Ordering::Relaxed),
            connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
            live: self.live.load(Ordering::Relaxed),
            last_comment: (last_ms > 0)
                .then(|| Utc.timestamp_millis_opt(last_ms).single())
                .flatten(),
        }
    }
}

/// Counters for one streamer at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamerStats {
    pub comments: u64,
    pub duplicates: u64,
    pub reconnects: u64,
    pub errors: u64,
    pub filtered: u64,
    pub rate_limits: u64,
    pub connection_attempts: u64,
    pub live: bool,
    #[serde(default)]
    pub last_comment: Option<DateTime<Utc>>,
}

/// Serialisable view of all counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub per_streamer: BTreeMap<String, StreamerStats>,
    pub since: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StatsSnapshot {
    /// Sum of all streamers' counters. `live` is true if any streamer is live.
    pub fn totals(&self) -> StreamerStats {
        self.per_streamer
            .values()
            .fold(StreamerStats::default(), |mut acc, s| {
                acc.comments += s.comments;
                acc.duplicates += s.duplicates;
                acc.reconnects += s.reconnects;
                acc.errors += s.errors;
                acc.filtered += s.filtered;
                acc.rate_limits += s.rate_limits;
                acc.connection_attempts += s.connection_attempts;
                acc.live |= s.live;
                acc.last_comment = acc.last_comment.max(s.last_comment);
                acc
            })
    }

    pub fn live_streamers(&self) -> usize {
        self.per_streamer.values().filter(|s| s.live).count()
    }
}

/// Concurrent per-streamer counters.
#[derive(Debug)]
pub struct StatsTracker {
    streamers: DashMap<String, Arc<StreamerCounters>>,
    since: DateTime<Utc>,
}

impl Default for StatsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsTracker {
    pub fn new() -> Self {
        Self {
            streamers: DashMap::new(),
            since: Utc::now(),
        }
    }

    fn entry(&self, streamer: &str) -> Arc<StreamerCounters> {
        if let Some(counters) = self.streamers.get(streamer) {
            return counters.clone();
        }
        self.streamers
            .entry(streamer.to_string())
            .or_default()
            .clone()
    }

    /// Make a streamer appear in snapshots before it records anything.
    pub fn register(&self, streamer: &str) {
        self.entry(streamer);
    }

    pub fn record(&self, streamer: &str, kind: StatKind) {
        self.entry(streamer)
            .counter(kind)
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Count an accepted comment and remember when it arrived.
    pub fn record_comment(&self, streamer: &str, at: DateTime<Utc>) {
        let counters = self.entry(streamer);
        counters.comments.fetch_add(1, Ordering::Relaxed);
        counters
            .last_comment_ms
            .fetch_max(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn set_live(&self, streamer: &str, live: bool) {
        self.entry(streamer).live.store(live, Ordering::Relaxed);
    }

    pub fn streamer(&self, streamer: &str) -> Option<StreamerStats> {
        self.streamers.get(streamer).map(|c| c.snapshot())
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let per_streamer = self
            .streamers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        StatsSnapshot {
            per_streamer,
            since: self.since,
            updated_at: Utc::now(),
        }
    }

    /// Write the current snapshot to `path` atomically.
    pub async fn persist(&self, path: &Path) -> Result<StatsSnapshot> {
        let snapshot = self.snapshot();
        let json = serde_json::to_vec_pretty(&snapshot)?;
        fs::write_atomic(path, &json).await?;
        Ok(snapshot)
    }
}

fn format_runtime(runtime: chrono::Duration) -> String {
    let secs = runtime.num_seconds().max(0);
    format!("{}h{:02}m{:02}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn log_summary(snapshot: &StatsSnapshot, label: &str) {
    let totals = snapshot.totals();
    info!(
        active = snapshot.live_streamers(),
        total = snapshot.per_streamer.len(),
        comments = totals.comments,
        duplicates = totals.duplicates,
        filtered = totals.filtered,
        rate_limits = totals.rate_limits,
        reconnects = totals.reconnects,
        runtime = %format_runtime(snapshot.updated_at - snapshot.since),
        "{label}"
    );
}

/// Periodically persist stats and log a status line until cancelled.
///
/// On cancellation the snapshot is written one final time.
pub async fn run_stats_task(
    tracker: Arc<StatsTracker>,
    path: PathBuf,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = ticker.tick() => {
                match tracker.persist(&path).await {
                    Ok(snapshot) => log_summary(&snapshot, "Status"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to write stats file"),
                }
            }
        }
    }

    match tracker.persist(&path).await {
        Ok(snapshot) => {
            log_summary(&snapshot, "Final statistics");
            for (streamer, stats) in &snapshot.per_streamer {
                info!(
                    streamer = %streamer,
                    comments = stats.comments,
                    duplicates = stats.duplicates,
                    reconnects = stats.reconnects,
                    errors = stats.errors,
                    "Streamer totals"
                );
            }
        }
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to write final stats"),
    }
    debug!("Stats task stopped");
}
