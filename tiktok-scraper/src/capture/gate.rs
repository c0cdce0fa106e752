//! Process-wide admission control for connection attempts.
//!
//! Limits how many streamers may be connecting at once, spaces attempts apart,
//! and holds every attempt back while a global rate-limit cooldown is armed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ScraperConfig;

/// Held while a connection attempt is in progress.
#[derive(Debug)]
pub struct ConnectPermit {
    _permit: OwnedSemaphorePermit,
}

/// Shared gate in front of every connection attempt.
#[derive(Debug)]
pub struct ConnectGate {
    semaphore: Arc<Semaphore>,
    min_interval: Duration,
    global_cooldown: Duration,
    /// Start time reserved by the most recent attempt
    last_attempt: Mutex<Option<Instant>>,
    global_until: Mutex<Option<Instant>>,
}

impl ConnectGate {
    pub fn new(max_concurrent: usize, min_interval: Duration, global_cooldown: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_interval,
            global_cooldown,
            last_attempt: Mutex::new(None),
            global_until: Mutex::new(None),
        }
    }

    pub fn from_config(config: &ScraperConfig) -> Self {
        Self::new(
            config.max_concurrent_connections,
            config.min_connection_interval(),
            config.global_rate_limit(),
        )
    }

    /// Wait until a connection attempt may start.
    ///
    /// Returns `None` if `cancel_token` fires first.
    pub async fn acquire(&self, cancel_token: &CancellationToken) -> Option<ConnectPermit> {
        if !self.wait_cooldown(cancel_token).await {
            return None;
        }

        let permit = tokio::select! {
            _ = cancel_token.cancelled() => return None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok()?,
        };

        let wait = {
            let mut last = self.last_attempt.lock().await;
            let now = Instant::now();
            let start = match *last {
                Some(previous) => (previous + self.min_interval).max(now),
                None => now,
            };
            *last = Some(start);
            start - now
        };

        if !wait.is_zero() {
            tokio::select! {
                _ = cancel_token.cancelled() => return None,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        // The cooldown may have been armed while this attempt was queued.
        if !self.wait_cooldown(cancel_token).await {
            return None;
        }

        Some(ConnectPermit { _permit: permit })
    }

    /// Sleep until the global cooldown has expired. `false` if cancelled first.
    async fn wait_cooldown(&self, cancel_token: &CancellationToken) -> bool {
        loop {
            let remaining = self.global_cooldown_remaining().await;
            if remaining.is_zero() {
                return true;
            }
            debug!(remaining = ?remaining, "Waiting for global rate-limit cooldown");
            tokio::select! {
                _ = cancel_token.cancelled() => return false,
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }

    /// Arm the global cooldown after a rate limit. A no-op when the cooldown is disabled.
    pub async fn trip_global_rate_limit(&self) {
        if self.global_cooldown.is_zero() {
            return;
        }
        let until = Instant::now() + self.global_cooldown;
        let mut global = self.global_until.lock().await;
        if global.is_none_or(|current| current < until) {
            *global = Some(until);
            warn!(cooldown = ?self.global_cooldown, "Global rate-limit cooldown armed");
        }
    }

    /// Time left on the global cooldown.
    pub async fn global_cooldown_remaining(&self) -> Duration {
        match *self.global_until.lock().await {
            Some(until) => until.saturating_duration_since(Instant::now()),
            None => Duration::ZERO,
        }
    }
}
