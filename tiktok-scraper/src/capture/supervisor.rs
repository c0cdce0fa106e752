//! Per-streamer capture loop.
//!
//! A supervisor owns one streamer's connection, dedup memory, reconnect state and
//! session file. It loops connect → receive → write → backoff until its
//! cancellation token fires or writing output fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tiktok_live::{CommentEvent, ControlEvent, LiveConnection, LiveError, LiveItem, LiveProvider};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::Result;
use crate::capture::backoff::{ReconnectPolicy, ReconnectState};
use crate::capture::dedup::Deduplicator;
use crate::capture::events::{CaptureEvent, SupervisorState};
use crate::capture::filter::{clean_comment_text, is_emoji_only};
use crate::capture::gate::ConnectGate;
use crate::capture::stats::{StatKind, StatsTracker};
use crate::capture::writer::{SessionWriter, connected_line, disconnected_line};
use crate::config::{ScraperConfig, StreamerTarget};
use crate::logging::preview;

/// Dependencies shared by every supervisor.
#[derive(Clone)]
pub struct CaptureContext {
    pub config: Arc<ScraperConfig>,
    pub provider: Arc<dyn LiveProvider>,
    pub stats: Arc<StatsTracker>,
    pub gate: Arc<ConnectGate>,
    pub events: broadcast::Sender<CaptureEvent>,
}

impl CaptureContext {
    pub fn new(config: Arc<ScraperConfig>, provider: Arc<dyn LiveProvider>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            gate: Arc::new(ConnectGate::from_config(&config)),
            stats: Arc::new(StatsTracker::new()),
            config,
            provider,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.events.subscribe()
    }
}

/// How a live session ended.
#[derive(Debug)]
enum SessionEnd {
    Cancelled,
    Ended { reason: Option<String> },
    Failed(LiveError),
}

/// Result of one pass through CONNECTING.
#[derive(Debug)]
enum Attempt {
    Cancelled,
    ConnectFailed(LiveError),
    Session { live_for: Duration, end: SessionEnd },
}

/// Handle to a running supervisor task.
pub struct SupervisorHandle {
    streamer: String,
    state_rx: watch::Receiver<SupervisorState>,
    cancel_token: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl SupervisorHandle {
    pub fn streamer(&self) -> &str {
        &self.streamer
    }

    pub fn state(&self) -> SupervisorState {
        *self.state_rx.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state_rx.clone()
    }

    /// Request the supervisor to stop.
    pub fn stop(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Split into the streamer name and the task handle.
    pub fn into_parts(self) -> (String, JoinHandle<Result<()>>) {
        (self.streamer, self.task)
    }
}

/// Capture loop for one streamer.
pub struct StreamerSupervisor {
    target: StreamerTarget,
    ctx: CaptureContext,
    policy: ReconnectPolicy,
    reconnect: ReconnectState,
    dedup: Deduplicator,
    output_dir: PathBuf,
    state_tx: watch::Sender<SupervisorState>,
    cancel_token: CancellationToken,
}

impl StreamerSupervisor {
    pub fn new(
        target: StreamerTarget,
        ctx: CaptureContext,
        cancel_token: CancellationToken,
    ) -> (Self, watch::Receiver<SupervisorState>) {
        let config = ctx.config.clone();
        let policy = ReconnectPolicy::from_config(&config);
        let (state_tx, state_rx) = watch::channel(SupervisorState::Idle);
        let supervisor = Self {
            reconnect: ReconnectState::new(&target.username, &policy),
            dedup: Deduplicator::new(config.dedup_capacity, config.dedup_window()),
            output_dir: config.streamer_output_dir(&target.username),
            policy,
            target,
            ctx,
            state_tx,
            cancel_token,
        };
        (supervisor, state_rx)
    }

    /// Spawn a supervisor on the runtime.
    ///
    /// The supervisor stops when `parent_token` or the handle's own token is cancelled.
    pub fn spawn(
        target: StreamerTarget,
        ctx: CaptureContext,
        parent_token: &CancellationToken,
    ) -> SupervisorHandle {
        let cancel_token = parent_token.child_token();
        let streamer = target.username.clone();
        let (supervisor, state_rx) = Self::new(target, ctx, cancel_token.clone());
        let task = tokio::spawn(supervisor.run());
        SupervisorHandle {
            streamer,
            state_rx,
            cancel_token,
            task,
        }
    }

    fn username(&self) -> &str {
        &self.target.username
    }

    fn set_state(&self, state: SupervisorState) {
        self.state_tx.send_replace(state);
        trace!(streamer = %self.username(), state = %state, "State changed");
    }

    fn emit(&self, event: CaptureEvent) {
        // No receivers is fine.
        let _ = self.ctx.events.send(event);
    }

    fn record(&self, kind: StatKind) {
        self.ctx.stats.record(self.username(), kind);
    }

    /// Run until stopped. An error means output could not be written.
    pub async fn run(mut self) -> Result<()> {
        self.ctx.stats.register(self.username());
        info!(streamer = %self.username(), "Supervisor started");

        let result = self.run_loop().await;
        if let Err(e) = &result {
            error!(streamer = %self.username(), error = %e, "Supervisor failed");
            self.set_state(SupervisorState::Failed);
            self.emit(CaptureEvent::Fatal {
                streamer: self.username().to_string(),
                error: e.to_string(),
            });
        }

        self.set_state(SupervisorState::Stopped);
        self.emit(CaptureEvent::Stopped {
            streamer: self.username().to_string(),
        });
        info!(streamer = %self.username(), "Supervisor stopped");
        result
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            if self.cancel_token.is_cancelled() {
                return Ok(());
            }

            self.set_state(SupervisorState::Connecting);
            // Rate-limited connects arm the cooldown inside `attempt`.
            let mut gate_tripped = false;
            let error = match self.attempt().await? {
                Attempt::Cancelled => return Ok(()),
                Attempt::ConnectFailed(e) => {
                    gate_tripped = e.is_rate_limited();
                    warn!(streamer = %self.username(), error = %e, "Connection failed");
                    self.set_state(SupervisorState::Failed);
                    self.emit(CaptureEvent::ConnectFailed {
                        streamer: self.username().to_string(),
                        error: e.to_string(),
                        rate_limited: e.is_rate_limited(),
                    });
                    Some(e)
                }
                Attempt::Session { live_for, end } => {
                    if self.reconnect.record_session(&self.policy, live_for) {
                        debug!(streamer = %self.username(), live_for = ?live_for, "Stable session, backoff reset");
                    }
                    match end {
                        SessionEnd::Cancelled => return Ok(()),
                        SessionEnd::Ended { reason } => {
                            info!(streamer = %self.username(), reason = ?reason, live_for = ?live_for, "Stream ended");
                            self.set_state(SupervisorState::Disconnected);
                            self.emit(CaptureEvent::Disconnected {
                                streamer: self.username().to_string(),
                                live_for,
                                error: None,
                            });
                            None
                        }
                        SessionEnd::Failed(e) => {
                            warn!(streamer = %self.username(), error = %e, live_for = ?live_for, "Session failed");
                            self.set_state(SupervisorState::Failed);
                            self.emit(CaptureEvent::Disconnected {
                                streamer: self.username().to_string(),
                                live_for,
                                error: Some(e.to_string()),
                            });
                            Some(e)
                        }
                    }
                }
            };

            let rate_limited = error.as_ref().is_some_and(LiveError::is_rate_limited);
            if error.is_some() {
                self.record(StatKind::Error);
            }
            if rate_limited {
                self.record(StatKind::RateLimit);
                if !gate_tripped {
                    self.ctx.gate.trip_global_rate_limit().await;
                }
            }
            self.record(StatKind::Reconnect);

            let backoff = self.reconnect.record_failure(&self.policy, rate_limited);
            self.set_state(SupervisorState::Backoff);
            self.emit(CaptureEvent::BackoffScheduled {
                streamer: self.username().to_string(),
                delay: backoff.delay,
                sleep: backoff.sleep,
                failures: backoff.failures,
                rate_limited,
            });
            info!(
                streamer = %self.username(),
                delay = ?backoff.sleep,
                failures = backoff.failures + 1,
                rate_limited,
                "Reconnecting after backoff"
            );

            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return Ok(()),
                _ = tokio::time::sleep(backoff.sleep) => {}
            }
        }
    }

    /// Connect, then run the session until it ends.
    async fn attempt(&mut self) -> Result<Attempt> {
        let provider = self.ctx.provider.clone();
        let gate = self.ctx.gate.clone();

        let Some(permit) = gate.acquire(&self.cancel_token).await else {
            return Ok(Attempt::Cancelled);
        };
        self.record(StatKind::ConnectionAttempt);
        debug!(streamer = %self.username(), "Connecting");

        let timeout = self.ctx.config.connect_timeout();
        let connected = tokio::select! {
            biased;
            _ = self.cancel_token.cancelled() => return Ok(Attempt::Cancelled),
            result = tokio::time::timeout(timeout, provider.connect(self.username())) => result,
        };
        // Arm the cooldown before queued attempts can take the permit.
        if matches!(&connected, Ok(Err(e)) if e.is_rate_limited()) {
            gate.trip_global_rate_limit().await;
        }
        drop(permit);

        let mut connection = match connected {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Ok(Attempt::ConnectFailed(e)),
            Err(_) => return Ok(Attempt::ConnectFailed(LiveError::Timeout(timeout))),
        };

        let live_started = Instant::now();
        let session = self.run_session(&connection).await;
        let live_for = live_started.elapsed();

        self.ctx.stats.set_live(self.username(), false);
        if let Err(e) = provider.disconnect(&mut connection).await {
            warn!(streamer = %self.username(), error = %e, "Error during disconnect");
        }

        let end = session?;
        Ok(Attempt::Session { live_for, end })
    }

    /// LIVE: write every accepted comment until the session ends.
    async fn run_session(&mut self, connection: &LiveConnection) -> Result<SessionEnd> {
        let provider = self.ctx.provider.clone();
        let mut writer =
            SessionWriter::create(&self.output_dir, self.username(), Local::now()).await?;
        writer.write_line(&connected_line(self.username())).await?;

        self.set_state(SupervisorState::Live);
        self.ctx.stats.set_live(self.username(), true);
        info!(
            streamer = %self.username(),
            path = %writer.path().display(),
            "Connected to live stream"
        );
        self.emit(CaptureEvent::Connected {
            streamer: self.username().to_string(),
            output_path: writer.path().to_path_buf(),
        });

        let end = loop {
            tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => break SessionEnd::Cancelled,
                item = provider.receive(connection) => match item {
                    Ok(Some(LiveItem::Comment(comment))) => {
                        self.handle_comment(&mut writer, &comment).await?;
                    }
                    Ok(Some(LiveItem::Control(ControlEvent::StreamEnded { reason }))) => {
                        break SessionEnd::Ended { reason };
                    }
                    Ok(Some(LiveItem::Control(ControlEvent::Other { kind }))) => {
                        debug!(streamer = %self.username(), kind = %kind, "Ignoring control event");
                    }
                    Ok(Some(LiveItem::Invalid { reason })) => {
                        debug!(streamer = %self.username(), reason = %reason, "Dropping malformed payload");
                        self.record(StatKind::Error);
                    }
                    Ok(None) => break SessionEnd::Ended { reason: None },
                    Err(e) => break SessionEnd::Failed(e),
                }
            }
        };

        writer.write_line(&disconnected_line(self.username())).await?;
        let record = writer.close().await?;
        debug!(
            streamer = %self.username(),
            path = %record.output_file_path.display(),
            "Session file closed"
        );
        Ok(end)
    }

    async fn handle_comment(
        &mut self,
        writer: &mut SessionWriter,
        comment: &CommentEvent,
    ) -> Result<()> {
        let text = clean_comment_text(&comment.text);
        if self.ctx.config.skip_emoji_only && is_emoji_only(&text) {
            self.record(StatKind::Filtered);
            return Ok(());
        }

        if !self.dedup.offer(comment) {
            self.record(StatKind::Duplicate);
            trace!(streamer = %self.username(), author = %comment.author, "Duplicate comment");
            return Ok(());
        }

        writer
            .write_comment(&comment.author, &text, self.ctx.config.include_author)
            .await?;
        self.ctx
            .stats
            .record_comment(self.username(), comment.received_at);
        debug!(
            streamer = %self.username(),
            author = %comment.author,
            comment = %preview(&text),
            "Comment"
        );
        Ok(())
    }
}
