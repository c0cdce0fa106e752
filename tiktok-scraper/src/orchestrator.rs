//! Runs one supervisor per streamer plus the stats task, and coordinates shutdown.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tiktok_live::LiveProvider;
use tokio::sync::broadcast;
use tokio::task::{AbortHandle, JoinError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capture::{
    CaptureContext, CaptureEvent, StatsSnapshot, StatsTracker, StreamerSupervisor, run_stats_task,
};
use crate::config::{ScraperConfig, StreamerTarget};
use crate::{Error, Result};

/// How a streamer's supervisor finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamerOutcome {
    /// Stopped on request
    Stopped,
    /// Ended on an unrecoverable error
    Failed(String),
    /// Did not stop within the grace period
    Aborted,
    Panicked(String),
}

/// Summary returned when the orchestrator finishes.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcomes: BTreeMap<String, StreamerOutcome>,
    pub stats: StatsSnapshot,
}

impl RunReport {
    /// Streamers that ended with an error, with the error text.
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(streamer, outcome)| match outcome {
                StreamerOutcome::Failed(e) | StreamerOutcome::Panicked(e) => {
                    Some((streamer.as_str(), e.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    /// Whether every supervisor stopped cleanly.
    pub fn is_clean(&self) -> bool {
        self.outcomes
            .values()
            .all(|outcome| *outcome == StreamerOutcome::Stopped)
    }
}

fn outcome_of(result: std::result::Result<Result<()>, JoinError>) -> StreamerOutcome {
    match result {
        Ok(Ok(())) => StreamerOutcome::Stopped,
        Ok(Err(e)) => StreamerOutcome::Failed(e.to_string()),
        Err(e) if e.is_cancelled() => StreamerOutcome::Aborted,
        Err(e) => StreamerOutcome::Panicked(e.to_string()),
    }
}

/// Starts and stops the capture of every configured streamer.
pub struct Orchestrator {
    ctx: CaptureContext,
    targets: Vec<StreamerTarget>,
    cancel_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        config: ScraperConfig,
        targets: Vec<StreamerTarget>,
        provider: Arc<dyn LiveProvider>,
    ) -> Result<Self> {
        config.validate()?;
        if targets.is_empty() {
            return Err(Error::config("no streamers configured"));
        }

        // One supervisor, and so one connection, per username.
        let mut seen = HashSet::new();
        let targets: Vec<StreamerTarget> = targets
            .into_iter()
            .filter(|target| {
                let first = seen.insert(target.username.clone());
                if !first {
                    warn!(streamer = %target.username, "Duplicate streamer target ignored");
                }
                first
            })
            .collect();
        Ok(Self {
            ctx: CaptureContext::new(Arc::new(config), provider),
            targets,
            cancel_token: CancellationToken::new(),
        })
    }

    /// Token that stops every supervisor when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CaptureEvent> {
        self.ctx.subscribe()
    }

    pub fn stats(&self) -> Arc<StatsTracker> {
        self.ctx.stats.clone()
    }

    /// Run until `shutdown` resolves, the cancel token fires, or every supervisor has ended.
    pub async fn run<F>(self, shutdown: F) -> RunReport
    where
        F: Future<Output = ()>,
    {
        let config = self.ctx.config.clone();
        info!(
            streamers = self.targets.len(),
            output_dir = %config.output_dir.display(),
            "Starting capture"
        );

        let stats_token = CancellationToken::new();
        let stats_task = tokio::spawn(run_stats_task(
            self.ctx.stats.clone(),
            config.stats_path(),
            config.stats_interval(),
            stats_token.clone(),
        ));

        let mut abort_handles: HashMap<String, AbortHandle> = HashMap::new();
        let mut pending = FuturesUnordered::new();
        for target in &self.targets {
            let handle = StreamerSupervisor::spawn(target.clone(), self.ctx.clone(), &self.cancel_token);
            let (streamer, task) = handle.into_parts();
            abort_handles.insert(streamer.clone(), task.abort_handle());
            pending.push(async move { (streamer, task.await) });
        }

        let mut outcomes = BTreeMap::new();
        let mut record = |streamer: String, outcome: StreamerOutcome| {
            match &outcome {
                StreamerOutcome::Failed(e) | StreamerOutcome::Panicked(e) => {
                    error!(streamer = %streamer, error = %e, "Streamer capture ended with an error")
                }
                StreamerOutcome::Aborted => {
                    warn!(streamer = %streamer, "Streamer did not stop within the grace period")
                }
                StreamerOutcome::Stopped => {}
            }
            outcomes.insert(streamer, outcome);
        };

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                _ = self.cancel_token.cancelled() => break,
                done = pending.next() => match done {
                    Some((streamer, result)) => record(streamer, outcome_of(result)),
                    None => {
                        warn!("All supervisors have ended");
                        break;
                    }
                },
            }
        }

        self.cancel_token.cancel();
        let grace = tokio::time::sleep(config.shutdown_grace());
        tokio::pin!(grace);
        let mut aborted = false;
        loop {
            tokio::select! {
                _ = &mut grace, if !aborted => {
                    for (streamer, handle) in &abort_handles {
                        if !handle.is_finished() {
                            warn!(streamer = %streamer, "Aborting supervisor");
                            handle.abort();
                        }
                    }
                    aborted = true;
                }
                done = pending.next() => match done {
                    Some((streamer, result)) => record(streamer, outcome_of(result)),
                    None => break,
                },
            }
        }

        stats_token.cancel();
        if let Err(e) = stats_task.await {
            warn!(error = %e, "Stats task ended abnormally");
        }

        let report = RunReport {
            outcomes,
            stats: self.ctx.stats.snapshot(),
        };
        info!(
            stopped = report.outcomes.len(),
            failed = report.failures().len(),
            "Capture finished"
        );
        report
    }
}
