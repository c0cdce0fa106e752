//! Shared fixtures: a scripted live provider and test configuration.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tiktok_live::{CommentEvent, LiveConnection, LiveError, LiveItem, LiveProvider};
use tiktok_scraper::ScraperConfig;
use tiktok_scraper::capture::CaptureEvent;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// One step of a scripted session.
pub enum Step {
    Comment(&'static str, &'static str),
    Item(LiveItem),
    Wait(Duration),
    /// The stream ends normally
    End,
    /// The session fails
    Fail(LiveError),
    /// Nothing more arrives
    Hang,
}

/// Outcome of one connection attempt.
pub enum Script {
    Refuse(LiveError),
    Session(Vec<Step>),
}

/// Provider that replays scripts per username. Once a username's scripts are used
/// up, further connection attempts never complete.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    sessions: Mutex<HashMap<String, VecDeque<Step>>>,
    connects: Mutex<Vec<(String, Instant)>>,
    disconnects: AtomicUsize,
    next_id: AtomicU64,
    stuck_disconnect: bool,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, username: &str, scripts: Vec<Script>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(username.to_string(), scripts.into());
        self
    }

    /// Make `disconnect` never complete.
    pub fn with_stuck_disconnect(mut self) -> Self {
        self.stuck_disconnect = true;
        self
    }

    /// Times at which `username` attempted to connect.
    pub fn connect_times(&self, username: &str) -> Vec<Instant> {
        self.connects
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == username)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }
}

#[async_trait]
impl LiveProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn connect(&self, username: &str) -> tiktok_live::Result<LiveConnection> {
        self.connects
            .lock()
            .unwrap()
            .push((username.to_string(), Instant::now()));
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(username)
            .and_then(|q| q.pop_front());

        match script {
            None => std::future::pending().await,
            Some(Script::Refuse(e)) => Err(e),
            Some(Script::Session(steps)) => {
                let id = format!("{}-{}", username, self.next_id.fetch_add(1, Ordering::SeqCst));
                self.sessions
                    .lock()
                    .unwrap()
                    .insert(id.clone(), steps.into());
                let mut conn = LiveConnection::new(id, username);
                conn.set_connected();
                Ok(conn)
            }
        }
    }

    async fn receive(&self, connection: &LiveConnection) -> tiktok_live::Result<Option<LiveItem>> {
        loop {
            let step = self
                .sessions
                .lock()
                .unwrap()
                .get_mut(&connection.id)
                .and_then(|q| q.pop_front());

            match step {
                None | Some(Step::Hang) => return std::future::pending().await,
                Some(Step::Wait(d)) => tokio::time::sleep(d).await,
                Some(Step::Comment(author, text)) => {
                    return Ok(Some(LiveItem::Comment(CommentEvent::new(
                        connection.username.clone(),
                        author,
                        text,
                    ))));
                }
                Some(Step::Item(item)) => return Ok(Some(item)),
                Some(Step::End) => return Ok(None),
                Some(Step::Fail(e)) => return Err(e),
            }
        }
    }

    async fn disconnect(&self, connection: &mut LiveConnection) -> tiktok_live::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if self.stuck_disconnect {
            return std::future::pending().await;
        }
        self.sessions.lock().unwrap().remove(&connection.id);
        connection.set_disconnected();
        Ok(())
    }
}

/// Defaults with the shared gate disabled and no jitter.
pub fn test_config(output_dir: &Path) -> ScraperConfig {
    ScraperConfig {
        output_dir: output_dir.to_path_buf(),
        reconnect_baseline_seconds: 15,
        reconnect_max_seconds: 1800,
        rate_limit_floor_seconds: 3600,
        global_rate_limit_seconds: 0,
        min_connection_interval_seconds: 0,
        reconnect_jitter: 0.0,
        stability_seconds: 60,
        ..Default::default()
    }
}

/// Wait for the next event matching `pred`.
pub async fn next_event<F>(rx: &mut broadcast::Receiver<CaptureEvent>, mut pred: F) -> CaptureEvent
where
    F: FnMut(&CaptureEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(24 * 60 * 60), wait)
        .await
        .expect("timed out waiting for event")
}

pub fn is_backoff(event: &CaptureEvent) -> bool {
    matches!(event, CaptureEvent::BackoffScheduled { .. })
}

pub fn is_connected(event: &CaptureEvent) -> bool {
    matches!(event, CaptureEvent::Connected { .. })
}

pub fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}
