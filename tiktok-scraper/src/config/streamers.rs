//! Streamer list file.
//!
//! One username per line. Blank lines and `#` comments are ignored, a leading `@` is
//! stripped, and repeated usernames keep their first position.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, warn};

use crate::utils::fs;
use crate::{Error, Result};

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.]{1,24}$").unwrap());

const STREAMERS_TEMPLATE: &str = "\
# TikTok streamers
# One username per line, with or without the leading @
# Lines starting with # are comments

# Examples (replace with actual usernames):
# username1
# username2
";

/// A monitored TikTok account.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamerTarget {
    pub username: String,
}

impl StreamerTarget {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

impl std::fmt::Display for StreamerTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.username)
    }
}

/// Check a username against TikTok's allowed format.
pub fn is_valid_username(username: &str) -> bool {
    USERNAME_REGEX.is_match(username)
}

/// Parse a streamer list.
///
/// Returns the accepted targets in file order and the rejected entries as
/// `(line number, text)`.
pub fn parse_streamers(contents: &str) -> (Vec<StreamerTarget>, Vec<(usize, String)>) {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();
    let mut rejected = Vec::new();

    for (idx, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let username = line.trim_start_matches('@').trim();
        if !is_valid_username(username) {
            rejected.push((idx + 1, line.to_string()));
            continue;
        }
        if seen.insert(username.to_string()) {
            targets.push(StreamerTarget::new(username));
        }
    }

    (targets, rejected)
}

/// Load the streamer list from `path`.
///
/// A missing file is replaced by a commented template. An empty list is a
/// configuration error, so the caller never starts with nothing to do.
pub async fn load_streamers(path: &Path) -> Result<Vec<StreamerTarget>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "Streamers file not found, creating template");
            fs::ensure_parent_dir_with_op("creating streamers directory", path).await?;
            tokio::fs::write(path, STREAMERS_TEMPLATE)
                .await
                .map_err(|e| fs::io_error("writing streamers template", path, e))?;
            String::new()
        }
        Err(e) => {
            return Err(Error::config(format!(
                "cannot read streamers file {}: {}",
                path.display(),
                e
            )));
        }
    };

    let (targets, rejected) = parse_streamers(&contents);
    for (line, text) in &rejected {
        warn!(line = line, entry = %text, "Invalid username in streamers file, skipping");
    }

    if targets.is_empty() {
        return Err(Error::config(format!(
            "no streamers configured, add usernames to {}",
            path.display()
        )));
    }

    info!(count = targets.len(), "Loaded streamers");
    Ok(targets)
}
