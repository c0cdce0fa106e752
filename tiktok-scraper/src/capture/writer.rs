//! Per-session output files.
//!
//! Every successful connection gets its own file; nothing is ever appended to a file
//! from an earlier session. Each line is flushed as soon as it is written.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::Result;
use crate::capture::filter::clean_comment_text;
use crate::utils::fs;

/// Prefix for lines that are not comments.
pub const SYSTEM_PREFIX: &str = "SYSTEM: ";

/// A single live session and the file it writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub streamer: String,
    pub connected_at: DateTime<Local>,
    pub output_file_path: PathBuf,
}

/// File name for a session that started at `started_at`.
pub fn session_file_name(username: &str, started_at: &DateTime<Local>) -> String {
    format!(
        "tiktok-rawdata-{}-{}.txt",
        username,
        started_at.format("%Y%m%d_%H%M%S")
    )
}

/// Line announcing a new session.
pub fn connected_line(username: &str) -> String {
    format!("{SYSTEM_PREFIX}Connected to @{username}'s live stream")
}

/// Line announcing the end of a session.
pub fn disconnected_line(username: &str) -> String {
    format!("{SYSTEM_PREFIX}Disconnected from @{username}'s live stream")
}

/// Appends lines to one session's output file.
pub struct SessionWriter {
    record: SessionRecord,
    file: File,
    lines_written: u64,
}

impl SessionWriter {
    /// Create a fresh file in `dir` for a session of `username` started at `connected_at`.
    ///
    /// If the timestamped name is taken, `-1`, `-2`, ... is appended before `.txt`.
    pub async fn create(dir: &Path, username: &str, connected_at: DateTime<Local>) -> Result<Self> {
        fs::ensure_dir_all_with_op("creating output directory", dir).await?;

        let base = session_file_name(username, &connected_at);
        let stem = base.trim_end_matches(".txt");
        let mut attempt = 0u32;

        loop {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{stem}-{attempt}.txt")
            };
            let path = dir.join(name);

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => {
                    debug!(streamer = %username, path = %path.display(), "Opened session file");
                    return Ok(Self {
                        record: SessionRecord {
                            streamer: username.to_string(),
                            connected_at,
                            output_file_path: path,
                        },
                        file,
                        lines_written: 0,
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(fs::io_error("creating output file", &path, e)),
            }
        }
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn path(&self) -> &Path {
        &self.record.output_file_path
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written
    }

    /// Append `line` and a newline, then flush.
    pub async fn write_line(&mut self, line: &str) -> Result<()> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');

        let path = &self.record.output_file_path;
        self.file
            .write_all(buf.as_bytes())
            .await
            .map_err(|e| fs::io_error("writing output file", path, e))?;
        self.file
            .flush()
            .await
            .map_err(|e| fs::io_error("flushing output file", path, e))?;
        self.lines_written += 1;
        Ok(())
    }

    /// Append a comment line, optionally prefixed with its author.
    pub async fn write_comment(&mut self, author: &str, text: &str, include_author: bool) -> Result<()> {
        let text = clean_comment_text(text);
        if include_author {
            let author = clean_comment_text(author);
            self.write_line(&format!("{author}: {text}")).await
        } else {
            self.write_line(&text).await
        }
    }

    /// Flush and sync the file to disk.
    pub async fn close(mut self) -> Result<SessionRecord> {
        let path = &self.record.output_file_path;
        self.file
            .flush()
            .await
            .map_err(|e| fs::io_error("flushing output file", path, e))?;
        self.file
            .sync_all()
            .await
            .map_err(|e| fs::io_error("syncing output file", path, e))?;
        Ok(self.record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 3).unwrap()
    }

    #[test]
    fn test_session_file_name() {
        assert_eq!(
            session_file_name("alice", &fixed_time()),
            "tiktok-rawdata-alice-20240309_070503.txt"
        );
    }

    #[test]
    fn test_system_lines() {
        assert_eq!(
            connected_line("alice"),
            "SYSTEM: Connected to @alice's live stream"
        );
        assert_eq!(
            disconnected_line("alice"),
            "SYSTEM: Disconnected from @alice's live stream"
        );
    }

    #[tokio::test]
    async fn test_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SessionWriter::create(dir.path(), "alice", fixed_time())
            .await
            .unwrap();

        writer.write_line(&connected_line("alice")).await.unwrap();
        writer.write_comment("bob", "hello\nthere", false).await.unwrap();
        writer.write_comment("bob", "hi", true).await.unwrap();
        assert_eq!(writer.lines_written(), 3);

        let path = writer.path().to_path_buf();
        let record = writer.close().await.unwrap();
        assert_eq!(record.output_file_path, path);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            contents,
            "SYSTEM: Connected to @alice's live stream\nhello there\nbob: hi\n"
        );
    }

    #[tokio::test]
    async fn test_same_second_sessions_get_unique_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = SessionWriter::create(dir.path(), "alice", fixed_time())
            .await
            .unwrap();
        let second = SessionWriter::create(dir.path(), "alice", fixed_time())
            .await
            .unwrap();
        let third = SessionWriter::create(dir.path(), "alice", fixed_time())
            .await
            .unwrap();

        assert_ne!(first.path(), second.path());
        assert!(
            second
                .path()
                .ends_with("tiktok-rawdata-alice-20240309_070503-1.txt")
        );
        assert!(
            third
                .path()
                .ends_with("tiktok-rawdata-alice-20240309_070503-2.txt")
        );
    }

    #[tokio::test]
    async fn test_unwritable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();

        let result = SessionWriter::create(&blocker, "alice", fixed_time()).await;
        let err = result.err().expect("creating in a file path must fail");
        assert!(err.is_io());
    }
}
