//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tiktok_live::LiveError;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Live adapter error: {0}")]
    Live(#[from] LiveError),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error came from the local filesystem.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::Io(_) | Self::IoPath { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_path_display() {
        let err = Error::io_path(
            "creating output file",
            Path::new("/tmp/out/a.txt"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let msg = err.to_string();
        assert!(msg.contains("creating output file"));
        assert!(msg.contains("/tmp/out/a.txt"));
        assert!(err.is_io());
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("no streamers configured");
        assert_eq!(
            err.to_string(),
            "Configuration error: no streamers configured"
        );
        assert!(!err.is_io());
    }
}
