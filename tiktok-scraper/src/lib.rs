//! # tiktok-scraper
//!
//! Records public comments from TikTok live streams, one supervised connection per
//! streamer, to timestamped text files.

pub mod capture;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod utils;

pub use config::{ScraperConfig, StreamerTarget};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RunReport, StreamerOutcome};
