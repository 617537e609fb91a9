//! html-snapshots: static HTML captures of JavaScript-rendered pages
//!
//! This crate drives an external renderer process (a headless browser) once per
//! page and collects its output into a content-addressed file tree. It discovers
//! the pages to capture from arrays, text files, robots.txt and sitemaps, bounds
//! how many renderer processes run at once, and decides which captures succeeded
//! purely from filesystem side effects and per-file deadlines.

pub mod config;
pub mod input;
pub mod launcher;
pub mod orchestrator;
pub mod policy;
pub mod tracker;

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for html-snapshots operations
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to fetch {source_url}: {message}")]
    Fetch { source_url: String, message: String },

    #[error("Malformed document {source_url}: {message}")]
    Document { source_url: String, message: String },

    #[error("Failed to launch renderer for {}: {source}", output_file.display())]
    Launch {
        output_file: PathBuf,
        source: std::io::Error,
    },

    #[error("Tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("Request receiver closed")]
    ReceiverClosed,

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Snapshot script not found: {}", .0.display())]
    MissingScript(PathBuf),

    #[error("Output file {} is mapped by more than one URL", .0.display())]
    DuplicateOutput(PathBuf),
}

/// Reasons the completion tracker refuses to start
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TrackerError {
    #[error("no completion callback supplied")]
    MissingCallback,

    #[error("observation interval must be positive")]
    InvalidInterval,

    #[error("no input handle supplied")]
    MissingInput,
}

/// URL-specific errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for html-snapshots operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use input::{CaptureRequest, InputKind};
pub use orchestrator::{run, RunError, RunResult};
pub use policy::{still_current, ChangeFreq, UrlNode};
pub use tracker::{TrackedState, TrackerReport};
