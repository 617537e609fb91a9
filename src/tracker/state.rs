//! Per-file states of the completion tracker

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::time::Instant;

/// Where an expected output file stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedState {
    /// Registered; neither written nor past its deadline
    Pending,

    // ===== Terminal States =====
    /// The file was observed on disk
    Satisfied,

    /// The deadline passed without the file appearing
    TimedOut,

    /// Removed before either outcome, e.g. the renderer failed to start
    Cancelled,
}

impl TrackedState {
    /// Returns true once no further transition is possible
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Satisfied)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Satisfied => "satisfied",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TrackedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bookkeeping for one expected output file
#[derive(Debug, Clone)]
pub(crate) struct TrackedFile {
    pub path: PathBuf,
    pub state: TrackedState,
    pub timeout: std::time::Duration,
    /// Modification time at registration, if the file already existed
    pub baseline: Option<SystemTime>,
    /// Set once the renderer has been started
    pub deadline: Option<Instant>,
}

impl TrackedFile {
    pub fn new(path: PathBuf, timeout: std::time::Duration, baseline: Option<SystemTime>) -> Self {
        Self {
            path,
            state: TrackedState::Pending,
            timeout,
            baseline,
            deadline: None,
        }
    }

    /// Whether the renderer has written the file since registration
    pub async fn written(&self) -> bool {
        match tokio::fs::metadata(&self.path).await {
            Ok(meta) => {
                meta.is_file()
                    && (self.baseline.is_none() || meta.modified().ok() != self.baseline)
            }
            Err(_) => false,
        }
    }
}
