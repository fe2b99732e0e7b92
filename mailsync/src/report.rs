//! # Sync report
//!
//! Module dedicated to the outcome of one synchronization attempt.

use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static TRANSFERRED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^\s*(?:messages\s+)?transferred\s*:\s*(\d+)").unwrap()
});
static SKIPPED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?mi)^\s*(?:messages\s+)?skipped\s*:\s*(\d+)").unwrap());
static BYTES_TRANSFERRED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?mi)^\s*total\s+bytes\s+transferred\s*:\s*(\d+)").unwrap()
});

/// Transfer statistics extracted from the engine output.
///
/// A statistic missing from the output is zero.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SyncStats {
    pub messages_transferred: u64,
    pub messages_skipped: u64,
    pub bytes_transferred: u64,
}

impl SyncStats {
    pub fn parse(output: &str) -> Self {
        let find = |regex: &Regex| {
            regex
                .captures(output)
                .and_then(|captures| captures.get(1))
                .and_then(|n| n.as_str().parse().ok())
                .unwrap_or_default()
        };

        Self {
            messages_transferred: find(&TRANSFERRED),
            messages_skipped: find(&SKIPPED),
            bytes_transferred: find(&BYTES_TRANSFERRED),
        }
    }
}

/// How a synchronization attempt ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttemptStatus {
    /// The engine exited with a zero status code.
    Succeeded,

    /// The engine exited with a non-zero status code, was terminated
    /// by a signal (no code), or could not be started (no code).
    Failed { code: Option<i32>, reason: String },

    /// The engine was killed after exceeding its timeout.
    TimedOut(Duration),
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "success"),
            Self::Failed {
                code: Some(code), ..
            } => write!(f, "failure (exit code {code})"),
            Self::Failed { code: None, .. } => write!(f, "failure"),
            Self::TimedOut(timeout) => write!(f, "timeout after {}s", timeout.as_secs()),
        }
    }
}

/// One synchronization attempt.
///
/// Attempts are finalized once, when the engine returns, and never
/// mutated afterwards.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncAttempt {
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: AttemptStatus,
    pub stats: SyncStats,
}

impl SyncAttempt {
    pub fn is_success(&self) -> bool {
        matches!(self.status, AttemptStatus::Succeeded)
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self.status {
            AttemptStatus::Succeeded => Some(0),
            AttemptStatus::Failed { code, .. } => code,
            AttemptStatus::TimedOut(_) => None,
        }
    }

    pub fn duration(&self) -> Duration {
        (self.ended_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}
