//! # Health
//!
//! Module dedicated to the health record, written after every sync
//! attempt and at every heartbeat, then read by an external liveness
//! probe ([`evaluate`]).
//!
//! The record is a two-line file: the status token (`healthy` or
//! `unhealthy`) and the Unix timestamp of the last update.

use std::{
    fmt, io,
    num::ParseIntError,
    path::{Path, PathBuf},
};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{fs, pid};

/// A record older than this, in seconds, is unhealthy whatever its
/// status.
pub const STALE_AFTER_SECS: i64 = 300;

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read health file at {1}")]
    ReadHealthFileError(#[source] io::Error, PathBuf),
    #[error("cannot write health file at {1}")]
    WriteHealthFileError(#[source] io::Error, PathBuf),
    #[error("cannot remove health file at {1}")]
    RemoveHealthFileError(#[source] io::Error, PathBuf),
    #[error("cannot parse health record: missing timestamp")]
    ParseMissingTimestampError,
    #[error("cannot parse health record timestamp {1}")]
    ParseTimestampError(#[source] ParseIntError, String),
}

/// Errors reported by the liveness probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("orchestrator process is not running")]
    ProcessNotRunningError,
    #[error("cannot check orchestrator process")]
    CheckProcessError(#[source] pid::Error),
    #[error("health record is missing")]
    MissingHealthRecordError,
    #[error("health status is {0}")]
    UnhealthyStatusError(HealthStatus),
    #[error("health record is stale: last update {0}s ago")]
    StaleHealthRecordError(i64),
    #[error("cannot check health record")]
    CheckHealthRecordError(#[source] Error),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for HealthStatus {
    fn from(token: &str) -> Self {
        match token.trim() {
            "healthy" => Self::Healthy,
            "unhealthy" => Self::Unhealthy,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HealthRecord {
    pub status: HealthStatus,

    /// Unix timestamp of the last update, in seconds.
    pub updated_at: i64,
}

impl HealthRecord {
    pub fn new(status: HealthStatus, updated_at: i64) -> Self {
        Self { status, updated_at }
    }

    pub fn now(status: HealthStatus) -> Self {
        Self::new(status, Utc::now().timestamp())
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut lines = contents.lines();
        let status = HealthStatus::from(lines.next().unwrap_or_default());
        let ts = lines
            .next()
            .map(str::trim)
            .ok_or(Error::ParseMissingTimestampError)?;
        let updated_at = ts
            .parse()
            .map_err(|err| Error::ParseTimestampError(err, ts.to_owned()))?;

        Ok(Self::new(status, updated_at))
    }

    /// Returns the age of the record at the given time, in seconds.
    pub fn age_at(&self, now: i64) -> i64 {
        now - self.updated_at
    }

    pub fn is_stale_at(&self, now: i64) -> bool {
        self.age_at(now) > STALE_AFTER_SECS
    }
}

impl fmt::Display for HealthRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.status)?;
        writeln!(f, "{}", self.updated_at)
    }
}

/// The health record file.
///
/// Writes replace the file atomically and never go back in time: a
/// record older than the stored one is discarded.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HealthStore {
    path: PathBuf,
}

impl HealthStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<HealthRecord>> {
        let contents = fs::read_if_exists(&self.path)
            .map_err(|err| Error::ReadHealthFileError(err, self.path.clone()))?;

        contents.as_deref().map(HealthRecord::parse).transpose()
    }

    /// Writes the given record, unless the stored one is more recent.
    ///
    /// Returns `false` if the record was discarded.
    pub fn write(&self, record: HealthRecord) -> Result<bool> {
        if let Ok(Some(current)) = self.read() {
            if current.updated_at > record.updated_at {
                debug!(
                    current = current.updated_at,
                    discarded = record.updated_at,
                    "discard health record older than the stored one"
                );
                return Ok(false);
            }
        }

        fs::write_atomic(&self.path, record.to_string())
            .map_err(|err| Error::WriteHealthFileError(err, self.path.clone()))?;
        trace!(status = %record.status, ts = record.updated_at, "health record written");

        Ok(true)
    }

    pub fn record(&self, status: HealthStatus) -> Result<bool> {
        self.write(HealthRecord::now(status))
    }

    /// Marks the orchestrator as alive, whatever the outcome of the
    /// last attempt.
    pub fn record_heartbeat(&self) -> Result<bool> {
        self.record(HealthStatus::Healthy)
    }

    pub fn remove(&self) -> Result<()> {
        fs::remove_if_exists(&self.path)
            .map_err(|err| Error::RemoveHealthFileError(err, self.path.clone()))?;
        Ok(())
    }
}

/// Evaluates the liveness of the orchestrator now.
///
/// See [`evaluate_at`].
pub fn evaluate(
    pid_file: &pid::PidFile,
    store: &HealthStore,
) -> std::result::Result<HealthRecord, ProbeError> {
    evaluate_at(pid_file, store, Utc::now().timestamp())
}

/// Evaluates the liveness of the orchestrator at the given time.
///
/// The orchestrator is alive if its process is running and its
/// health record is present, healthy and at most
/// [`STALE_AFTER_SECS`] old.
pub fn evaluate_at(
    pid_file: &pid::PidFile,
    store: &HealthStore,
    now: i64,
) -> std::result::Result<HealthRecord, ProbeError> {
    let pid = pid_file
        .read()
        .map_err(ProbeError::CheckProcessError)?
        .ok_or(ProbeError::ProcessNotRunningError)?;

    if !pid::is_alive(pid) {
        return Err(ProbeError::ProcessNotRunningError);
    }

    let record = store
        .read()
        .map_err(ProbeError::CheckHealthRecordError)?
        .ok_or(ProbeError::MissingHealthRecordError)?;

    if record.status != HealthStatus::Healthy {
        return Err(ProbeError::UnhealthyStatusError(record.status));
    }

    if record.is_stale_at(now) {
        return Err(ProbeError::StaleHealthRecordError(record.age_at(now)));
    }

    Ok(record)
}
