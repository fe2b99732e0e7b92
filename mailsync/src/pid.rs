//! # Process identity
//!
//! Module dedicated to the process identity file, which lets an
//! external probe check that the orchestrator is alive.

use std::{
    io,
    num::ParseIntError,
    path::{Path, PathBuf},
    process,
};

use thiserror::Error;
use tracing::debug;

use crate::fs;

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot write pid file at {1}")]
    WritePidFileError(#[source] io::Error, PathBuf),
    #[error("cannot read pid file at {1}")]
    ReadPidFileError(#[source] io::Error, PathBuf),
    #[error("cannot parse pid file at {2}: invalid pid {1}")]
    ParsePidError(#[source] ParseIntError, String, PathBuf),
    #[error("cannot remove pid file at {1}")]
    RemovePidFileError(#[source] io::Error, PathBuf),
}

/// The file holding the identifier of the orchestrator process.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the identifier of the current process.
    pub fn write(&self) -> Result<u32> {
        let pid = process::id();
        fs::write_atomic(&self.path, format!("{pid}\n"))
            .map_err(|err| Error::WritePidFileError(err, self.path.clone()))?;
        debug!(pid, path = ?self.path, "pid file written");
        Ok(pid)
    }

    pub fn read(&self) -> Result<Option<u32>> {
        let Some(contents) = fs::read_if_exists(&self.path)
            .map_err(|err| Error::ReadPidFileError(err, self.path.clone()))?
        else {
            return Ok(None);
        };

        let pid = contents.trim();
        let pid = pid
            .parse()
            .map_err(|err| Error::ParsePidError(err, pid.to_owned(), self.path.clone()))?;

        Ok(Some(pid))
    }

    pub fn remove(&self) -> Result<()> {
        fs::remove_if_exists(&self.path)
            .map_err(|err| Error::RemovePidFileError(err, self.path.clone()))?;
        Ok(())
    }
}

/// Returns `true` if a process with the given identifier exists.
#[cfg(unix)]
pub fn is_alive(pid: u32) -> bool {
    use nix::{errno::Errno, sys::signal::kill, unistd::Pid};

    let pid = match i32::try_from(pid) {
        Ok(0) | Err(_) => return false,
        Ok(pid) => pid,
    };

    // signal 0 only checks that the process can be signaled
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Returns `true` if a process with the given identifier exists.
#[cfg(not(unix))]
pub fn is_alive(_pid: u32) -> bool {
    true
}
