//! # Error
//!
//! Module dedicated to process errors. It contains an [`Error`] enum
//! based on [`thiserror::Error`] and a type alias [`Result`].

use std::{io, string::FromUtf8Error, time::Duration};

use thiserror::Error;

use crate::Output;

/// The global `Result` alias of the library.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the library.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot spawn command {1}")]
    SpawnCommandError(#[source] io::Error, String),
    #[error("cannot get standard output of command {0}")]
    GetStdoutError(String),
    #[error("cannot get standard error of command {0}")]
    GetStderrError(String),
    #[error("cannot read standard output of command {1}")]
    ReadStdoutError(#[source] io::Error, String),
    #[error("cannot read standard error of command {1}")]
    ReadStderrError(#[source] io::Error, String),
    #[error("cannot wait for exit status of command {1}")]
    WaitForExitStatusError(#[source] io::Error, String),
    #[error("cannot kill command {1}")]
    KillCommandError(#[source] io::Error, String),
    #[error("command {0} was terminated by a signal")]
    GetExitStatusCodeNotAvailableError(String, Output),
    #[error("command {0} returned non-zero exit status code {1}")]
    GetExitStatusCodeNonZeroError(String, i32, Output),
    #[error("command {0} timed out after {1:?}")]
    TimeoutError(String, Duration, Output),
    #[error("cannot parse command output as string")]
    ParseOutputAsUtf8StringError(#[source] FromUtf8Error),
}

impl Error {
    /// Returns the output captured before the command failed, if
    /// any.
    pub fn output(&self) -> Option<&Output> {
        match self {
            Self::GetExitStatusCodeNotAvailableError(_, output) => Some(output),
            Self::GetExitStatusCodeNonZeroError(_, _, output) => Some(output),
            Self::TimeoutError(_, _, output) => Some(output),
            _ => None,
        }
    }

    /// Returns the exit status code of the command, if it exited by
    /// itself with a non-zero code.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::GetExitStatusCodeNonZeroError(_, code, _) => Some(*code),
            _ => None,
        }
    }
}
