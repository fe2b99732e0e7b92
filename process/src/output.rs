//! # Output
//!
//! Module dedicated to command output. It only exposes an [`Output`]
//! struct, a wrapper around the raw combined output of a command.

use std::ops::{Deref, DerefMut};

use crate::{Error, Result};

/// Wrapper around command output.
///
/// The output combines standard output and standard error, line by
/// line, in the order lines were received.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Output(Vec<u8>);

impl Output {
    /// Appends the given line, terminating it with a line feed.
    pub fn push_line(&mut self, line: impl AsRef<[u8]>) {
        let line = line.as_ref();
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        self.0.extend_from_slice(line);
        self.0.push(b'\n');
    }

    /// Reads the command output as string lossy.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(self).to_string()
    }

    /// Returns at most the `n` last lines of the output.
    pub fn last_lines(&self, n: usize) -> Vec<String> {
        let output = self.to_string_lossy();
        let lines: Vec<&str> = output.lines().collect();
        let skip = lines.len().saturating_sub(n);
        lines[skip..].iter().map(ToString::to_string).collect()
    }
}

impl Deref for Output {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Output {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<u8>> for Output {
    fn from(output: Vec<u8>) -> Self {
        Self(output)
    }
}

impl From<String> for Output {
    fn from(output: String) -> Self {
        Self(output.into_bytes())
    }
}

impl From<&str> for Output {
    fn from(output: &str) -> Self {
        Self(output.as_bytes().to_vec())
    }
}

impl From<Output> for Vec<u8> {
    fn from(output: Output) -> Self {
        output.0
    }
}

impl TryFrom<Output> for String {
    type Error = Error;

    fn try_from(output: Output) -> Result<Self> {
        String::from_utf8(output.into()).map_err(Error::ParseOutputAsUtf8StringError)
    }
}
