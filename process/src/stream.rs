//! # Line stream
//!
//! Module dedicated to long-lived commands. It only exposes the
//! [`LineStream`] struct, which reads the standard output of a
//! spawned command line by line.

use tokio::{
    io::{AsyncBufReadExt as _, BufReader, Split},
    process::{Child, ChildStdout},
};
use tracing::debug;

use crate::{Error, Result};

/// Standard output of a spawned command, read line by line.
#[derive(Debug)]
pub struct LineStream {
    program: String,
    child: Child,
    lines: Split<BufReader<ChildStdout>>,
}

impl LineStream {
    pub(crate) fn new(program: String, child: Child, stdout: ChildStdout) -> Self {
        Self {
            program,
            child,
            lines: BufReader::new(stdout).split(b'\n'),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Returns the next line, without its line terminator, or `None`
    /// once the command closed its standard output.
    ///
    /// This function is cancel safe.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let line = self
            .lines
            .next_segment()
            .await
            .map_err(|err| Error::ReadStdoutError(err, self.program.clone()))?;

        Ok(line.map(|line| {
            let line = String::from_utf8_lossy(&line);
            line.trim_end_matches('\r').to_owned()
        }))
    }

    /// Waits for the command to exit and returns its exit status
    /// code, if any.
    pub async fn wait(&mut self) -> Result<Option<i32>> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|err| Error::WaitForExitStatusError(err, self.program.clone()))?;
        Ok(status.code())
    }

    /// Kills the command and waits for it to exit.
    pub async fn kill(&mut self) -> Result<()> {
        debug!(program = self.program, "kill spawned command");

        self.child
            .kill()
            .await
            .map_err(|err| Error::KillCommandError(err, self.program.clone()))
    }
}
