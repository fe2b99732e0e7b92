use std::{
    fmt,
    path::PathBuf,
    process::{ExitStatus, Stdio},
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt as _, BufReader},
    process::Command as AsyncCommand,
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{Error, LineStream, Output, Result};

/// The command structure.
///
/// A command is a program and its arguments, kept as discrete
/// tokens. Arguments are handed over to the program as they are,
/// without being interpreted by any shell.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Command {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl Command {
    pub fn new(program: impl ToString) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl ToString>) -> Self {
        self.args.extend(args.into_iter().map(|arg| arg.to_string()));
        self
    }

    /// Adds an environment variable to the ones inherited from the
    /// parent process.
    pub fn env(mut self, key: impl ToString, val: impl ToString) -> Self {
        self.envs.push((key.to_string(), val.to_string()));
        self
    }

    pub fn with_some_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_some_timeout(Some(timeout))
    }

    /// Runs the command until it exits, or until the timeout elapses.
    ///
    /// Standard output and standard error are combined line by line
    /// into the returned [`Output`]. A non-zero exit status, a
    /// termination by signal or a timeout are returned as errors
    /// carrying the output captured so far. A timed out command is
    /// killed before returning.
    pub async fn run(&self) -> Result<Output> {
        let program = &self.program;
        info!(program, args = self.args.len(), "run command");

        let mut child = self
            .to_async_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| Error::SpawnCommandError(err, program.clone()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::GetStdoutError(program.clone()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::GetStderrError(program.clone()))?;

        let mut output = Output::default();

        let run = async {
            let mut stdout = BufReader::new(stdout).split(b'\n');
            let mut stderr = BufReader::new(stderr).split(b'\n');
            let (mut stdout_done, mut stderr_done) = (false, false);

            while !(stdout_done && stderr_done) {
                tokio::select! {
                    line = stdout.next_segment(), if !stdout_done => {
                        match line.map_err(|err| Error::ReadStdoutError(err, program.clone()))? {
                            Some(line) => output.push_line(line),
                            None => stdout_done = true,
                        }
                    }
                    line = stderr.next_segment(), if !stderr_done => {
                        match line.map_err(|err| Error::ReadStderrError(err, program.clone()))? {
                            Some(line) => output.push_line(line),
                            None => stderr_done = true,
                        }
                    }
                }
            }

            let status = child
                .wait()
                .await
                .map_err(|err| Error::WaitForExitStatusError(err, program.clone()))?;

            Ok::<ExitStatus, Error>(status)
        };

        let status = match self.timeout {
            None => run.await?,
            Some(duration) => {
                let res = timeout(duration, run).await;
                match res {
                    Ok(status) => status?,
                    Err(_) => {
                        warn!(program, ?duration, "command timed out, killing it");
                        child
                            .kill()
                            .await
                            .map_err(|err| Error::KillCommandError(err, program.clone()))?;
                        return Err(Error::TimeoutError(program.clone(), duration, output));
                    }
                }
            }
        };

        match status.code() {
            Some(0) => {
                debug!(program, "command gracefully exited");
                Ok(output)
            }
            Some(code) => {
                debug!(program, code, "command ungracefully exited");
                Err(Error::GetExitStatusCodeNonZeroError(
                    program.clone(),
                    code,
                    output,
                ))
            }
            None => {
                debug!(program, "command terminated by signal");
                Err(Error::GetExitStatusCodeNotAvailableError(
                    program.clone(),
                    output,
                ))
            }
        }
    }

    /// Spawns the command and exposes its standard output as a
    /// stream of lines.
    ///
    /// Standard error is inherited from the parent process. The
    /// spawned program is killed when the stream is dropped.
    pub fn spawn_lines(&self) -> Result<LineStream> {
        info!(program = self.program, "spawn command");

        let mut child = self
            .to_async_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| Error::SpawnCommandError(err, self.program.clone()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::GetStdoutError(self.program.clone()))?;

        Ok(LineStream::new(self.program.clone(), child, stdout))
    }

    fn to_async_command(&self) -> AsyncCommand {
        let mut cmd = AsyncCommand::new(&self.program);
        cmd.args(&self.args);
        cmd.envs(self.envs.iter().map(|(key, val)| (key, val)));
        cmd.kill_on_drop(true);
        cmd
    }
}

// Arguments and environment values may hold credentials, so only
// their count and keys are rendered.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("program", &self.program)
            .field("args", &self.args.len())
            .field(
                "envs",
                &self.envs.iter().map(|(key, _)| key).collect::<Vec<_>>(),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)
    }
}

impl From<&str> for Command {
    fn from(program: &str) -> Self {
        Self::new(program)
    }
}

impl From<String> for Command {
    fn from(program: String) -> Self {
        Self::new(program)
    }
}

/// Resolves the given program the way [`Command`] would, either as a
/// path or by searching the `PATH` environment variable.
///
/// Returns `None` if the program cannot be found or is not
/// executable.
pub fn find_program(program: impl AsRef<str>) -> Option<PathBuf> {
    let program = program.as_ref();

    match which::which(program) {
        Ok(path) => {
            debug!(program, ?path, "program found");
            Some(path)
        }
        Err(err) => {
            debug!(program, %err, "program not found");
            None
        }
    }
}
