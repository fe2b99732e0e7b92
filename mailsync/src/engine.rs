//! # Engine
//!
//! Module dedicated to the transfer engine. The [`SyncEngine`] trait
//! abstracts the external program performing the actual mailbox
//! copy, and [`Invoker`] runs one bounded attempt through it,
//! recording the outcome in the durable log and the health record.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use process::{Command, Output};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{
    config::EngineConfig,
    health::{HealthStatus, HealthStore},
    log::{SyncLog, ERROR_TAIL_LINES},
    params::ParameterSet,
    report::{AttemptStatus, SyncAttempt, SyncStats},
};

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot run sync engine {1}")]
    RunEngineError(#[source] process::Error, String),
    #[error("sync attempt failed: {}", .0.status)]
    SyncAttemptFailedError(Box<SyncAttempt>),
}

/// How the engine process ended.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum EngineExit {
    Success,
    Failure(Option<i32>),
    TimedOut(Duration),
}

/// The raw result of one engine run.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineOutcome {
    pub exit: EngineExit,

    /// Combined standard output and standard error.
    pub output: Output,
}

impl EngineOutcome {
    pub fn new(exit: EngineExit, output: impl Into<Output>) -> Self {
        Self {
            exit,
            output: output.into(),
        }
    }
}

/// The transfer engine performing the protocol-level copy.
#[async_trait]
pub trait SyncEngine: Send + Sync {
    /// Runs the engine once with the given parameters.
    ///
    /// Returns an error only if the engine could not be run at all.
    async fn run(&self, params: &ParameterSet) -> Result<EngineOutcome>;
}

/// The `imapsync` engine, run as an external program.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImapsyncEngine {
    program: String,
    timeout: Duration,
}

impl ImapsyncEngine {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            program: config.program.clone(),
            timeout: config.timeout(),
        }
    }
}

#[async_trait]
impl SyncEngine for ImapsyncEngine {
    async fn run(&self, params: &ParameterSet) -> Result<EngineOutcome> {
        let cmd = Command::new(&self.program)
            .args(params.to_args())
            .with_timeout(self.timeout);

        match cmd.run().await {
            Ok(output) => Ok(EngineOutcome::new(EngineExit::Success, output)),
            Err(err) => {
                // the engine ran but did not succeed
                let Some(output) = err.output().cloned() else {
                    return Err(Error::RunEngineError(err, self.program.clone()));
                };

                let exit = match err {
                    process::Error::TimeoutError(_, timeout, _) => EngineExit::TimedOut(timeout),
                    err => EngineExit::Failure(err.code()),
                };

                Ok(EngineOutcome::new(exit, output))
            }
        }
    }
}

/// Runs sync attempts, one at a time.
pub struct Invoker {
    engine: Arc<dyn SyncEngine>,
    health: HealthStore,
    log: SyncLog,
    in_flight: Mutex<()>,
}

impl Invoker {
    pub fn new(engine: Arc<dyn SyncEngine>, health: HealthStore, log: SyncLog) -> Self {
        Self {
            engine,
            health,
            log,
            in_flight: Mutex::new(()),
        }
    }

    pub fn health(&self) -> &HealthStore {
        &self.health
    }

    /// Runs one sync attempt.
    ///
    /// A successful attempt appends the engine output to the durable
    /// log and marks the health record healthy. A failed attempt
    /// appends the last [`ERROR_TAIL_LINES`] lines of output, marks
    /// the health record unhealthy and is returned as an error.
    /// Retrying is up to the caller.
    pub async fn invoke(&self, params: &ParameterSet) -> Result<SyncAttempt> {
        let _in_flight = self.in_flight.lock().await;

        info!("starting synchronization");
        debug!(%params, "engine parameters");

        let started_at = Utc::now();
        let outcome = self.engine.run(params).await;
        let ended_at = Utc::now();

        let (status, output) = match outcome {
            Ok(EngineOutcome { exit, output }) => {
                let status = match exit {
                    EngineExit::Success => AttemptStatus::Succeeded,
                    EngineExit::Failure(code) => AttemptStatus::Failed {
                        code,
                        reason: String::from("engine exited with failure"),
                    },
                    EngineExit::TimedOut(timeout) => AttemptStatus::TimedOut(timeout),
                };
                (status, output)
            }
            Err(err) => {
                debug!("{err:?}");
                let mut output = Output::default();
                output.push_line(err.to_string());
                let status = AttemptStatus::Failed {
                    code: None,
                    reason: err.to_string(),
                };
                (status, output)
            }
        };

        let stats = match status {
            AttemptStatus::Succeeded => SyncStats::parse(&output.to_string_lossy()),
            _ => SyncStats::default(),
        };

        let attempt = SyncAttempt {
            started_at,
            ended_at,
            status,
            stats,
        };

        if attempt.is_success() {
            info!(
                transferred = attempt.stats.messages_transferred,
                skipped = attempt.stats.messages_skipped,
                bytes = attempt.stats.bytes_transferred,
                duration_secs = attempt.duration().as_secs(),
                "synchronization completed"
            );
            self.log.append_details(&attempt, &output.to_string_lossy());
            self.record_health(HealthStatus::Healthy);
            Ok(attempt)
        } else {
            error!(
                status = %attempt.status,
                code = ?attempt.exit_code(),
                duration_secs = attempt.duration().as_secs(),
                "synchronization failed"
            );
            self.log
                .append_error_details(&attempt, &output.last_lines(ERROR_TAIL_LINES));
            self.record_health(HealthStatus::Unhealthy);
            Err(Error::SyncAttemptFailedError(Box::new(attempt)))
        }
    }

    fn record_health(&self, status: HealthStatus) {
        if let Err(err) = self.health.record(status) {
            warn!("cannot record health status {status}: {err}");
            debug!("{err:?}");
        }
    }
}
