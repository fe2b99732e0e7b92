//! # Mode
//!
//! Module dedicated to the operating strategies. A [`Strategy`] is
//! selected once at startup from the configured [`SyncMode`], then
//! its control loop runs until the process stops. Idle and push
//! strategies fall back to polling when their collaborator is not
//! available at selection time. There is no downgrade afterwards: a
//! collaborator failing later on is a process-level failure.

use std::{convert::Infallible, fmt, future, time::Duration};

use thiserror::Error;
use tokio::time::{interval_at, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    config::{SyncConfig, SyncMode},
    engine::{self, Invoker},
    params::ParameterSet,
    watch::{self, Watch, WatchEvent},
};

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot start {1} collaborator")]
    StartCollaboratorError(#[source] watch::Error, String),
    #[error("{0} collaborator failed: {1}")]
    CollaboratorFailedError(String, String),
}

/// The control loop run by the orchestrator.
pub enum Strategy {
    /// Synchronize at a fixed interval.
    Poll,

    /// Synchronize on long-wait notifications, refreshing the session
    /// periodically.
    Idle(Box<dyn Watch>),

    /// Synchronize on push notifications.
    Push(Box<dyn Watch>),
}

impl Strategy {
    /// Selects the strategy for the given mode.
    ///
    /// The collaborator of the idle and push modes is queried once
    /// for availability. An unavailable or missing collaborator makes
    /// the selection fall back to [`Strategy::Poll`], which is logged.
    pub async fn select(mode: SyncMode, watch: Option<Box<dyn Watch>>) -> Self {
        let watch = match (mode, watch) {
            (SyncMode::Poll, _) => return Self::Poll,
            (mode, None) => {
                warn!(%mode, "no collaborator for mode, falling back to poll mode");
                return Self::Poll;
            }
            (_, Some(watch)) => watch,
        };

        if !watch.is_available().await {
            warn!(
                %mode,
                collaborator = watch.name(),
                "collaborator unavailable, falling back to poll mode"
            );
            return Self::Poll;
        }

        match mode {
            SyncMode::Idle => Self::Idle(watch),
            SyncMode::Push => Self::Push(watch),
            SyncMode::Poll => Self::Poll,
        }
    }

    pub fn mode(&self) -> SyncMode {
        match self {
            Self::Poll => SyncMode::Poll,
            Self::Idle(_) => SyncMode::Idle,
            Self::Push(_) => SyncMode::Push,
        }
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => write!(f, "Poll"),
            Self::Idle(watch) => write!(f, "Idle({})", watch.name()),
            Self::Push(watch) => write!(f, "Push({})", watch.name()),
        }
    }
}

/// Drives the selected strategy, triggering sync attempts through
/// the [`Invoker`].
pub struct Dispatcher {
    invoker: Invoker,
    params: ParameterSet,
    poll_interval: Duration,
    idle_refresh: Duration,
    heartbeat_interval: Duration,
}

impl Dispatcher {
    pub fn new(config: &SyncConfig, invoker: Invoker) -> Self {
        Self {
            invoker,
            params: ParameterSet::build(config),
            poll_interval: config.poll_interval(),
            idle_refresh: config.idle_refresh(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    /// Runs the control loop of the given strategy.
    ///
    /// Only returns on a collaborator failure: the poll loop never
    /// ends by itself.
    pub async fn run(&self, strategy: Strategy) -> Result<Infallible> {
        info!(mode = %strategy.mode(), "entering control loop");

        match strategy {
            Strategy::Poll => self.run_poll().await,
            Strategy::Idle(mut watch) => {
                self.run_watch(watch.as_mut(), Some(self.idle_refresh)).await
            }
            Strategy::Push(mut watch) => self.run_watch(watch.as_mut(), None).await,
        }
    }

    /// Heartbeat, attempt, sleep, forever. Failed attempts are
    /// retried at the same interval.
    async fn run_poll(&self) -> Result<Infallible> {
        loop {
            self.heartbeat();
            self.sync().await;
            debug!(secs = self.poll_interval.as_secs(), "waiting for next poll");
            sleep(self.poll_interval).await;
        }
    }

    async fn run_watch(
        &self,
        watch: &mut dyn Watch,
        refresh: Option<Duration>,
    ) -> Result<Infallible> {
        let name = watch.name().to_owned();

        watch
            .start()
            .await
            .map_err(|err| Error::StartCollaboratorError(err, name.clone()))?;

        self.heartbeat();
        self.sync().await;

        let mut heartbeat = interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut refresh_deadline = refresh.map(|refresh| Instant::now() + refresh);

        loop {
            let refresh_elapsed = async move {
                match refresh_deadline {
                    Some(deadline) => sleep_until(deadline).await,
                    None => future::pending().await,
                }
            };

            tokio::select! {
                event = watch.next_event() => match event {
                    WatchEvent::Changed => {
                        info!(collaborator = name, "change detected");
                        self.sync().await;
                    }
                    WatchEvent::Alive => {
                        self.heartbeat();
                    }
                    WatchEvent::Fatal(reason) => {
                        watch.stop().await;
                        return Err(Error::CollaboratorFailedError(name, reason));
                    }
                },
                _ = heartbeat.tick() => {
                    self.heartbeat();
                }
                _ = refresh_elapsed => {
                    info!(collaborator = name, "refreshing session");
                    watch.stop().await;
                    self.sync().await;
                    watch
                        .start()
                        .await
                        .map_err(|err| Error::StartCollaboratorError(err, name.clone()))?;
                    refresh_deadline = refresh.map(|refresh| Instant::now() + refresh);
                }
            }
        }
    }

    async fn sync(&self) {
        match self.invoker.invoke(&self.params).await {
            Ok(_) => (),
            Err(engine::Error::SyncAttemptFailedError(attempt)) => {
                debug!(status = %attempt.status, "attempt failed, will retry");
            }
            Err(err) => {
                warn!("cannot synchronize: {err}");
                debug!("{err:?}");
            }
        }
    }

    fn heartbeat(&self) {
        if let Err(err) = self.invoker.health().record_heartbeat() {
            warn!("cannot record heartbeat: {err}");
            debug!("{err:?}");
        }
    }
}
