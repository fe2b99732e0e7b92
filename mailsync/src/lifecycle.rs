//! # Lifecycle
//!
//! Module dedicated to the process lifecycle. The [`Orchestrator`]
//! writes the process identity, waits for a complete configuration,
//! selects the strategy and runs it until a shutdown is requested.
//! On shutdown, the process identity and the health record are
//! removed, so the liveness probe fails fast instead of reporting a
//! stale success.

use std::{
    fs,
    future::Future,
    io,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::SyncMode,
    engine::{ImapsyncEngine, Invoker, SyncEngine},
    env::{Env, EnvSource},
    health::HealthStore,
    log::SyncLog,
    mode::{self, Dispatcher, Strategy},
    pid::PidFile,
    resolve::{self, RECHECK_INTERVAL},
    watch::{HelperWatch, Watch},
};

pub const DEFAULT_STATE_DIR: &str = "/app/data";
pub const DEFAULT_LOG_DIR: &str = "/app/logs";
pub const HEALTH_FILE: &str = "health";
pub const PID_FILE: &str = "mailsync.pid";
pub const LOG_FILE: &str = "sync.log";

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot create state directory at {1}")]
    CreateStateDirError(#[source] io::Error, PathBuf),
    #[error(transparent)]
    ModeError(#[from] mode::Error),
}

/// Locations of the process state, shared by all components.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Context {
    pub state_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl Context {
    pub fn new(state_dir: impl Into<PathBuf>, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            log_dir: log_dir.into(),
        }
    }

    /// Reads locations from `MAILSYNC_STATE_DIR` and
    /// `MAILSYNC_LOG_DIR`.
    pub fn from_env(env: &Env) -> Self {
        Self::new(
            env.get("MAILSYNC_STATE_DIR").unwrap_or(DEFAULT_STATE_DIR),
            env.get("MAILSYNC_LOG_DIR").unwrap_or(DEFAULT_LOG_DIR),
        )
    }

    pub fn health_path(&self) -> PathBuf {
        self.state_dir.join(HEALTH_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.state_dir.join(PID_FILE)
    }

    pub fn log_path(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE)
    }

    pub fn health_store(&self) -> HealthStore {
        HealthStore::new(self.health_path())
    }

    pub fn pid_file(&self) -> PidFile {
        PidFile::new(self.pid_path())
    }
}

/// The synchronization orchestrator.
///
/// The transfer engine and the collaborator are built from the
/// resolved configuration, unless given explicitly.
pub struct Orchestrator {
    ctx: Context,
    log: SyncLog,
    source: Arc<dyn EnvSource>,
    engine: Option<Arc<dyn SyncEngine>>,
    watch: Option<Box<dyn Watch>>,
    recheck_interval: Duration,
}

impl Orchestrator {
    pub fn new(ctx: Context, source: impl EnvSource + 'static) -> Self {
        Self {
            ctx,
            log: SyncLog::stdout(),
            source: Arc::new(source),
            engine: None,
            watch: None,
            recheck_interval: RECHECK_INTERVAL,
        }
    }

    pub fn with_log(mut self, log: SyncLog) -> Self {
        self.log = log;
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn SyncEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_watch(mut self, watch: Box<dyn Watch>) -> Self {
        self.watch = Some(watch);
        self
    }

    pub fn with_recheck_interval(mut self, interval: Duration) -> Self {
        self.recheck_interval = interval;
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Runs the orchestrator until the given shutdown future
    /// completes.
    ///
    /// Returns `Ok` on a requested shutdown. Errors are either
    /// startup failures (no writable state directory) or collaborator
    /// failures. The process identity and the health record are
    /// removed in every case once started.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            ctx,
            log,
            source,
            engine,
            watch,
            recheck_interval,
        } = self;

        fs::create_dir_all(&ctx.state_dir)
            .map_err(|err| Error::CreateStateDirError(err, ctx.state_dir.clone()))?;

        let pid_file = ctx.pid_file();
        let health = ctx.health_store();

        match pid_file.write() {
            Ok(pid) => info!(pid, "orchestrator started"),
            Err(err) => {
                warn!("{err}, running without process identity tracking");
                debug!("{err:?}");
            }
        }

        let orchestrate = async {
            let config = resolve::wait_for_config(source.as_ref(), recheck_interval).await;

            let engine: Arc<dyn SyncEngine> = match engine {
                Some(engine) => engine,
                None => Arc::new(ImapsyncEngine::new(&config.engine)),
            };

            let watch = watch.or_else(|| match config.mode {
                SyncMode::Poll => None,
                SyncMode::Idle => Some(Box::new(HelperWatch::idle(&config)) as Box<dyn Watch>),
                SyncMode::Push => Some(Box::new(HelperWatch::push(&config)) as Box<dyn Watch>),
            });

            let strategy = Strategy::select(config.mode, watch).await;
            let invoker = Invoker::new(engine, health.clone(), log);

            Dispatcher::new(&config, invoker).run(strategy).await
        };

        let res = tokio::select! {
            res = orchestrate => match res {
                Ok(never) => match never {},
                Err(err) => Err(Error::from(err)),
            },
            () = shutdown => {
                info!("shutdown requested");
                Ok(())
            }
        };

        cleanup(&pid_file, &health);
        res
    }
}

fn cleanup(pid_file: &PidFile, health: &HealthStore) {
    if let Err(err) = health.remove() {
        warn!("{err}");
        debug!("{err:?}");
    }

    if let Err(err) = pid_file.remove() {
        warn!("{err}");
        debug!("{err:?}");
    }

    info!("orchestrator stopped");
}
