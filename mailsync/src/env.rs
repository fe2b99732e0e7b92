//! # Environment
//!
//! Module dedicated to configuration sources. The configuration is
//! read from a snapshot of environment variables ([`Env`]), taken
//! from an [`EnvSource`]. The [`ProcessEnv`] source loads the first
//! existing env file of a list of candidates before reading the
//! process environment.

use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, warn};

/// Env files tried in order when `MAILSYNC_ENV_FILES` is not set.
pub const DEFAULT_ENV_FILES: [&str; 3] = [".env.test", ".env", ".env.example"];

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot load env file {1}")]
    LoadEnvFileError(#[source] dotenvy::Error, PathBuf),
}

/// A snapshot of environment variables.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Env(BTreeMap<String, String>);

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of the current process environment.
    ///
    /// Variables that are not valid unicode are skipped.
    pub fn from_process() -> Self {
        Self(
            env::vars_os()
                .filter_map(|(key, val)| Some((key.into_string().ok()?, val.into_string().ok()?)))
                .collect(),
        )
    }

    pub fn with(mut self, key: impl ToString, val: impl ToString) -> Self {
        self.set(key, val);
        self
    }

    pub fn set(&mut self, key: impl ToString, val: impl ToString) {
        self.0.insert(key.to_string(), val.to_string());
    }

    /// Returns the trimmed value of the given variable, or `None` if
    /// the variable is unset or blank.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|val| val.trim())
            .filter(|val| !val.is_empty())
    }

    /// Returns the value of the given variable as it is, or `None` if
    /// the variable is unset or blank.
    ///
    /// Used for secrets, where surrounding whitespace is meaningful.
    pub fn get_verbatim(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|val| !val.trim().is_empty())
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

impl<K: ToString, V: ToString> FromIterator<(K, V)> for Env {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(key, val)| (key.to_string(), val.to_string()))
                .collect(),
        )
    }
}

/// A source of environment snapshots.
///
/// The resolver takes a fresh snapshot at every check, so a source
/// can expose variables that appear after the process started.
pub trait EnvSource: Send + Sync {
    fn snapshot(&self) -> Env;
}

impl EnvSource for Env {
    fn snapshot(&self) -> Env {
        self.clone()
    }
}

/// The process environment, completed by an env file.
#[derive(Clone, Debug, Default)]
pub struct ProcessEnv {
    env_files: Vec<PathBuf>,
}

impl ProcessEnv {
    pub fn new(env_files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            env_files: env_files.into_iter().map(Into::into).collect(),
        }
    }

    /// Builds the source from `MAILSYNC_ENV_FILES` (colon-separated
    /// paths), or from [`DEFAULT_ENV_FILES`].
    pub fn from_process() -> Self {
        match env::var_os("MAILSYNC_ENV_FILES") {
            Some(paths) => Self::new(env::split_paths(&paths)),
            None => Self::new(DEFAULT_ENV_FILES),
        }
    }

    pub fn env_files(&self) -> &[PathBuf] {
        &self.env_files
    }

    /// Loads the first existing env file of the source, see
    /// [`load_env_file`].
    pub fn load(&self) -> Result<Option<PathBuf>> {
        load_env_file(&self.env_files)
    }
}

impl EnvSource for ProcessEnv {
    fn snapshot(&self) -> Env {
        trace_env_file(&self.load());
        Env::from_process()
    }
}

/// Loads the first existing env file among the given candidates.
///
/// Variables already present in the process environment are never
/// overwritten. Returns the path of the loaded file, or `None` if no
/// candidate exists.
pub fn load_env_file(candidates: &[impl AsRef<Path>]) -> Result<Option<PathBuf>> {
    let Some(path) = candidates
        .iter()
        .map(AsRef::as_ref)
        .find(|path| path.is_file())
    else {
        return Ok(None);
    };

    dotenvy::from_path(path).map_err(|err| Error::LoadEnvFileError(err, path.to_owned()))?;

    Ok(Some(path.to_owned()))
}

/// Logs the outcome of an env file load.
///
/// A file that cannot be loaded is not fatal: the process
/// environment is used as it is.
pub fn trace_env_file(res: &Result<Option<PathBuf>>) {
    match res {
        Ok(Some(path)) => debug!(?path, "env file loaded"),
        Ok(None) => debug!("no env file found"),
        Err(err) => {
            warn!("{err}, using the process environment only");
            debug!("{err:?}");
        }
    }
}
