use std::{
    env, fs,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use mailsync::{
    config::SyncMode,
    env::{load_env_file, Env, EnvSource, Error as EnvError},
    resolve::{self, RECHECK_INTERVAL},
};
use tempfile::tempdir;
use tokio::time::Instant;

/// Serves the given snapshots in order, then repeats the last one.
struct ScriptedSource {
    snapshots: Mutex<Vec<Env>>,
    checks: AtomicUsize,
}

impl ScriptedSource {
    fn new(mut snapshots: Vec<Env>) -> Self {
        snapshots.reverse();
        Self {
            snapshots: Mutex::new(snapshots),
            checks: AtomicUsize::new(0),
        }
    }
}

impl EnvSource for ScriptedSource {
    fn snapshot(&self) -> Env {
        self.checks.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.lock().unwrap();
        if snapshots.len() > 1 {
            snapshots.pop().unwrap()
        } else {
            snapshots.last().cloned().unwrap_or_default()
        }
    }
}

fn partial_env() -> Env {
    Env::new()
        .with("HOST_1", "imap.source.test")
        .with("USER_1", "alice")
        .with("PASSWORD_1", "secret1")
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_wait_for_config() {
    let complete = partial_env()
        .with("DEST_HOST", "imap.dest.test")
        .with("DEST_USER", "bob")
        .with("DEST_PASSWORD", "secret2")
        .with("SYNC_MODE", "idle");

    let source = ScriptedSource::new(vec![Env::new(), partial_env(), complete]);

    let start = Instant::now();
    let config = resolve::wait_for_config(&source, RECHECK_INTERVAL).await;

    assert_eq!(source.checks.load(Ordering::SeqCst), 3);
    assert_eq!(start.elapsed(), Duration::from_secs(60));
    assert_eq!(config.destination.host, "imap.dest.test");
    assert_eq!(config.destination.secret.expose(), "secret2");
    assert_eq!(config.mode, SyncMode::Idle);
}

#[test_log::test]
fn test_resolve_missing_fields() {
    let err = resolve::resolve(&partial_env().with("HOST_2", "imap.dest.test")).unwrap_err();
    assert_eq!(
        err.to_string(),
        "missing required configuration: USER_2, PASSWORD_2"
    );
}

#[test_log::test]
fn test_env_file_errors_are_returned() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("missing.env");
    assert!(load_env_file(&[missing]).unwrap().is_none());

    let path = dir.path().join(".env");
    fs::write(&path, "=missing key\n").unwrap();

    match load_env_file(&[path.clone()]).unwrap_err() {
        EnvError::LoadEnvFileError(_, failed) => assert_eq!(failed, path),
    }
}

#[test_log::test]
fn test_env_file_never_overrides() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(".env");
    fs::write(
        &path,
        "MAILSYNC_TEST_ENV_FILE_SET=from-file\nMAILSYNC_TEST_ENV_FILE_NEW=from-file\n",
    )
    .unwrap();

    env::set_var("MAILSYNC_TEST_ENV_FILE_SET", "from-process");

    let missing = dir.path().join("missing.env");
    let loaded = load_env_file(&[missing, path.clone()]).unwrap();
    assert_eq!(loaded, Some(path));

    let env = Env::from_process();
    assert_eq!(env.get("MAILSYNC_TEST_ENV_FILE_SET"), Some("from-process"));
    assert_eq!(env.get("MAILSYNC_TEST_ENV_FILE_NEW"), Some("from-file"));
}
