use std::{
    io,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use mailsync::{
    config::{EndpointConfig, SyncConfig, SyncMode},
    engine::{self, EngineExit, EngineOutcome, Invoker, SyncEngine},
    health::{HealthStatus, HealthStore},
    log::SyncLog,
    mode::{self, Dispatcher, Strategy},
    params::ParameterSet,
    watch::{self, Watch, WatchEvent},
};
use tempfile::tempdir;
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    time::{sleep, timeout, Instant},
};
use tracing_subscriber::fmt::MakeWriter;

#[derive(Default)]
struct FakeEngine {
    delay: Duration,
    fail: bool,
    runs: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeEngine {
    fn new(delay: Duration, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            delay,
            fail,
            ..Default::default()
        })
    }

    fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SyncEngine for FakeEngine {
    async fn run(&self, _params: &ParameterSet) -> engine::Result<EngineOutcome> {
        let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(n, Ordering::SeqCst);

        sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.runs.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            Ok(EngineOutcome::new(EngineExit::Failure(Some(1)), "NO LOGIN failed\n"))
        } else {
            Ok(EngineOutcome::new(EngineExit::Success, "Messages transferred : 2\n"))
        }
    }
}

struct FakeWatch {
    available: bool,
    events: UnboundedReceiver<WatchEvent>,
    starts: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl FakeWatch {
    fn new(available: bool) -> (Self, UnboundedSender<WatchEvent>) {
        let (tx, events) = unbounded_channel();
        let watch = Self {
            available,
            events,
            starts: Arc::default(),
            stops: Arc::default(),
        };
        (watch, tx)
    }
}

#[async_trait]
impl Watch for FakeWatch {
    fn name(&self) -> &str {
        "fake"
    }

    async fn is_available(&self) -> bool {
        self.available
    }

    async fn start(&mut self) -> watch::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_event(&mut self) -> WatchEvent {
        match self.events.recv().await {
            Some(event) => event,
            None => WatchEvent::Fatal(String::from("session closed")),
        }
    }

    async fn stop(&mut self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Log events written by a scoped subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn config(mode: SyncMode) -> SyncConfig {
    let mut config = SyncConfig::new(
        EndpointConfig::new("imap.source.test", "alice", "secret1"),
        EndpointConfig::new("imap.dest.test", "bob", "secret2"),
    );
    config.mode = mode;
    config
}

#[test_log::test(tokio::test)]
async fn test_select_falls_back_to_poll() {
    let (watch, _tx) = FakeWatch::new(false);
    let strategy = Strategy::select(SyncMode::Idle, Some(Box::new(watch))).await;
    assert_eq!(strategy.mode(), SyncMode::Poll);

    let strategy = Strategy::select(SyncMode::Push, None).await;
    assert_eq!(strategy.mode(), SyncMode::Poll);

    let (watch, _tx) = FakeWatch::new(true);
    let strategy = Strategy::select(SyncMode::Push, Some(Box::new(watch))).await;
    assert_eq!(strategy.mode(), SyncMode::Push);

    let (watch, _tx) = FakeWatch::new(true);
    let strategy = Strategy::select(SyncMode::Poll, Some(Box::new(watch))).await;
    assert_eq!(strategy.mode(), SyncMode::Poll);
}

#[tokio::test(start_paused = true)]
async fn test_fallback_is_logged_once() {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let dir = tempdir().unwrap();
    let health = HealthStore::new(dir.path().join("health"));
    let engine = FakeEngine::new(Duration::ZERO, false);

    let (watch, _tx) = FakeWatch::new(false);
    let strategy = Strategy::select(SyncMode::Idle, Some(Box::new(watch))).await;
    assert_eq!(strategy.mode(), SyncMode::Poll);

    let invoker = Invoker::new(engine.clone(), health, SyncLog::stdout());
    let dispatcher = Dispatcher::new(&config(SyncMode::Idle), invoker);
    let res = timeout(Duration::from_secs(40), dispatcher.run(strategy)).await;
    assert!(res.is_err());
    assert_eq!(engine.runs(), 3);

    let logs = logs.contents();
    assert_eq!(logs.matches("falling back to poll mode").count(), 1, "{logs}");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_concurrent_attempts_are_serialized() {
    let dir = tempdir().unwrap();
    let health = HealthStore::new(dir.path().join("health"));
    let engine = FakeEngine::new(Duration::from_secs(10), false);

    let invoker = Invoker::new(engine.clone(), health, SyncLog::stdout());
    let params = ParameterSet::build(&config(SyncMode::Poll));

    let start = Instant::now();
    let (first, second) = tokio::join!(invoker.invoke(&params), invoker.invoke(&params));

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(engine.runs(), 2);
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(start.elapsed() >= Duration::from_secs(20));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_poll_attempts_never_overlap() {
    let dir = tempdir().unwrap();
    let health = HealthStore::new(dir.path().join("health"));
    let engine = FakeEngine::new(Duration::from_secs(20), false);

    let mut config = config(SyncMode::Poll);
    config.poll_interval_secs = 1;

    let invoker = Invoker::new(engine.clone(), health.clone(), SyncLog::stdout());
    let dispatcher = Dispatcher::new(&config, invoker);

    let res = timeout(Duration::from_secs(120), dispatcher.run(Strategy::Poll)).await;
    assert!(res.is_err(), "poll loop should never return");

    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1);
    assert!(engine.runs() >= 5, "runs: {}", engine.runs());
    assert_eq!(health.read().unwrap().unwrap().status, HealthStatus::Healthy);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_poll_retries_after_failures() {
    let dir = tempdir().unwrap();
    let health = HealthStore::new(dir.path().join("health"));
    let engine = FakeEngine::new(Duration::ZERO, true);

    let mut config = config(SyncMode::Poll);
    config.poll_interval_secs = 15;

    let invoker = Invoker::new(engine.clone(), health.clone(), SyncLog::stdout());
    let dispatcher = Dispatcher::new(&config, invoker);

    let res = timeout(Duration::from_secs(50), dispatcher.run(Strategy::Poll)).await;
    assert!(res.is_err());

    // attempts at 0s, 15s, 30s and 45s
    assert_eq!(engine.runs(), 4);
    assert_eq!(health.read().unwrap().unwrap().status, HealthStatus::Unhealthy);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_idle_changes_trigger_attempts() {
    let dir = tempdir().unwrap();
    let health = HealthStore::new(dir.path().join("health"));
    let engine = FakeEngine::new(Duration::from_secs(1), false);

    let (watch, tx) = FakeWatch::new(true);
    let starts = watch.starts.clone();
    let stops = watch.stops.clone();

    let invoker = Invoker::new(engine.clone(), health.clone(), SyncLog::stdout());
    let dispatcher = Dispatcher::new(&config(SyncMode::Idle), invoker);
    let strategy = Strategy::select(SyncMode::Idle, Some(Box::new(watch))).await;

    tx.send(WatchEvent::Changed).unwrap();
    tx.send(WatchEvent::Alive).unwrap();
    tx.send(WatchEvent::Changed).unwrap();
    tx.send(WatchEvent::Fatal(String::from("authentication expired"))).unwrap();

    let err = dispatcher.run(strategy).await.unwrap_err();

    match err {
        mode::Error::CollaboratorFailedError(name, reason) => {
            assert_eq!(name, "fake");
            assert_eq!(reason, "authentication expired");
        }
        err => panic!("unexpected error: {err:?}"),
    }

    // one initial attempt, then one per change
    assert_eq!(engine.runs(), 3);
    assert_eq!(engine.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(starts.load(Ordering::SeqCst), 1);
    assert_eq!(stops.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_idle_session_refresh() {
    let dir = tempdir().unwrap();
    let health = HealthStore::new(dir.path().join("health"));
    let engine = FakeEngine::new(Duration::ZERO, false);

    let (watch, _tx) = FakeWatch::new(true);
    let starts = watch.starts.clone();
    let stops = watch.stops.clone();

    let mut config = config(SyncMode::Idle);
    config.idle_refresh_secs = 10;

    let invoker = Invoker::new(engine.clone(), health, SyncLog::stdout());
    let dispatcher = Dispatcher::new(&config, invoker);
    let strategy = Strategy::select(SyncMode::Idle, Some(Box::new(watch))).await;

    let res = timeout(Duration::from_secs(35), dispatcher.run(strategy)).await;
    assert!(res.is_err());

    // refreshes at 10s, 20s and 30s, each followed by an attempt
    assert_eq!(starts.load(Ordering::SeqCst), 4);
    assert_eq!(stops.load(Ordering::SeqCst), 3);
    assert_eq!(engine.runs(), 4);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn test_push_closed_session_is_fatal() {
    let dir = tempdir().unwrap();
    let health = HealthStore::new(dir.path().join("health"));
    let engine = FakeEngine::new(Duration::ZERO, false);

    let (watch, tx) = FakeWatch::new(true);
    drop(tx);

    let invoker = Invoker::new(engine.clone(), health, SyncLog::stdout());
    let dispatcher = Dispatcher::new(&config(SyncMode::Push), invoker);
    let strategy = Strategy::select(SyncMode::Push, Some(Box::new(watch))).await;

    let err = dispatcher.run(strategy).await.unwrap_err();
    assert!(matches!(err, mode::Error::CollaboratorFailedError(..)));
    assert_eq!(engine.runs(), 1);
}
