//! # Log
//!
//! Module dedicated to the durable log. Every line is formatted as
//! `[timestamp] [LEVEL] message`, and each sync attempt appends one
//! block of engine output delimited by `=== Sync Details <ts> ===`
//! and `=== End Sync Details ===` (or their `Error` variants).
//!
//! When the log file cannot be opened, the log degrades to the
//! standard output instead of aborting.

use std::{
    fmt, fs,
    fs::{File, OpenOptions},
    io::{self, Write as _},
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Local;
use tracing::{warn, Event, Subscriber};
use tracing_subscriber::{
    fmt::{
        format::{self, FormatEvent, FormatFields},
        FmtContext,
    },
    layer::SubscriberExt as _,
    registry::LookupSpan,
    util::SubscriberInitExt as _,
    EnvFilter,
};

use crate::report::SyncAttempt;

/// Number of trailing engine output lines kept when an attempt fails.
pub const ERROR_TAIL_LINES: usize = 20;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Formats events as `[timestamp] [LEVEL] message key=value…`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = Local::now().format(TIMESTAMP_FORMAT);
        write!(writer, "[{now}] [{}] ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// The durable, append-only log file.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncLog {
    path: Option<PathBuf>,
}

impl SyncLog {
    /// Opens the log at the given path, creating its parent
    /// directory.
    ///
    /// The returned error describes why the log degraded to the
    /// standard output, if it did.
    pub fn open(path: impl Into<PathBuf>) -> (Self, Option<io::Error>) {
        let path = path.into();

        match open_append(&path) {
            Ok(_) => (Self { path: Some(path) }, None),
            Err(err) => (Self::stdout(), Some(err)),
        }
    }

    /// A log that only writes to the standard output.
    pub fn stdout() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_degraded(&self) -> bool {
        self.path.is_none()
    }

    /// Appends the output of a successful attempt.
    pub fn append_details(&self, attempt: &SyncAttempt, output: &str) {
        let ts = attempt.ended_at.with_timezone(&Local).format(TIMESTAMP_FORMAT);
        let mut block = format!("=== Sync Details {ts} ===\n");
        block.push_str(output);
        if !output.is_empty() && !output.ends_with('\n') {
            block.push('\n');
        }
        block.push_str("=== End Sync Details ===\n");
        self.append(&block);
    }

    /// Appends the trailing output lines of a failed attempt.
    pub fn append_error_details(&self, attempt: &SyncAttempt, tail: &[String]) {
        let ts = attempt.ended_at.with_timezone(&Local).format(TIMESTAMP_FORMAT);
        let mut block = format!("=== Sync Error Details {ts} ===\n");
        block.push_str(&format!(
            "status: {}, duration: {}s\n",
            attempt.status,
            attempt.duration().as_secs()
        ));
        for line in tail {
            block.push_str(line);
            block.push('\n');
        }
        block.push_str("=== End Sync Error Details ===\n");
        self.append(&block);
    }

    // One write per block, so readers never see blocks interleaved.
    fn append(&self, block: &str) {
        let Some(path) = &self.path else {
            print!("{block}");
            return;
        };

        let res = open_append(path).and_then(|mut file| file.write_all(block.as_bytes()));

        if let Err(err) = res {
            warn!(?path, "cannot append to log file: {err}");
            print!("{block}");
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }

    OpenOptions::new().create(true).append(true).open(path)
}

/// Installs the global tracing subscriber.
///
/// Events go to the standard output and, unless degraded, to the
/// durable log file. The level is read from `RUST_LOG` and defaults
/// to `info`.
pub fn init(log: &SyncLog) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let stdout = tracing_subscriber::fmt::layer()
        .event_format(LineFormat)
        .with_ansi(false)
        .with_writer(io::stdout);

    let file = log
        .path()
        .and_then(|path| open_append(path).ok())
        .map(|file| {
            tracing_subscriber::fmt::layer()
                .event_format(LineFormat)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
        });

    let res = tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init();

    if let Err(err) = res {
        eprintln!("cannot install tracing subscriber: {err}");
    }
}
