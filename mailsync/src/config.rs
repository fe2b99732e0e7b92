//! # Configuration
//!
//! Module dedicated to the synchronization configuration. The
//! [`SyncConfig`] is built once by the [resolver](crate::resolve),
//! then shared read-only for the whole process lifetime.

use std::{
    fmt,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use thiserror::Error;

pub const DEFAULT_FOLDER: &str = "INBOX";
pub const DEFAULT_DATE_FILTER_DAYS: NonZeroU32 = match NonZeroU32::new(30) {
    Some(n) => n,
    None => unreachable!(),
};
pub const DEFAULT_MAX_EMAILS_PER_SYNC: NonZeroU32 = match NonZeroU32::new(1000) {
    Some(n) => n,
    None => unreachable!(),
};
/// The per-message size bound, in bytes (50 MB).
pub const MAX_EMAIL_SIZE_BYTES: NonZeroU64 = match NonZeroU64::new(50_000_000) {
    Some(n) => n,
    None => unreachable!(),
};
pub const IMAP_PORT: u16 = 143;
pub const IMAPS_PORT: u16 = 993;
pub const DEFAULT_POLL_SECONDS: u64 = 15;
/// Servers like Gmail drop idle sessions after 30 minutes.
pub const DEFAULT_IDLE_REFRESH_SECONDS: u64 = 1740;
pub const DEFAULT_HEARTBEAT_SECONDS: u64 = 60;
pub const DEFAULT_SYNC_TIMEOUT_SECONDS: u64 = 300;
pub const DEFAULT_ENGINE: &str = "imapsync";
pub const DEFAULT_IDLE_HELPER: &str = "imap-idle-watch";
pub const DEFAULT_PUSH_HELPER: &str = "gmail-push-watch";
pub const DEFAULT_PUBSUB_TOPIC: &str = "gmail-sync-topic";
pub const DEFAULT_PUBSUB_SUBSCRIPTION: &str = "gmail-sync-subscription";
pub const DEFAULT_GOOGLE_CREDENTIALS: &str = "/app/credentials.json";
pub const DEFAULT_GOOGLE_TOKEN: &str = "/app/token.json";

/// Errors related to the configuration.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid sync mode {0}: expected poll, idle or push")]
    ParseSyncModeError(String),
}

/// A secret value, like a password.
///
/// The value is never rendered by [`fmt::Debug`] nor
/// [`fmt::Display`], so it cannot leak into logs by accident.
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Secret(String);

impl Secret {
    pub fn new(secret: impl ToString) -> Self {
        Self(secret.to_string())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "***")
    }
}

/// One side of the synchronization pair.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EndpointConfig {
    /// The IMAP server host name.
    pub host: String,

    /// The IMAP server port, when not the default one.
    pub port: Option<u16>,

    /// The IMAP login.
    pub user: String,

    /// The IMAP password.
    pub secret: Secret,

    /// Connect using SSL/TLS.
    pub use_tls: bool,

    /// Never upgrade the connection with STARTTLS.
    pub skip_tls: bool,
}

impl EndpointConfig {
    pub fn new(host: impl ToString, user: impl ToString, secret: impl ToString) -> Self {
        Self {
            host: host.to_string(),
            port: None,
            user: user.to_string(),
            secret: Secret::new(secret),
            use_tls: true,
            skip_tls: false,
        }
    }

    /// Returns the configured port, or 993 with SSL/TLS and 143
    /// without.
    pub fn port(&self) -> u16 {
        match self.port {
            Some(port) => port,
            None if self.use_tls => IMAPS_PORT,
            None => IMAP_PORT,
        }
    }
}

/// The operating strategy of the orchestrator.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SyncMode {
    /// Synchronize at a fixed interval.
    #[default]
    Poll,

    /// Synchronize whenever the long-wait notification helper
    /// detects a change.
    Idle,

    /// Synchronize whenever the push-subscription helper receives a
    /// notification.
    Push,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => write!(f, "poll"),
            Self::Idle => write!(f, "idle"),
            Self::Push => write!(f, "push"),
        }
    }
}

impl FromStr for SyncMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self, Self::Err> {
        match mode.trim().to_lowercase().as_str() {
            "poll" | "polling" => Ok(Self::Poll),
            "idle" => Ok(Self::Idle),
            "push" => Ok(Self::Push),
            _ => Err(Error::ParseSyncModeError(mode.to_owned())),
        }
    }
}

/// The transfer engine configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EngineConfig {
    /// The engine program, resolved from `PATH` when not a path.
    pub program: String,

    /// Attempts running longer than this are killed.
    pub timeout_secs: u64,
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: DEFAULT_ENGINE.to_owned(),
            timeout_secs: DEFAULT_SYNC_TIMEOUT_SECONDS,
        }
    }
}

/// The push-subscription helper configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PushConfig {
    pub helper: String,
    pub project_id: Option<String>,
    pub topic: String,
    pub subscription: String,
    pub credentials_path: PathBuf,
    pub token_path: PathBuf,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            helper: DEFAULT_PUSH_HELPER.to_owned(),
            project_id: None,
            topic: DEFAULT_PUBSUB_TOPIC.to_owned(),
            subscription: DEFAULT_PUBSUB_SUBSCRIPTION.to_owned(),
            credentials_path: PathBuf::from(DEFAULT_GOOGLE_CREDENTIALS),
            token_path: PathBuf::from(DEFAULT_GOOGLE_TOKEN),
        }
    }
}

/// The resolved synchronization configuration.
///
/// Safety bounds are non-zero by construction: a configuration
/// without age, count or size bounds cannot be represented.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SyncConfig {
    pub source: EndpointConfig,
    pub destination: EndpointConfig,
    pub folder: String,

    /// Delete messages from the source once transferred.
    pub move_mode: bool,

    pub date_filter_days: NonZeroU32,
    pub max_emails_per_sync: NonZeroU32,
    pub max_email_size_bytes: NonZeroU64,
    pub mode: SyncMode,
    pub poll_interval_secs: u64,
    pub idle_refresh_secs: u64,
    pub heartbeat_secs: u64,
    pub engine: EngineConfig,
    pub idle_helper: String,
    pub push: PushConfig,
}

impl SyncConfig {
    /// Builds a configuration for the given endpoints, with defaults
    /// for every optional field.
    pub fn new(source: EndpointConfig, destination: EndpointConfig) -> Self {
        Self {
            source,
            destination,
            folder: DEFAULT_FOLDER.to_owned(),
            move_mode: false,
            date_filter_days: DEFAULT_DATE_FILTER_DAYS,
            max_emails_per_sync: DEFAULT_MAX_EMAILS_PER_SYNC,
            max_email_size_bytes: MAX_EMAIL_SIZE_BYTES,
            mode: SyncMode::default(),
            poll_interval_secs: DEFAULT_POLL_SECONDS,
            idle_refresh_secs: DEFAULT_IDLE_REFRESH_SECONDS,
            heartbeat_secs: DEFAULT_HEARTBEAT_SECONDS,
            engine: EngineConfig::default(),
            idle_helper: DEFAULT_IDLE_HELPER.to_owned(),
            push: PushConfig::default(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn idle_refresh(&self) -> Duration {
        Duration::from_secs(self.idle_refresh_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::{EndpointConfig, Secret, SyncMode};

    #[test]
    fn secret_is_masked() {
        let endpoint = EndpointConfig::new("imap.example.com", "alice", "hunter2");
        assert!(!format!("{endpoint:?}").contains("hunter2"));
        assert_eq!(Secret::new("hunter2").to_string(), "***");
        assert_eq!(endpoint.secret.expose(), "hunter2");
    }

    #[test]
    fn default_port_follows_tls() {
        let mut endpoint = EndpointConfig::new("imap.example.com", "alice", "hunter2");
        assert_eq!(endpoint.port(), 993);

        endpoint.use_tls = false;
        assert_eq!(endpoint.port(), 143);

        endpoint.port = Some(1143);
        assert_eq!(endpoint.port(), 1143);
    }

    #[test]
    fn parse_sync_mode() {
        assert_eq!("poll".parse::<SyncMode>().unwrap(), SyncMode::Poll);
        assert_eq!(" IDLE ".parse::<SyncMode>().unwrap(), SyncMode::Idle);
        assert_eq!("Push".parse::<SyncMode>().unwrap(), SyncMode::Push);
        assert!("webhook".parse::<SyncMode>().is_err());
    }
}
