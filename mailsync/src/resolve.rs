//! # Resolver
//!
//! Module dedicated to configuration resolution: alias resolution,
//! validation of the required fields and substitution of defaults.
//!
//! A missing required field is not fatal. [`wait_for_config`] keeps
//! checking the environment at a fixed interval until every required
//! field is available, so an orchestrator restarting the process on
//! failure never enters a crash loop while secrets are being
//! injected.

use std::{
    num::{NonZeroU16, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{
        EndpointConfig, EngineConfig, PushConfig, Secret, SyncConfig, SyncMode,
        DEFAULT_DATE_FILTER_DAYS, DEFAULT_FOLDER, DEFAULT_HEARTBEAT_SECONDS,
        DEFAULT_IDLE_HELPER, DEFAULT_IDLE_REFRESH_SECONDS, DEFAULT_MAX_EMAILS_PER_SYNC,
        DEFAULT_POLL_SECONDS, DEFAULT_SYNC_TIMEOUT_SECONDS, MAX_EMAIL_SIZE_BYTES,
    },
    env::{Env, EnvSource},
};

/// Interval between two checks of an incomplete configuration.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(30);

/// The six fields required before any sync attempt.
pub const REQUIRED_VARS: [&str; 6] = [
    "HOST_1",
    "USER_1",
    "PASSWORD_1",
    "HOST_2",
    "USER_2",
    "PASSWORD_2",
];

/// Alternate names of canonical variables, by order of precedence.
pub const ALIASES: [(&str, [&str; 3]); 6] = [
    ("HOST_1", ["SOURCE_HOST", "IMAP_SOURCE_HOST", "HOST1"]),
    ("USER_1", ["SOURCE_USER", "IMAP_SOURCE_USER", "USER1"]),
    ("PASSWORD_1", ["SOURCE_PASSWORD", "IMAP_SOURCE_PASSWORD", "PASSWORD1"]),
    ("HOST_2", ["DEST_HOST", "IMAP_DEST_HOST", "HOST2"]),
    ("USER_2", ["DEST_USER", "IMAP_DEST_USER", "USER2"]),
    ("PASSWORD_2", ["DEST_PASSWORD", "IMAP_DEST_PASSWORD", "PASSWORD2"]),
];

/// Prefixes used to group variables in diagnostic snapshots.
const DIAGNOSTIC_PREFIXES: [&str; 6] = ["HOST", "USER", "PASSWORD", "SOURCE_", "DEST_", "IMAP_"];

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("missing required configuration: {}", .0.join(", "))]
    MissingFieldsError(Vec<&'static str>),
}

/// Fills unset canonical variables from their aliases. Values are
/// copied as they are.
///
/// Returns the `(canonical, alias)` pairs that were applied.
pub fn apply_aliases(env: &mut Env) -> Vec<(&'static str, &'static str)> {
    let mut applied = Vec::new();

    for (canonical, aliases) in ALIASES {
        if env.is_set(canonical) {
            continue;
        }

        let found = aliases
            .into_iter()
            .find_map(|alias| Some((alias, env.get_verbatim(alias)?.to_owned())));

        if let Some((alias, val)) = found {
            debug!(canonical, alias, "resolve variable from alias");
            env.set(canonical, val);
            applied.push((canonical, alias));
        }
    }

    applied
}

/// Returns the required variables missing from the given snapshot,
/// once aliases are applied.
pub fn missing_fields(env: &Env) -> Vec<&'static str> {
    let mut env = env.clone();
    apply_aliases(&mut env);

    REQUIRED_VARS
        .into_iter()
        .filter(|key| !env.is_set(key))
        .collect()
}

/// Resolves the configuration from the given snapshot.
pub fn resolve(env: &Env) -> Result<SyncConfig> {
    let mut env = env.clone();
    apply_aliases(&mut env);

    let missing: Vec<_> = REQUIRED_VARS
        .into_iter()
        .filter(|key| !env.is_set(key))
        .collect();

    if !missing.is_empty() {
        return Err(Error::MissingFieldsError(missing));
    }

    let endpoint = |n: u8| EndpointConfig {
        host: get_string(&env, &format!("HOST_{n}"), ""),
        port: get_port(&env, &format!("PORT{n}")),
        user: get_string(&env, &format!("USER_{n}"), ""),
        secret: Secret::new(env.get_verbatim(&format!("PASSWORD_{n}")).unwrap_or_default()),
        use_tls: get_bool(&env, &format!("SSL{n}"), true),
        skip_tls: get_bool(&env, &format!("NOTLS{n}"), false),
    };

    let mode = match env.get("SYNC_MODE").map(SyncMode::from_str) {
        None => SyncMode::default(),
        Some(Ok(mode)) => mode,
        Some(Err(err)) => {
            warn!("{err}, falling back to poll mode");
            SyncMode::Poll
        }
    };

    let push = PushConfig::default();
    let push = PushConfig {
        helper: get_string(&env, "PUSH_HELPER", &push.helper),
        project_id: env.get("GOOGLE_CLOUD_PROJECT").map(ToOwned::to_owned),
        topic: get_string(&env, "PUBSUB_TOPIC", &push.topic),
        subscription: get_string(&env, "PUBSUB_SUBSCRIPTION", &push.subscription),
        credentials_path: env
            .get("GOOGLE_CREDENTIALS")
            .map(PathBuf::from)
            .unwrap_or(push.credentials_path),
        token_path: env
            .get("GOOGLE_TOKEN")
            .map(PathBuf::from)
            .unwrap_or(push.token_path),
    };

    let config = SyncConfig {
        source: endpoint(1),
        destination: endpoint(2),
        folder: get_string(&env, "FOLDER", DEFAULT_FOLDER),
        move_mode: get_bool(&env, "MOVE", false),
        date_filter_days: get_positive(&env, "DATE_FILTER_DAYS", DEFAULT_DATE_FILTER_DAYS),
        max_emails_per_sync: get_positive(&env, "MAX_EMAILS_PER_SYNC", DEFAULT_MAX_EMAILS_PER_SYNC),
        max_email_size_bytes: get_positive(&env, "MAX_EMAIL_SIZE", MAX_EMAIL_SIZE_BYTES)
            .min(MAX_EMAIL_SIZE_BYTES),
        mode,
        poll_interval_secs: get_secs(&env, "POLL_SECONDS", DEFAULT_POLL_SECONDS),
        idle_refresh_secs: get_secs(&env, "IDLE_TIMEOUT", DEFAULT_IDLE_REFRESH_SECONDS),
        heartbeat_secs: get_secs(&env, "HEARTBEAT_SECONDS", DEFAULT_HEARTBEAT_SECONDS),
        engine: EngineConfig {
            program: get_string(&env, "SYNC_ENGINE", &EngineConfig::default().program),
            timeout_secs: get_secs(&env, "SYNC_TIMEOUT", DEFAULT_SYNC_TIMEOUT_SECONDS),
        },
        idle_helper: get_string(&env, "IDLE_HELPER", DEFAULT_IDLE_HELPER),
        push,
    };

    Ok(config)
}

/// Resolves the configuration, waiting for it to be complete.
///
/// While required fields are missing, the missing set is logged at
/// every check and a diagnostic snapshot of the environment is
/// dumped once. This function never fails: it returns as soon as a
/// snapshot of the source resolves.
pub async fn wait_for_config(source: &dyn EnvSource, interval: Duration) -> SyncConfig {
    let mut diagnosed = false;

    loop {
        let env = source.snapshot();

        match resolve(&env) {
            Ok(config) => {
                info!(mode = %config.mode, folder = config.folder, "configuration resolved");
                return config;
            }
            Err(Error::MissingFieldsError(missing)) => {
                warn!(
                    missing = missing.join(","),
                    "configuration incomplete, checking again in {}s",
                    interval.as_secs()
                );

                if !diagnosed {
                    dump_diagnostics(&env);
                    diagnosed = true;
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Logs the names of the variables related to endpoints, grouped by
/// prefix. Values of secret-bearing variables are masked.
pub fn dump_diagnostics(env: &Env) {
    for prefix in DIAGNOSTIC_PREFIXES {
        let vars: Vec<String> = env
            .keys()
            .filter(|key| key.starts_with(prefix))
            .map(|key| match env.get(key) {
                None => format!("{key}=<empty>"),
                Some(_) if is_secret_var(key) => format!("{key}=***"),
                Some(val) => format!("{key}={val}"),
            })
            .collect();

        if vars.is_empty() {
            info!(prefix, "no variable set");
        } else {
            info!(prefix, "variables set: {}", vars.join(" "));
        }
    }
}

fn is_secret_var(key: &str) -> bool {
    let key = key.to_uppercase();
    key.contains("PASSWORD") || key.contains("SECRET") || key.contains("TOKEN")
}

fn get_string(env: &Env, key: &str, default: &str) -> String {
    env.get(key).unwrap_or(default).to_owned()
}

/// Parses a boolean variable, accepting `true/false`, `1/0`,
/// `yes/no` and `on/off`.
pub fn get_bool(env: &Env, key: &str, default: bool) -> bool {
    let Some(val) = env.get(key) else {
        return default;
    };

    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => {
            warn!(key, val, default, "invalid boolean, using default");
            default
        }
    }
}

/// Parses a strictly positive integer variable. Zero and invalid
/// values are replaced by the default.
pub fn get_positive<T: FromStr + Copy + std::fmt::Display>(env: &Env, key: &str, default: T) -> T {
    let Some(val) = env.get(key) else {
        return default;
    };

    match val.parse() {
        Ok(n) => n,
        Err(_) => {
            warn!(key, val, %default, "expected a positive integer, using default");
            default
        }
    }
}

fn get_port(env: &Env, key: &str) -> Option<u16> {
    let val = env.get(key)?;

    match val.parse::<NonZeroU16>() {
        Ok(port) => Some(port.get()),
        Err(_) => {
            warn!(key, val, "invalid port, using the protocol default");
            None
        }
    }
}

fn get_secs(env: &Env, key: &str, default: u64) -> u64 {
    let default = NonZeroU64::new(default).unwrap_or(NonZeroU64::MIN);
    get_positive(env, key, default).get()
}
