//! # Parameters
//!
//! Module dedicated to the construction of the transfer engine
//! parameters. [`ParameterSet::build`] is a pure function of the
//! [`SyncConfig`]: the same configuration always gives the same
//! parameters, and the age, count and size bounds are always part of
//! them.

use std::fmt;

use crate::config::{EndpointConfig, Secret, SyncConfig};

pub const HOST1: &str = "--host1";
pub const PORT1: &str = "--port1";
pub const USER1: &str = "--user1";
pub const PASSWORD1: &str = "--password1";
pub const SSL1: &str = "--ssl1";
pub const NOTLS1: &str = "--notls1";
pub const HOST2: &str = "--host2";
pub const PORT2: &str = "--port2";
pub const USER2: &str = "--user2";
pub const PASSWORD2: &str = "--password2";
pub const SSL2: &str = "--ssl2";
pub const NOTLS2: &str = "--notls2";
pub const FOLDER: &str = "--folder";
pub const MAX_AGE: &str = "--maxage";
pub const MAX_MESSAGES: &str = "--maxmessagespersync";
pub const MAX_SIZE: &str = "--maxsize";
pub const DELETE_SOURCE: &str = "--delete1";
pub const SLEEP: &str = "--sleep";

/// Flags making re-runs idempotent and cheap: messages are matched by
/// UID, folders are mapped automatically, duplicates across folders
/// are skipped and internal dates are preserved.
pub const IDEMPOTENCE_FLAGS: [&str; 6] = [
    "--useuid",
    "--automap",
    "--skipcrossduplicates",
    "--syncinternaldates",
    "--fastio1",
    "--fastio2",
];

/// Delay between two operations, in seconds, to spread the load on
/// the destination server.
pub const INTER_OPERATION_DELAY_SECS: u32 = 1;

/// A single engine parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Param {
    /// A flag without value.
    Flag(&'static str),

    /// A flag followed by a value.
    Value(&'static str, String),

    /// A flag followed by a secret value.
    Secret(&'static str, Secret),
}

impl Param {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Flag(name) | Self::Value(name, _) | Self::Secret(name, _) => *name,
        }
    }
}

/// The ordered list of parameters given to the transfer engine.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ParameterSet(Vec<Param>);

impl ParameterSet {
    /// Builds the parameters for one bounded synchronization run.
    pub fn build(config: &SyncConfig) -> Self {
        let mut params = Self::default();

        params.push_endpoint(&config.source, [HOST1, PORT1, USER1, PASSWORD1, SSL1, NOTLS1]);
        params.push_endpoint(&config.destination, [HOST2, PORT2, USER2, PASSWORD2, SSL2, NOTLS2]);
        params.push(Param::Value(FOLDER, config.folder.clone()));

        params.push(Param::Value(MAX_AGE, config.date_filter_days.to_string()));
        params.push(Param::Value(MAX_MESSAGES, config.max_emails_per_sync.to_string()));
        params.push(Param::Value(MAX_SIZE, config.max_email_size_bytes.to_string()));

        for flag in IDEMPOTENCE_FLAGS {
            params.push(Param::Flag(flag));
        }

        params.push(Param::Value(SLEEP, INTER_OPERATION_DELAY_SECS.to_string()));

        if config.move_mode {
            params.push(Param::Flag(DELETE_SOURCE));
        }

        params
    }

    fn push_endpoint(&mut self, endpoint: &EndpointConfig, names: [&'static str; 6]) {
        let [host, port, user, password, ssl, notls] = names;

        self.push(Param::Value(host, endpoint.host.clone()));

        if let Some(n) = endpoint.port {
            self.push(Param::Value(port, n.to_string()));
        }

        self.push(Param::Value(user, endpoint.user.clone()));
        self.push(Param::Secret(password, endpoint.secret.clone()));

        if endpoint.use_tls {
            self.push(Param::Flag(ssl));
        }

        if endpoint.skip_tls {
            self.push(Param::Flag(notls));
        }
    }

    fn push(&mut self, param: Param) {
        self.0.push(param);
    }

    pub fn params(&self) -> &[Param] {
        &self.0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|param| param.name() == name)
    }

    /// Returns the value following the given flag, secrets included.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.0.iter().find_map(|param| match param {
            Param::Value(n, val) if *n == name => Some(val.as_str()),
            Param::Secret(n, secret) if *n == name => Some(secret.expose()),
            _ => None,
        })
    }

    /// Flattens the parameters into discrete argument tokens, secrets
    /// included.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.0.len() * 2);

        for param in &self.0 {
            match param {
                Param::Flag(name) => args.push(name.to_string()),
                Param::Value(name, val) => {
                    args.push(name.to_string());
                    args.push(val.clone());
                }
                Param::Secret(name, secret) => {
                    args.push(name.to_string());
                    args.push(secret.expose().to_owned());
                }
            }
        }

        args
    }
}

/// Renders the parameters with secrets masked.
impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut glue = "";

        for param in &self.0 {
            match param {
                Param::Flag(name) => write!(f, "{glue}{name}")?,
                Param::Value(name, val) => write!(f, "{glue}{name} {val}")?,
                Param::Secret(name, secret) => write!(f, "{glue}{name} {secret}")?,
            }
            glue = " ";
        }

        Ok(())
    }
}
