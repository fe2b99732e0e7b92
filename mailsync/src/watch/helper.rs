use async_trait::async_trait;
use process::{find_program, Command, LineStream};
use tracing::{debug, info, warn};

use super::{Error, Result, Watch, WatchEvent};
use crate::config::{EndpointConfig, SyncConfig};

/// Parses a line printed by a helper program.
///
/// Helpers print `sync` or `change` when a change is detected,
/// `ready` or `keepalive` to signal they are alive, and `fatal
/// <reason>` before giving up. Other lines are ignored.
pub fn parse_line(line: &str) -> Option<WatchEvent> {
    let line = line.trim();
    let (keyword, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));

    match keyword.to_lowercase().as_str() {
        "sync" | "change" | "changed" => Some(WatchEvent::Changed),
        "ready" | "keepalive" => Some(WatchEvent::Alive),
        "fatal" if rest.trim().is_empty() => Some(WatchEvent::Fatal(String::from("unknown reason"))),
        "fatal" => Some(WatchEvent::Fatal(rest.trim().to_owned())),
        _ => None,
    }
}

/// A collaborator implemented by a helper program.
///
/// The helper gets its configuration from environment variables and
/// reports events on its standard output, one per line (see
/// [`parse_line`]). A helper closing its output is fatal.
pub struct HelperWatch {
    name: String,
    command: Command,
    unmet_requirement: Option<String>,
    stream: Option<LineStream>,
}

impl HelperWatch {
    pub fn new(name: impl ToString, command: Command) -> Self {
        Self {
            name: name.to_string(),
            command,
            unmet_requirement: None,
            stream: None,
        }
    }

    /// Makes the helper unavailable for the given reason.
    pub fn with_unmet_requirement(mut self, reason: impl ToString) -> Self {
        self.unmet_requirement = Some(reason.to_string());
        self
    }

    /// Builds the long-wait notification helper, watching the source
    /// folder and refreshing its session every
    /// [`SyncConfig::idle_refresh_secs`].
    pub fn idle(config: &SyncConfig) -> Self {
        let command = with_endpoint_envs(Command::new(&config.idle_helper), &config.source, 1)
            .env("FOLDER", &config.folder)
            .env("IDLE_TIMEOUT", config.idle_refresh_secs);

        Self::new("idle", command)
    }

    /// Builds the push-subscription helper.
    pub fn push(config: &SyncConfig) -> Self {
        let push = &config.push;

        let command = with_endpoint_envs(Command::new(&push.helper), &config.source, 1)
            .env("FOLDER", &config.folder)
            .env("PUBSUB_TOPIC", &push.topic)
            .env("PUBSUB_SUBSCRIPTION", &push.subscription)
            .env("GOOGLE_CREDENTIALS", push.credentials_path.display())
            .env("GOOGLE_TOKEN", push.token_path.display());

        match &push.project_id {
            Some(project_id) => {
                Self::new("push", command.env("GOOGLE_CLOUD_PROJECT", project_id))
            }
            None => Self::new("push", command)
                .with_unmet_requirement("GOOGLE_CLOUD_PROJECT is not set"),
        }
    }
}

fn with_endpoint_envs(command: Command, endpoint: &EndpointConfig, n: u8) -> Command {
    command
        .env(format!("HOST_{n}"), &endpoint.host)
        .env(format!("USER_{n}"), &endpoint.user)
        .env(format!("PASSWORD_{n}"), endpoint.secret.expose())
        .env(format!("SSL{n}"), endpoint.use_tls)
        .env(format!("NOTLS{n}"), endpoint.skip_tls)
}

#[async_trait]
impl Watch for HelperWatch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> bool {
        if let Some(reason) = &self.unmet_requirement {
            debug!(name = self.name, reason, "helper requirement not met");
            return false;
        }

        find_program(self.command.program()).is_some()
    }

    async fn start(&mut self) -> Result<()> {
        self.stop().await;

        let stream = self
            .command
            .spawn_lines()
            .map_err(|err| Error::StartHelperError(err, self.name.clone()))?;

        info!(name = self.name, program = stream.program(), "helper started");
        self.stream = Some(stream);
        Ok(())
    }

    async fn next_event(&mut self) -> WatchEvent {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return WatchEvent::Fatal(format!("{} helper is not running", self.name));
            };

            match stream.next_line().await {
                Ok(Some(line)) => match parse_line(&line) {
                    Some(event) => return event,
                    None => debug!(name = self.name, line, "ignore helper output"),
                },
                Ok(None) => {
                    let code = stream.wait().await.ok().flatten();
                    self.stream = None;
                    return WatchEvent::Fatal(format!(
                        "{} helper exited with code {code:?}",
                        self.name
                    ));
                }
                Err(err) => {
                    self.stream = None;
                    return WatchEvent::Fatal(err.to_string());
                }
            }
        }
    }

    async fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(err) = stream.kill().await {
                warn!(name = self.name, "cannot stop helper: {err}");
            }
        }
    }
}
