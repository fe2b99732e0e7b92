//! # Watch
//!
//! Module dedicated to the change-notification collaborators used by
//! the idle and push modes. A collaborator runs its own protocol
//! session (a long-wait IMAP session, a push subscription…) and only
//! reports discrete [`WatchEvent`]s to the orchestrator.

mod helper;

use async_trait::async_trait;
use thiserror::Error;

#[doc(inline)]
pub use self::helper::{parse_line, HelperWatch};

/// The global `Result` alias of the module.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the module.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot start {1} helper")]
    StartHelperError(#[source] process::Error, String),
}

/// An event reported by a collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WatchEvent {
    /// A change was detected: a sync attempt should run.
    Changed,

    /// The collaborator is alive but nothing changed.
    Alive,

    /// The collaborator cannot go on.
    Fatal(String),
}

#[async_trait]
pub trait Watch: Send + Sync {
    /// The name of the collaborator, for logs.
    fn name(&self) -> &str;

    /// Returns `true` if the collaborator can be started.
    ///
    /// This is queried once, when the mode is selected.
    async fn is_available(&self) -> bool;

    /// Starts a new session.
    async fn start(&mut self) -> Result<()>;

    /// Waits for the next event of the current session.
    ///
    /// This function must be cancel safe.
    async fn next_event(&mut self) -> WatchEvent;

    /// Stops the current session, if any.
    async fn stop(&mut self);
}
