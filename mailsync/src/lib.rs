#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
//! Rust library to keep one IMAP mailbox synchronized into another.
//!
//! The library orchestrates an external transfer engine (imapsync by
//! default) in a long-running process:
//!
//! - The configuration is resolved from the environment, waiting for
//!   it to become complete. See [`resolve`].
//!
//! - Every attempt runs with a fixed set of safety bounds that cannot
//!   be switched off. See [`params`].
//!
//! - Attempts never overlap, are bounded in time and are recorded in a
//!   durable log and a health record. See [`engine`].
//!
//! - Attempts are triggered by polling, by IMAP IDLE notifications or
//!   by Gmail push notifications, falling back to polling when the
//!   notification collaborator is not available. See [`mode`].
//!
//! - The process identity and the health record are exposed to an
//!   external liveness probe, and removed on shutdown. See [`health`]
//!   and [`lifecycle`].
//!
//! - Both endpoints can be checked before the first attempt. See
//!   [`check`].

pub mod check;
pub mod config;
pub mod engine;
pub mod env;
mod fs;
pub mod health;
pub mod lifecycle;
pub mod log;
pub mod mode;
pub mod params;
pub mod pid;
pub mod report;
pub mod resolve;
pub mod signal;
pub mod watch;

use thiserror::Error;

#[doc(inline)]
pub use self::{
    config::{SyncConfig, SyncMode},
    lifecycle::{Context, Orchestrator},
};

/// The global `Result` alias of the library.
pub type Result<T> = std::result::Result<T, Error>;

/// The global `Error` enum of the library.
///
/// Gathers the errors ending a command of the binary.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    ResolveError(#[from] resolve::Error),
    #[error(transparent)]
    ProbeError(#[from] health::ProbeError),
    #[error(transparent)]
    CheckError(#[from] check::Error),
    #[error(transparent)]
    LifecycleError(#[from] lifecycle::Error),
}
