//! # Signals
//!
//! Provides [`wait_for_shutdown_signal`], an async helper that
//! completes when the process receives a termination signal.
//!
//! On unix, `SIGINT`, `SIGTERM` (sent by container orchestrators) and
//! `SIGQUIT` are handled. Elsewhere, only Ctrl-C is.

/// Waits for a termination signal.
///
/// Returns an error if the signal listeners cannot be registered.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }

    Ok(())
}

/// Waits for a termination signal.
///
/// Returns an error if the signal listener cannot be registered.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
