use std::{error::Error as StdError, future, process::ExitCode};

use chrono::Utc;
use clap::{Parser, Subcommand};
use mailsync::{
    check::{self, EndpointReport},
    env::{self, Env, ProcessEnv},
    health,
    lifecycle::{Context, Orchestrator},
    log::{self, SyncLog},
    params::ParameterSet,
    resolve, signal, Result, SyncMode,
};
use tracing::{debug, error, info, warn};

/// Keep one IMAP mailbox synchronized into another.
#[derive(Debug, Parser)]
#[command(name = "mailsync", author, version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Clone, Copy, Debug, Default, Subcommand)]
enum Command {
    /// Run the orchestrator until a termination signal is received.
    #[default]
    Run,

    /// Check the liveness of a running orchestrator.
    ///
    /// Exits with 0 when healthy, 1 otherwise.
    Probe,

    /// Print the resolved configuration and the engine parameters,
    /// secrets masked.
    Config,

    /// Connect to both endpoints, authenticate and select a folder.
    ///
    /// Exits with 0 when both endpoints pass, 1 otherwise.
    Check,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or_default();

    let source = ProcessEnv::from_process();
    let loaded = source.load();
    let env = Env::from_process();
    let ctx = Context::from_env(&env);

    let (sync_log, log_err) = match command {
        Command::Run => SyncLog::open(ctx.log_path()),
        _ => (SyncLog::stdout(), None),
    };

    log::init(&sync_log);

    if let Some(err) = log_err {
        warn!(path = ?ctx.log_path(), "cannot open log file, logging to stdout only: {err}");
    }

    env::trace_env_file(&loaded);

    let res = match command {
        Command::Run => run(ctx, source, sync_log).await,
        Command::Probe => probe(&ctx),
        Command::Config => print_config(&env),
        Command::Check => check(&env).await,
    };

    match res {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            debug!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(ctx: Context, source: ProcessEnv, sync_log: SyncLog) -> Result<()> {
    info!(state_dir = ?ctx.state_dir, log_dir = ?ctx.log_dir, "starting mailsync");

    let shutdown = async {
        match signal::wait_for_shutdown_signal().await {
            Ok(()) => (),
            Err(err) => {
                warn!("cannot listen to termination signals: {err}");
                future::pending().await
            }
        }
    };

    Orchestrator::new(ctx, source)
        .with_log(sync_log)
        .run(shutdown)
        .await?;

    Ok(())
}

fn probe(ctx: &Context) -> Result<()> {
    let record = health::evaluate(&ctx.pid_file(), &ctx.health_store())?;
    let age = record.age_at(Utc::now().timestamp());
    println!("{} (updated {age}s ago)", record.status);
    Ok(())
}

fn print_config(env: &Env) -> Result<()> {
    let config = resolve::resolve(env)?;
    println!("{config:#?}");
    println!("{}", ParameterSet::build(&config));
    Ok(())
}

async fn check(env: &Env) -> Result<()> {
    let config = resolve::resolve(env)?;
    let report = check::check(&config).await;

    for (side, res) in [("source", &report.source), ("destination", &report.destination)] {
        match res {
            Ok(endpoint) => println!("{side}: {}", summary(endpoint)),
            Err(err) => println!("{side}: {}", chain(err)),
        }
    }

    if config.mode == SyncMode::Idle && report.lacks_idle() {
        warn!("source server does not support IDLE, idle mode will fall back to poll mode");
    }

    report.into_result()?;
    Ok(())
}

fn summary(endpoint: &EndpointReport) -> String {
    format!(
        "ok, {} folders on {}, {} messages in {}, IDLE {}",
        endpoint.folders.len(),
        endpoint.addr,
        endpoint.messages,
        endpoint.folder,
        if endpoint.idle { "supported" } else { "not supported" },
    )
}

/// Renders an error followed by its sources.
fn chain(err: &dyn StdError) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();

    while let Some(err) = source {
        msg.push_str(": ");
        msg.push_str(&err.to_string());
        source = err.source();
    }

    msg
}
