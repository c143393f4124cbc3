//! restic-warden daemon.
//!
//! Ticks every `backup_every_n_minutes`, runs the backup cycle and keeps the
//! journal. Tracing goes to stderr and to a daily file in the logs directory;
//! the operation journal is written next to it.

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use restic_warden::journal::Journal;
use restic_warden::restic::{CommandBuilder, ProcessLauncher, resolve_binary};
use restic_warden::scheduler::{
    BackupScheduler, InstanceLock, SchedulerSettings, StateStore,
};
use restic_warden::{StatusSnapshot, WardenConfig, WardenError, warden_dirs};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Periodic restic backups with stale-lock recovery.
#[derive(Parser)]
#[command(name = "restic-warden", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run a single cycle, then exit.
    #[arg(long)]
    once: bool,

    /// Print the current status and exit.
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.unwrap_or_else(WardenConfig::default_config_path);
    let config = WardenConfig::load_or_default(&config_path)
        .with_context(|| format!("cannot load config from {}", config_path.display()))?;

    if cli.status {
        return print_status(&config);
    }

    let _log_guard = init_tracing();
    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path.display(), "restic-warden starting");

    let _instance = InstanceLock::acquire(warden_dirs::pid_file()).map_err(|e| match e {
        WardenError::AlreadyRunning { pid } => {
            anyhow::anyhow!("another restic-warden is already running (pid {pid})")
        }
        other => anyhow::anyhow!("cannot take instance lock: {other}"),
    })?;

    let policy = config.scheduler_policy();
    let store = StateStore::open(warden_dirs::state_file())?;
    let state = store.load(policy, Utc::now());

    let commands = CommandBuilder::new(
        resolve_binary(&config.restic.binary),
        config.restic.resolve_paths(),
        config.retention_policy(),
    );
    let journal = Journal::open(&warden_dirs::logs_dir());
    if let Some(path) = journal.path() {
        info!("journal at {}", path.display());
    }

    let mut scheduler = BackupScheduler::new(
        state,
        Some(store),
        ProcessLauncher,
        commands,
        Box::new(journal),
        SchedulerSettings::from_config(&config),
    );

    let cancel = CancellationToken::new();
    install_signal_handlers(cancel.clone());

    if cli.once {
        tokio::select! {
            () = cancel.cancelled() => info!("interrupted during single cycle"),
            started = scheduler.run_cycle() => {
                if !started {
                    info!("cycle refused");
                }
            }
        }
        scheduler.shutdown().await;
        return Ok(());
    }

    let state = tokio::spawn(scheduler.run(cancel)).await?;
    info!(phase = %state.phase(), status = %state.status(), "restic-warden shut down cleanly");
    Ok(())
}

/// stderr plus a daily file in the logs directory. The returned guard must
/// live until exit so buffered lines are flushed.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("restic_warden=info"));
    let stderr = fmt::layer().with_writer(std::io::stderr);

    let logs_dir = warden_dirs::logs_dir();
    if let Err(e) = std::fs::create_dir_all(&logs_dir) {
        tracing_subscriber::registry().with(filter).with(stderr).init();
        error!("cannot create {}: {e}, logging to stderr only", logs_dir.display());
        return None;
    }

    let appender = tracing_appender::rolling::daily(&logs_dir, "restic-warden.log");
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();
    Some(guard)
}

fn install_signal_handlers(cancel: CancellationToken) {
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("received SIGINT, stopping");
            on_ctrl_c.cancel();
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                if term.recv().await.is_some() {
                    info!("received SIGTERM, stopping");
                    cancel.cancel();
                }
            }
            Err(e) => error!("cannot install SIGTERM handler: {e}"),
        }
    });
}

/// Report from the state file. A live scheduler's running phase is shown as
/// is; otherwise the record is read the way the next start would read it.
fn print_status(config: &WardenConfig) -> anyhow::Result<()> {
    let policy = config.scheduler_policy();
    let store = StateStore::open(warden_dirs::state_file())?;
    let now = Utc::now();

    let state = match InstanceLock::acquire(warden_dirs::pid_file()) {
        Err(WardenError::AlreadyRunning { .. }) => store
            .read_record()
            .map(|record| record.view(policy))
            .unwrap_or_else(|| store.load(policy, now)),
        _ => store.load(policy, now),
    };

    let every = Duration::from_secs(config.schedule.backup_every_n_minutes.max(1) * 60);
    println!("{}", StatusSnapshot::capture(&state, None, every).report(now));
    Ok(())
}
