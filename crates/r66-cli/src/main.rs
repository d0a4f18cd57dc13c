//! R66 spooled directory launcher
//!
//! Starts one daemon per complete `<spooled>` entry of the configuration
//! file, or a single daemon described by command-line flags when the file
//! has none. Exits with 0 on a clean stop, 2 on configuration errors and 1
//! on runtime faults.

mod args;
mod config;

use anyhow::Context;
use args::Cli;
use clap::Parser;
use config::{ClientEnvironment, ConfigError};
use r66_client::{JournalTaskLedger, MemoryTaskLedger, OutboxClient, TaskLedger};
use r66_spool::{Collaborators, SpoolConfig, SpoolError, SpoolReport, Supervisor};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Exit code for configuration and validation errors
const EXIT_CONFIG: u8 = 2;

/// Exit code for runtime faults
const EXIT_FAULT: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(args::normalize(std::env::args_os()));

    let log_level = if cli.debug {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(err: &anyhow::Error) -> u8 {
    let is_config = err.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || cause
                .downcast_ref::<SpoolError>()
                .is_some_and(SpoolError::is_config)
    });
    if is_config { EXIT_CONFIG } else { EXIT_FAULT }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file = config::load(&cli.config)?;
    let env = file.environment;

    let configs = if file.daemons.is_empty() {
        vec![cli.to_config(&env)?]
    } else {
        if cli.has_daemon_flags() {
            tracing::warn!(
                "{} daemons declared in {}, command-line daemon flags ignored",
                file.daemons.len(),
                cli.config.display()
            );
        }
        file.daemons
    };
    config::check_distinct_status_files(&configs)?;

    let collab = collaborators(&env)?;
    let supervisors = configs
        .into_iter()
        .map(|config| Supervisor::new(config, collab.clone()))
        .collect::<Vec<_>>();

    // Nothing starts unless every daemon is valid
    for supervisor in &supervisors {
        supervisor.validate()?;
    }

    launch(supervisors).await
}

/// Build the collaborators shared by every daemon.
fn collaborators(env: &ClientEnvironment) -> anyhow::Result<Collaborators> {
    let tasks: Arc<dyn TaskLedger> = match &env.journal {
        Some(path) => Arc::new(
            JournalTaskLedger::open(path)
                .with_context(|| format!("opening task journal {}", path.display()))?,
        ),
        None => {
            tracing::info!("No task journal configured, running without task database");
            Arc::new(MemoryTaskLedger::detached())
        }
    };

    let Some(outbox) = &env.outbox else {
        return Err(ConfigError::Environment("no <outbox> configured".into()).into());
    };
    let client = OutboxClient::new(outbox, &env.host_id, tasks.clone()).with_timeout(env.timeout);

    Ok(Collaborators::new(
        Arc::new(client),
        Arc::new(env.catalog()),
        tasks,
    ))
}

/// Run every daemon until it stops; Ctrl-C stops them all.
async fn launch(supervisors: Vec<Supervisor>) -> anyhow::Result<()> {
    let handles: Vec<_> = supervisors.iter().map(Supervisor::handle).collect();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping {} daemons", handles.len());
            for handle in &handles {
                handle.stop();
            }
        }
    });

    let mut daemons = JoinSet::new();
    for supervisor in supervisors {
        daemons.spawn(supervisor.run());
    }

    let mut reports: Vec<SpoolReport> = Vec::new();
    let mut failure: Option<anyhow::Error> = None;
    while let Some(joined) = daemons.join_next().await {
        match joined {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(e)) => {
                tracing::error!("Daemon failed: {}", e);
                if failure.is_none() {
                    failure = Some(e.into());
                }
            }
            Err(e) => {
                tracing::error!("Daemon task failed: {}", e);
                if failure.is_none() {
                    failure = Some(SpoolError::from(e).into());
                }
            }
        }
    }

    reports.sort_by(|a, b| a.name.cmp(&b.name));
    for report in &reports {
        tracing::warn!(
            "{}: {} ({} sent, {} error)",
            report.name,
            report.state,
            report.sent,
            report.error
        );
    }

    failure.map_or(Ok(()), Err)
}
