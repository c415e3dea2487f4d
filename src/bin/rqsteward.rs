//! Coordinator binary

use anyhow::Context;
use clap::{Parser, Subcommand};
use rqsteward::common::logging::{fallback_log_file, init_tracing, record_startup_failure};
use rqsteward::coordinator::RebootTarget;
use rqsteward::supervisor::{RebootRegistry, Supervisor};
use rqsteward::{Config, Coordinator};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "rqsteward")]
#[command(about = "rqlite node bootstrap, supervision and membership reclamation")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); RQSTEWARD_* variables override it
    #[arg(long, default_value = "/etc/rqsteward/rqsteward.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the daemon, register a boot-time rerun and reclaim stale members
    Run,

    /// Print the resolved role and daemon command without side effects
    Plan,

    /// Run only the stale member reclamation pass (leader only)
    Reclaim,

    /// Show whether the daemon is running and its reboot entry
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            record_startup_failure(
                &fallback_log_file(),
                &format!("loading configuration from {}: {}", cli.config.display(), e),
            );
            return Err(e)
                .with_context(|| format!("loading configuration from {}", cli.config.display()));
        }
    };
    init_tracing(&config).context("initializing logging")?;

    let reboot = RebootTarget::new(std::env::current_exe().context("resolving own executable")?);
    let coord = Coordinator::from_config(config, reboot)?;

    match cli.command {
        Commands::Run => {
            let report = coord.run().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Plan => {
            let plan = coord.plan()?;
            println!("role:    {}", plan.role);
            println!("ordinal: {}", plan.ordinal);
            if let Some(target) = plan.command.join_target() {
                println!("join:    {}", target);
            }
            println!("command: {}", plan.command);
        }
        Commands::Reclaim => {
            let report = coord.reclaim().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status => {
            let key = &coord.config().supervisor.service_key;
            let running = coord.supervisor().is_running(key)?;
            println!("service: {}", key);
            println!("running: {}", running);
            if let Some(record) = coord.supervisor().record(key)? {
                println!("pid:     {} (started {})", record.pid, record.started_at);
            }
            match coord.registry().entry(key)? {
                Some(entry) => println!("reboot:  {}", entry.line),
                None => println!("reboot:  (not registered)"),
            }
        }
    }

    Ok(())
}
