//! redtrib - inspect and repair slot-sharded clusters
//!
//! Discovers the cluster from one seed node, audits slot ownership and
//! optionally closes open slots and covers unassigned ones.

use std::path::PathBuf;

use anyhow::Context;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use redtrib::config::Config;
use redtrib::output::{render_call, render_check, render_summary};
use redtrib::TcpConnector;
use trib_core::{
    assign_config_epochs, check_cluster, cluster_summary, discover, wait_for_convergence,
    ClusterSession, SessionOptions,
};

/// Extra time a command may take beyond the MIGRATE timeout
const COMMAND_TIMEOUT_MARGIN_MS: u64 = 5000;

#[derive(Parser, Debug)]
#[command(name = "redtrib")]
#[command(about = "Cluster check and repair tool")]
struct Args {
    /// Configuration file path (YAML format)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// MIGRATE timeout in milliseconds
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Keys moved per MIGRATE
    #[arg(long, global = true)]
    pipeline: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Audit configuration consistency, open slots and slot coverage
    Check {
        /// Any cluster node (host:port)
        addr: String,
        /// Print the report as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Like check, then close open slots and cover unassigned slots
    Fix {
        addr: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Keys, slots and replicas per master
    Info { addr: String },
    /// Run a command on every node
    Call {
        addr: String,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Wait until every node agrees about the slot configuration
    Wait { addr: String },
    /// Give every node a distinct config epoch (fresh clusters only)
    AssignEpochs { addr: String },
}

impl Command {
    fn addr(&self) -> &str {
        match self {
            Command::Check { addr, .. }
            | Command::Fix { addr, .. }
            | Command::Info { addr }
            | Command::Call { addr, .. }
            | Command::Wait { addr }
            | Command::AssignEpochs { addr } => addr,
        }
    }
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    // Load configuration from file if specified, otherwise use defaults
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading configuration from {:?}", path))?,
        None => Config::default(),
    };

    // Override config with command line arguments
    if let Some(level) = &args.log_level {
        config.log.level = level.clone();
    }
    if let Some(timeout) = args.timeout {
        config.migrate.timeout_ms = timeout;
    }
    if let Some(pipeline) = args.pipeline {
        config.migrate.pipeline = pipeline;
    }
    config.connect.command_timeout_ms = config
        .connect
        .command_timeout_ms
        .max(config.migrate.timeout_ms + COMMAND_TIMEOUT_MARGIN_MS);
    Ok(config)
}

async fn open_session(config: &Config, addr: &str, fix: bool) -> anyhow::Result<ClusterSession> {
    let connector = TcpConnector::from_config(&config.connect);
    let options = SessionOptions {
        fix,
        move_options: config.move_options(),
    };
    let session = discover(&connector, addr, options).await?;
    Ok(session)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging(&config.log.level)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            trigger.cancel();
        }
    });

    let addr = args.command.addr().to_string();
    match &args.command {
        Command::Check { json, .. } | Command::Fix { json, .. } => {
            let fix = matches!(args.command, Command::Fix { .. });
            let mut session = open_session(&config, &addr, fix).await?;
            let report = check_cluster(&mut session, &cancel).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_check(&report));
            }
            if !report.is_ok() {
                std::process::exit(1);
            }
        }
        Command::Info { .. } => {
            let mut session = open_session(&config, &addr, false).await?;
            let summary = cluster_summary(&mut session).await;
            print!("{}", render_summary(&summary));
        }
        Command::Call { args: command, .. } => {
            let mut session = open_session(&config, &addr, false).await?;
            let argv: Vec<Bytes> = command.iter().map(|a| Bytes::from(a.clone())).collect();
            let replies = session.call_each(argv).await;
            print!("{}", render_call(&command.join(" "), &replies));
        }
        Command::Wait { .. } => {
            let mut session = open_session(&config, &addr, false).await?;
            let attempts =
                wait_for_convergence(&mut session, &config.convergence_policy(), &cancel).await?;
            info!("All nodes agree after {} poll(s)", attempts);
        }
        Command::AssignEpochs { .. } => {
            let mut session = open_session(&config, &addr, false).await?;
            let accepted = assign_config_epochs(&mut session).await;
            println!(
                "{} of {} node(s) accepted a config epoch",
                accepted,
                session.topology().len()
            );
        }
    }
    Ok(())
}
