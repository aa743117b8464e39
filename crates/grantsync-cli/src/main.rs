//! `grantsync`: reconcile folder ACLs against the grant datastore and audit
//! what every principal can actually do.
//!
//! Reports go to stdout, logs to stderr. Exit status is 0 for a clean run,
//! 1 when the run completed but found problems, 2 on a fatal error.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use grantsync_core::config::DEFAULT_CONFIG_FILE;
use grantsync_core::render::{AuditReportText, RunReportText, audit_view_json};
use grantsync_core::{
    AuditEngine, AuditView, BatchDriver, CommandAccessProbe, Config, GrantSnapshot, RunReport,
    SqliteGrantSource, ToolAclGateway,
};
use grantsync_error::{Result, SyncError};
use grantsync_types::NodeId;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_NOT_CLEAN: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "grantsync", version, about = "Reconcile and audit folder access grants")]
struct Cli {
    /// Configuration file. Without it, `grantsync.toml` is read if present.
    #[arg(long, global = true, env = "GRANTSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Physical directory of the logical root `/`.
    #[arg(long, global = true)]
    share_root: Option<PathBuf>,

    /// Grant datastore (SQLite).
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Also write the complete report as JSON to this path.
    #[arg(long, global = true)]
    report: Option<PathBuf>,

    /// Debug logging; overrides RUST_LOG.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Reconcile one node by datastore id.
    ReconcileOne { node_id: i64 },
    /// Reconcile every granted node, parents before children.
    ReconcileAll,
    /// Probe actual access and classify it against the grants. Read-only.
    Audit {
        /// summary, full, by-node or by-principal
        #[arg(long, default_value_t = AuditView::Summary)]
        view: AuditView,
        /// Print the selected view as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(EXIT_NOT_CLEAN),
        Err(err) => {
            error!(error = %err, fatal = err.is_fatal(), "run aborted");
            eprintln!("grantsync: {err}");
            ExitCode::from(EXIT_FATAL)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Named file, or the default location when present; flags win over both.
fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(Path::new(DEFAULT_CONFIG_FILE))?,
    };
    if let Some(share_root) = &cli.share_root {
        config.share_root.clone_from(share_root);
    }
    if let Some(database) = &cli.database {
        config.datastore.path.clone_from(database);
    }
    config.validate()?;
    Ok(config)
}

/// Returns whether the run was clean.
fn run(cli: &Cli) -> Result<bool> {
    let config = resolve_config(cli)?;
    let source = SqliteGrantSource::open(&config.datastore.path, config.source_filter())?;
    let snapshot = GrantSnapshot::load(
        &source,
        &config.share_root,
        config.excluded_principals().as_slice(),
    )?;
    let mut gateway = ToolAclGateway::new(config.acl_tool.program.clone());
    let policy = config.reconcile_policy();

    match &cli.command {
        Command::ReconcileOne { node_id } => {
            let report =
                BatchDriver::new(&mut gateway, &snapshot, policy).reconcile_one(NodeId(*node_id));
            finish_run(&report, cli.report.as_deref())
        }
        Command::ReconcileAll => {
            let report = BatchDriver::new(&mut gateway, &snapshot, policy).run_all();
            finish_run(&report, cli.report.as_deref())
        }
        Command::Audit { view, json } => {
            let probe = CommandAccessProbe::new(config.probe.runas.clone());
            let report = AuditEngine::new(&gateway, &probe, &snapshot).run();
            if *json {
                let value = audit_view_json(&report, *view).map_err(serialize_error)?;
                println!(
                    "{}",
                    serde_json::to_string_pretty(&value).map_err(serialize_error)?
                );
            } else {
                print!(
                    "{}",
                    AuditReportText {
                        report: &report,
                        view: *view,
                    }
                );
            }
            if let Some(path) = &cli.report {
                write_json(path, &report)?;
            }
            Ok(report.is_clean())
        }
    }
}

fn finish_run(report: &RunReport, report_path: Option<&Path>) -> Result<bool> {
    print!("{}", RunReportText(report));
    if let Some(path) = report_path {
        write_json(path, report)?;
    }
    Ok(report.is_clean())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value).map_err(serialize_error)?;
    text.push('\n');
    fs::write(path, text)?;
    info!(path = %path.display(), "report written");
    Ok(())
}

fn serialize_error(err: serde_json::Error) -> SyncError {
    SyncError::internal(format!("report serialization: {err}"))
}
