//! Command-line front end of `pfs-fsck`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::checks::{CheckContext, CheckId};
use crate::config::FsckConfig;
use crate::cursor::Cursor;
use crate::persistence::ViolationFilter;
use crate::store::FsckDb;
use crate::violation::ViolationKind;

/// Arguments of `pfs-fsck`.
#[derive(Parser)]
#[command(name = "pfs-fsck")]
#[command(about = "ParaFS offline consistency checker", long_about = None)]
pub struct Cli {
    /// Configuration file (`.toml` or `.json`).
    #[arg(short, long, env = "PFS_FSCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding the configuration.
    #[arg(long)]
    pub db: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands of `pfs-fsck`.
#[derive(Subcommand)]
pub enum Command {
    /// Runs checks and stores their violations.
    Check {
        /// Checks to run, by name; all when omitted.
        #[arg(long = "check")]
        checks: Vec<CheckId>,
    },
    /// Prints stored and pending violation counts per kind.
    Summary,
    /// Prints the stored violations of one kind as JSON lines.
    List {
        /// Violation kind, e.g. `DanglingDentry`.
        kind: String,
        /// Only violations owned by this node or target.
        #[arg(long)]
        owner: Option<u16>,
        /// Only violations still awaiting a decision.
        #[arg(long)]
        pending: bool,
    },
    /// Empties the database.
    Clear,
}

impl Cli {
    /// Loads the configuration, applying command-line overrides.
    pub fn load_config(&self) -> Result<FsckConfig> {
        let mut config = match &self.config {
            Some(path) => FsckConfig::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => FsckConfig::default(),
        };
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Command::Check { checks } = &self.command {
            if !checks.is_empty() {
                config.checks = checks.clone();
            }
        }
        Ok(config)
    }

    /// Executes the selected subcommand.
    pub fn run(self) -> Result<()> {
        let config = self.load_config()?;
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }
        let db = FsckDb::open(&config)
            .with_context(|| format!("opening fsck database {}", config.db_path.display()))?;

        match self.command {
            Command::Check { .. } => run_checks(&db, &config),
            Command::Summary => summary(&db),
            Command::List { ref kind, owner, pending } => list(&db, kind, owner, pending),
            Command::Clear => Ok(db.clear()?),
        }
    }
}

fn run_checks(db: &FsckDb, config: &FsckConfig) -> Result<()> {
    let ctx = CheckContext::load(db, config).context("loading modification events")?;
    let mut failed = Vec::new();
    for id in config.selected_checks() {
        if !db.check_for_and_insert(&ctx, id) {
            failed.push(id.name());
        }
    }

    summary(db)?;
    if !failed.is_empty() {
        anyhow::bail!("{} check(s) failed: {}", failed.len(), failed.join(", "));
    }
    Ok(())
}

fn summary(db: &FsckDb) -> Result<()> {
    println!("{:<28} {:>10} {:>10}", "KIND", "FOUND", "PENDING");
    for row in db.violation_summary()? {
        println!("{:<28} {:>10} {:>10}", row.kind.short_name(), row.total, row.pending);
    }
    Ok(())
}

fn list(db: &FsckDb, kind: &str, owner: Option<u16>, pending: bool) -> Result<()> {
    let kind = ViolationKind::from_short_name(kind)
        .with_context(|| format!("unknown violation kind {:?}", kind))?;
    let mut filter = if pending { ViolationFilter::pending() } else { ViolationFilter::default() };
    filter.owner = owner;

    for record in db.violations(kind, &filter)?.into_results() {
        let record = record?;
        println!(
            "{}\t{}\t{:#x}\t{}",
            record.violation.key(),
            record.repair_action,
            record.ignore_errors,
            serde_json::to_string(&record.violation)?
        );
    }
    Ok(())
}
