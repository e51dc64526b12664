//! CLI definition and parsing.
//! Defines Args and provides parse() for command-line handling.
//!
//! Notes:
//! - --debug is a shorthand for --log-level debug.
//! - Flags override values loaded from the XML config.

use clap::{Parser, Subcommand, ValueHint};
use std::path::PathBuf;
use std::str::FromStr;

use batch_split::config::types::{Config, LogLevel};
use batch_split::{SortPolicy, TransferMode};

/// Split a large folder of photos and videos into batch folders, safely.
/// CLI flags override config values (which are loaded from XML if present).
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Split large photo/video folders into resumable, undoable batches"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Enable debug logging (equivalent to `--log-level debug`).
    #[arg(
        short = 'd',
        long,
        global = true,
        help = "Enable debug logging (shorthand for --log-level debug)"
    )]
    pub debug: bool,

    /// Set log level. One of: quiet, normal, info, debug.
    #[arg(
        long,
        global = true,
        value_parser = LogLevel::from_str,
        help = "Set log level: quiet, normal, info, debug"
    )]
    pub log_level: Option<LogLevel>,

    /// Emit logs and results in structured JSON.
    #[arg(long, global = true, help = "Emit logs and results as JSON")]
    pub json: bool,

    /// Override where progress, undo history and the installation key live.
    #[arg(long, global = true, value_hint = ValueHint::DirPath)]
    pub state_dir: Option<PathBuf>,

    /// Print the config file location (or BATCH_SPLIT_CONFIG if set), then exit.
    #[arg(long, help = "Print the config file location used by batch_split and exit")]
    pub print_config: bool,
}

/// Planning options shared by `preview` and `run`.
#[derive(clap::Args, Debug, Clone)]
pub struct PlanArgs {
    /// Folder holding the files to split
    #[arg(value_hint = ValueHint::DirPath)]
    pub folder: PathBuf,

    /// Maximum files per batch folder
    #[arg(long = "max", short = 'n')]
    pub max_files_per_batch: Option<usize>,

    /// name-asc | name-desc | date-asc | date-desc | size-desc
    #[arg(long = "sort")]
    pub sort_by: Option<SortPolicy>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Count and group the media files in a folder
    Scan {
        #[arg(value_hint = ValueHint::DirPath)]
        folder: PathBuf,
    },
    /// Show the batches a run would create, without touching files
    Preview {
        #[command(flatten)]
        plan: PlanArgs,
    },
    /// Split a folder into batch folders
    Run {
        #[command(flatten)]
        plan: PlanArgs,

        /// Where batch folders are created (default: inside the folder)
        #[arg(long, short = 'o', value_hint = ValueHint::DirPath)]
        output: Option<PathBuf>,

        /// Batch folder prefix
        #[arg(long)]
        prefix: Option<String>,

        /// Copy instead of move (copies cannot be undone)
        #[arg(long)]
        copy: bool,

        /// Copy workers for cross-volume moves and copies
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Continue an interrupted run
    Resume,
    /// Show the interrupted run, if any
    Status,
    /// Forget the interrupted run without touching files
    Discard,
    /// Move files from a completed run back (latest run by default)
    Undo { operation_id: Option<String> },
    /// List undoable runs
    History,
    /// Check that a run's files are still where its undo manifest expects
    Check { operation_id: String },
}

impl Args {
    /// Effective log level derived from flags.
    /// Precedence: --debug > --log-level value > None (use config default).
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        if self.debug {
            return Some(LogLevel::Debug);
        }
        self.log_level.clone()
    }

    /// Apply CLI overrides to a loaded Config (in-place). No-ops for unset flags.
    pub fn apply_overrides(&self, cfg: &mut Config) {
        if let Some(level) = self.effective_log_level() {
            cfg.log_level = level;
        }
        if let Some(dir) = &self.state_dir {
            cfg.state_dir = dir.clone();
        }
        match &self.command {
            Some(Command::Preview { plan }) => plan.apply(cfg),
            Some(Command::Run {
                plan,
                prefix,
                concurrency,
                ..
            }) => {
                plan.apply(cfg);
                if let Some(p) = prefix {
                    cfg.batch_prefix = p.clone();
                }
                if let Some(c) = concurrency {
                    cfg.concurrency = *c;
                }
            }
            _ => {}
        }
    }
}

impl PlanArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(max) = self.max_files_per_batch {
            cfg.max_files_per_batch = max;
        }
        if let Some(sort) = self.sort_by {
            cfg.sort_by = sort;
        }
    }
}

pub fn mode_for(copy: bool) -> TransferMode {
    if copy { TransferMode::Copy } else { TransferMode::Move }
}

pub fn parse() -> Args {
    Args::parse()
}
