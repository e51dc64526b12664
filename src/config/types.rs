//! Core configuration types.
//! - Config holds runtime settings with sensible defaults.
//! - LogLevel represents verbosity with simple parsing helpers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::paths;
use super::{
    DEFAULT_BATCH_PREFIX, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY, DEFAULT_FLUSH_INTERVAL_MS,
    DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_FILES_PER_BATCH,
};
use crate::planner::SortPolicy;

/// Program-defined verbosity levels exposed to users/config.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Only errors
    Quiet,
    /// Warnings and errors (default)
    #[default]
    Normal,
    /// More info (like verbose)
    Info,
    /// Debug/trace
    Debug,
}

impl LogLevel {
    /// Parse common string names into our LogLevel (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "quiet" | "error" | "none" => Some(LogLevel::Quiet),
            "normal" => Some(LogLevel::Normal),
            "info" | "verbose" | "detailed" => Some(LogLevel::Info),
            "debug" | "trace" => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Normal => "normal",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        };
        f.write_str(s)
    }
}

impl FromStr for LogLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("invalid log level: '{s}'"))
    }
}

/// Runtime configuration for planning, execution and durable state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Where the ledger, manifests, history index and installation key live
    pub state_dir: PathBuf,
    /// Console verbosity
    pub log_level: LogLevel,
    /// Optional path to a log file
    pub log_file: Option<PathBuf>,
    /// Default per-batch file ceiling
    pub max_files_per_batch: usize,
    /// Default batch folder prefix
    pub batch_prefix: String,
    /// Default group ordering
    pub sort_by: SortPolicy,
    /// Worker pool size for copy-based transfers
    pub concurrency: usize,
    /// Renames per chunk on the same-volume path
    pub chunk_size: usize,
    /// Minimum spacing between ledger flushes
    pub flush_interval: Duration,
    /// Number of undo manifests kept in history
    pub history_limit: usize,
    /// Encrypt durable state (otherwise sign it)
    pub encrypt_state: bool,
    /// If non-empty, only paths under these roots are accepted
    pub allowed_roots: Vec<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: paths::default_state_dir()
                .unwrap_or_else(|_| PathBuf::from(".batch_split")),
            log_level: LogLevel::Normal,
            log_file: None,
            max_files_per_batch: DEFAULT_MAX_FILES_PER_BATCH,
            batch_prefix: DEFAULT_BATCH_PREFIX.to_string(),
            sort_by: SortPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            chunk_size: DEFAULT_CHUNK_SIZE,
            flush_interval: Duration::from_millis(DEFAULT_FLUSH_INTERVAL_MS),
            history_limit: DEFAULT_HISTORY_LIMIT,
            encrypt_state: true,
            allowed_roots: Vec::new(),
        }
    }
}

impl Config {
    /// Construct a Config rooted at an explicit state directory; other fields use defaults.
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Default::default()
        }
    }
}
