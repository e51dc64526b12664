//! Core library for `batch_split`.
//!
//! Splits a large flat folder of photos and videos into size-bounded batch
//! folders, moving or copying the files with crash-safe progress tracking
//! and undo support.
//!
//! Pipeline: [`grouper`] -> [`planner`] -> [`ledger`] records the plan ->
//! [`engine`] relocates files -> [`history`] keeps an undo manifest.
//! [`Session`] ties these together behind the caller-facing operations.

pub mod config;
pub mod engine;
pub mod errors;
pub mod grouper;
pub mod history;
pub mod ledger;
pub mod lock;
pub mod output;
pub mod planner;
pub mod platform;
pub mod seal;
pub mod session;
pub mod shutdown;

pub use config::types::{Config, LogLevel};
pub use config::{
    default_config_path, default_log_path, default_state_dir, load_config_from_xml_path,
    path_has_symlink_ancestor,
};
pub use engine::{ExecutionReport, Operation, ProgressEvent, Strategy, TransferMode};
pub use errors::{BatchError, TransferError};
pub use history::{HistorySummary, UndoReport, ValidationReport};
pub use ledger::InterruptedSummary;
pub use planner::{BatchPreview, SortPolicy};
pub use session::{AllowAll, BatchOutcome, BatchRequest, PathGate, RootsGate, ScanSummary, Session};
pub use shutdown::CancelToken;

/// Convenient re-exports for callers.
pub mod prelude {
    pub use crate::config::types::{Config, LogLevel};
    pub use crate::config::{default_config_path, default_log_path, load_config_from_xml_path};
    pub use crate::engine::{ExecutionReport, ProgressEvent, Strategy, TransferMode};
    pub use crate::errors::BatchError;
    pub use crate::planner::SortPolicy;
    pub use crate::session::{AllowAll, BatchRequest, PathGate, RootsGate, Session};
    pub use crate::shutdown::CancelToken;
}
