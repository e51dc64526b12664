//! Configuration: types, default paths, XML loading and validation.

pub mod paths;
pub mod types;
mod validate;
pub mod xml;

pub use paths::{default_config_path, default_log_path, default_state_dir, path_has_symlink_ancestor};
pub use types::{Config, LogLevel};
pub use xml::{LoadResult, create_template_config, load_config_from_xml_path, load_or_init};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "BATCH_SPLIT_CONFIG";

pub const DEFAULT_MAX_FILES_PER_BATCH: usize = 500;
pub const DEFAULT_BATCH_PREFIX: &str = "batch";
pub const DEFAULT_CONCURRENCY: usize = 8;
pub const MAX_CONCURRENCY: usize = 64;
pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_HISTORY_LIMIT: usize = 20;
