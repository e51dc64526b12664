//! Config validation logic.
//! Checks numeric ranges, the default prefix, and that the state directory
//! exists (created 0700 if missing), is writable and passes platform checks.

use anyhow::{Context, Result, bail};
use std::fs;
use std::path::Path;
use tracing::{debug, error, info};

use crate::planner::validate_prefix;
use crate::platform::{ensure_secure_directory, set_dir_mode_0700};

use super::MAX_CONCURRENCY;
use super::types::Config;

impl Config {
    /// Validate ranges and prepare the state directory.
    pub fn validate(&self) -> Result<()> {
        if self.max_files_per_batch == 0 {
            bail!("max_files_per_batch must be at least 1");
        }
        if self.concurrency == 0 || self.concurrency > MAX_CONCURRENCY {
            bail!("concurrency must be between 1 and {MAX_CONCURRENCY}, got {}", self.concurrency);
        }
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.history_limit == 0 {
            bail!("history_limit must be at least 1");
        }
        if self.flush_interval.is_zero() {
            bail!("flush_interval_ms must be greater than 0");
        }
        validate_prefix(&self.batch_prefix).context("batch_prefix")?;

        ensure_dir_is_or_create(&self.state_dir, "state_dir")?;
        ensure_writable(&self.state_dir, "state_dir")?;
        ensure_secure_directory(&self.state_dir, "state_dir")?;

        info!(
            state_dir = %self.state_dir.display(),
            log_file = %self
                .log_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<none>".into()),
            "Config validated"
        );
        Ok(())
    }
}

/// Ensure directory exists (create 0700 if missing). If it exists, it must be a directory.
fn ensure_dir_is_or_create(path: &Path, name: &str) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            error!("{name} exists but isn't a directory: {}", path.display());
            bail!("{name} exists but isn't a directory: {}", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("Failed to create {name} directory '{}'", path.display()))?;
        let _ = set_dir_mode_0700(path);
        info!("Created {name} directory: {}", path.display());
    }
    Ok(())
}

/// Ensure directory is writable using a non-destructive probe file.
fn ensure_writable(path: &Path, name: &str) -> Result<()> {
    let probe = path.join(format!(".batch_split_probe_{}.tmp", std::process::id()));
    fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&probe)
        .with_context(|| format!("Cannot write to {name} '{}'; check permissions", path.display()))?;
    let _ = fs::remove_file(&probe);
    debug!("{name} writable: {}", path.display());
    Ok(())
}
