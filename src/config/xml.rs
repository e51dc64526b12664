//! XML configuration support.
//! - Loads settings from config.xml (quick_xml + serde).
//! - Creates a commented template if missing (unless BATCH_SPLIT_CONFIG is set).
//!
//! Notes:
//! - This module only reads/writes the config file; validation happens in `validate`.
//! - Unknown XML fields are rejected so typos surface early.

use anyhow::{Context, Result, bail};
use quick_xml::de::from_str as from_xml_str;
use serde::{Deserialize, Deserializer};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use super::paths::{default_config_path, default_state_dir, path_has_symlink_ancestor};
use super::types::{Config, LogLevel};
use super::{
    CONFIG_ENV, DEFAULT_BATCH_PREFIX, DEFAULT_CHUNK_SIZE, DEFAULT_CONCURRENCY,
    DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_FILES_PER_BATCH,
};
use crate::planner::SortPolicy;
use crate::platform::{atomic_write_0600, set_dir_mode_0700};

/// Struct mirroring the XML config for deserialization.
#[derive(Debug, Default, Deserialize)]
#[serde(rename = "config")]
#[serde(deny_unknown_fields)]
struct XmlConfig {
    state_dir: Option<String>,
    log_level: Option<String>,
    log_file: Option<String>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    max_files_per_batch: Option<usize>,
    batch_prefix: Option<String>,
    sort_by: Option<String>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    concurrency: Option<usize>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    chunk_size: Option<usize>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    flush_interval_ms: Option<u64>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    history_limit: Option<usize>,
    #[serde(default, deserialize_with = "de_trimmed_opt")]
    encrypt_state: Option<bool>,
    #[serde(rename = "allowed_root", default)]
    allowed_roots: Vec<String>,
}

/// Outcome of locating and reading the config file.
#[derive(Debug)]
pub enum LoadResult {
    /// Parsed from the given file.
    Loaded(Config, PathBuf),
    /// No file existed; a template was written and defaults are in effect.
    CreatedTemplate(Config, PathBuf),
    /// No file and no template (explicit path missing or template refused).
    Defaults(Config),
}

impl LoadResult {
    pub fn into_config(self) -> Config {
        match self {
            LoadResult::Loaded(c, _) | LoadResult::CreatedTemplate(c, _) | LoadResult::Defaults(c) => c,
        }
    }
}

// Trim surrounding whitespace before parsing an optional scalar.
fn de_trimmed_opt<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    match opt.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => s.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn xml_to_config(parsed: XmlConfig) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(s) = non_empty(parsed.state_dir.as_deref()) {
        cfg.state_dir = PathBuf::from(s);
    }
    if let Some(s) = non_empty(parsed.log_file.as_deref()) {
        cfg.log_file = Some(PathBuf::from(s));
    }
    if let Some(s) = non_empty(parsed.log_level.as_deref()) {
        cfg.log_level = s.parse::<LogLevel>().map_err(anyhow::Error::msg)?;
    }
    if let Some(s) = non_empty(parsed.sort_by.as_deref()) {
        cfg.sort_by = s.parse::<SortPolicy>().map_err(anyhow::Error::msg)?;
    }
    if let Some(s) = non_empty(parsed.batch_prefix.as_deref()) {
        cfg.batch_prefix = s.to_string();
    }
    if let Some(n) = parsed.max_files_per_batch {
        cfg.max_files_per_batch = n;
    }
    if let Some(n) = parsed.concurrency {
        cfg.concurrency = n;
    }
    if let Some(n) = parsed.chunk_size {
        cfg.chunk_size = n;
    }
    if let Some(ms) = parsed.flush_interval_ms {
        cfg.flush_interval = Duration::from_millis(ms);
    }
    if let Some(n) = parsed.history_limit {
        cfg.history_limit = n;
    }
    if let Some(b) = parsed.encrypt_state {
        cfg.encrypt_state = b;
    }
    cfg.allowed_roots = parsed
        .allowed_roots
        .iter()
        .filter_map(|s| non_empty(Some(s)))
        .map(PathBuf::from)
        .collect();

    Ok(cfg)
}

/// Load a Config from a specific XML file path.
pub fn load_config_from_xml_path(path: &Path) -> Result<Config> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("read config xml '{}'", path.display()))?;
    let parsed: XmlConfig = from_xml_str(&contents)
        .with_context(|| format!("parse config xml '{}'", path.display()))?;
    xml_to_config(parsed).with_context(|| format!("invalid value in '{}'", path.display()))
}

/// Locate the config file and load it.
/// - `$BATCH_SPLIT_CONFIG` must point at an existing file.
/// - The default location gets a template on first run.
pub fn load_or_init() -> Result<LoadResult> {
    let explicit = env::var_os(CONFIG_ENV).is_some();
    let path = default_config_path()?;

    if path.exists() {
        let cfg = load_config_from_xml_path(&path)?;
        return Ok(LoadResult::Loaded(cfg, path));
    }
    if explicit {
        bail!("{CONFIG_ENV} points at a missing file: {}", path.display());
    }
    if let Ok(true) = path_has_symlink_ancestor(&path) {
        return Ok(LoadResult::Defaults(Config::default()));
    }
    match create_template_config(&path) {
        Ok(()) => Ok(LoadResult::CreatedTemplate(Config::default(), path)),
        Err(_) => Ok(LoadResult::Defaults(Config::default())),
    }
}

/// Write a commented template config with secure permissions.
pub fn create_template_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
        let _ = set_dir_mode_0700(parent);
    }

    let state_dir = default_state_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "/path/to/batch_split/state".into());

    let content = format!(
        "<!--\n  batch_split configuration (XML)\n\n  state_dir            -> ledger, undo manifests, history and installation key\n  log_level            -> quiet | normal | info | debug\n  log_file             -> optional log file (stderr is always used)\n  max_files_per_batch  -> default file ceiling per batch folder\n  batch_prefix         -> default batch folder prefix\n  sort_by              -> name-asc | name-desc | date-asc | date-desc | size-desc\n  concurrency          -> copy workers for cross-volume moves and copies\n  chunk_size           -> renames per chunk for same-volume moves\n  flush_interval_ms    -> minimum spacing between progress ledger writes\n  history_limit        -> number of undoable operations kept\n  encrypt_state        -> true: encrypt durable state; false: sign it\n  allowed_root         -> repeatable; restricts which folders may be processed\n\n  CLI flags override XML values.\n-->\n<config>\n  <state_dir>{}</state_dir>\n  <log_level>normal</log_level>\n  <max_files_per_batch>{}</max_files_per_batch>\n  <batch_prefix>{}</batch_prefix>\n  <sort_by>name-asc</sort_by>\n  <concurrency>{}</concurrency>\n  <chunk_size>{}</chunk_size>\n  <flush_interval_ms>{}</flush_interval_ms>\n  <history_limit>{}</history_limit>\n  <encrypt_state>true</encrypt_state>\n</config>\n",
        state_dir,
        DEFAULT_MAX_FILES_PER_BATCH,
        DEFAULT_BATCH_PREFIX,
        DEFAULT_CONCURRENCY,
        DEFAULT_CHUNK_SIZE,
        DEFAULT_FLUSH_INTERVAL_MS,
        DEFAULT_HISTORY_LIMIT,
    );

    atomic_write_0600(path, content.as_bytes())?;
    info!("Created template config at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn template_parses_back() {
        let td = tempdir().unwrap();
        let p = td.path().join("cfg").join("config.xml");
        create_template_config(&p).unwrap();
        let cfg = load_config_from_xml_path(&p).unwrap();
        assert_eq!(cfg.max_files_per_batch, DEFAULT_MAX_FILES_PER_BATCH);
        assert_eq!(cfg.sort_by, SortPolicy::NameAsc);
        assert!(cfg.encrypt_state);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.xml");
        fs::write(&p, "<config><bogus>1</bogus></config>").unwrap();
        assert!(load_config_from_xml_path(&p).is_err());
    }

    #[test]
    fn whitespace_and_repeated_roots() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.xml");
        fs::write(
            &p,
            "<config>\n  <concurrency>  4 </concurrency>\n  <sort_by> date-desc </sort_by>\n  <allowed_root>/a</allowed_root>\n  <allowed_root>/b</allowed_root>\n</config>",
        )
        .unwrap();
        let cfg = load_config_from_xml_path(&p).unwrap();
        assert_eq!(cfg.concurrency, 4);
        assert_eq!(cfg.sort_by, SortPolicy::DateDesc);
        assert_eq!(cfg.allowed_roots, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
    }

    #[test]
    fn bad_sort_policy_is_error() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.xml");
        fs::write(&p, "<config><sort_by>random</sort_by></config>").unwrap();
        assert!(load_config_from_xml_path(&p).is_err());
    }
}
