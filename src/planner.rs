//! Bin-packing planner.
//!
//! Orders groups by a [`SortPolicy`] and assigns whole groups to batches
//! under a per-batch file ceiling. A group is never split; a group larger
//! than the ceiling forms its own (oversized) batch.
//!
//! The packer is a bounded first-fit: each group looks back through at most
//! [`SEARCH_DEPTH`] of the most recently created batches, nearest first,
//! before opening a new one. That keeps planning linear for very large
//! inputs at the cost of occasionally leaving room in older batches.

use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::engine::Operation;
use crate::errors::BatchError;
use crate::grouper::{CANCEL_CHECK_INTERVAL, FileGroup};
use crate::shutdown::CancelToken;

/// How many trailing batches are probed for room before opening a new one.
pub const SEARCH_DEPTH: usize = 50;

/// Maximum length of a batch folder prefix.
pub const MAX_PREFIX_LEN: usize = 100;

/// Suffix appended to batch folders holding flagged groups.
pub const FLAGGED_SUFFIX: &str = "_flagged";

/// Group ordering applied before packing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortPolicy {
    #[default]
    NameAsc,
    NameDesc,
    DateAsc,
    DateDesc,
    SizeDesc,
}

impl SortPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortPolicy::NameAsc => "name-asc",
            SortPolicy::NameDesc => "name-desc",
            SortPolicy::DateAsc => "date-asc",
            SortPolicy::DateDesc => "date-desc",
            SortPolicy::SizeDesc => "size-desc",
        }
    }
}

impl fmt::Display for SortPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortPolicy {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "name-asc" | "name" => Ok(SortPolicy::NameAsc),
            "name-desc" => Ok(SortPolicy::NameDesc),
            "date-asc" | "date" => Ok(SortPolicy::DateAsc),
            "date-desc" => Ok(SortPolicy::DateDesc),
            "size-desc" | "size" => Ok(SortPolicy::SizeDesc),
            other => Err(format!(
                "invalid sort policy '{other}' (expected name-asc, name-desc, date-asc, date-desc or size-desc)"
            )),
        }
    }
}

/// Per-file facts used by the date and size policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Modification / capture time in epoch milliseconds
    pub modified_ms: Option<i64>,
    pub size: Option<u64>,
}

/// Optional collaborator lookups. Both are pure, keyed by file name.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanInputs<'a> {
    pub file_info: Option<&'a HashMap<String, FileInfo>>,
    /// Classification result; `true` marks a flagged file
    pub flags: Option<&'a HashMap<String, bool>>,
}

/// A set of whole groups destined for one folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 0-based position in the final plan
    pub index: usize,
    pub groups: Vec<FileGroup>,
    /// Sum of member counts
    pub file_count: usize,
    pub flagged: bool,
}

impl Batch {
    fn new(index: usize, group: FileGroup, flagged: bool) -> Self {
        Self {
            index,
            file_count: group.len(),
            groups: vec![group],
            flagged,
        }
    }

    fn push(&mut self, group: FileGroup) {
        self.file_count += group.len();
        self.groups.push(group);
    }
}

/// Per-batch line of a preview.
#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    pub folder_name: String,
    pub file_count: usize,
    pub group_names: Vec<String>,
    pub flagged: bool,
}

/// Result of a dry-run plan.
#[derive(Debug, Clone, Serialize)]
pub struct BatchPreview {
    pub batch_count: usize,
    pub batch_sizes: Vec<usize>,
    pub total_files: usize,
    pub skipped_files: usize,
    pub details: Vec<BatchDetail>,
    /// Base names of groups larger than the ceiling
    pub oversized_groups: Vec<String>,
    pub cancelled: bool,
}

impl BatchPreview {
    pub fn build(batches: &[Batch], max_files_per_batch: usize, prefix: &str, skipped: usize) -> Self {
        let names = folder_names(batches, prefix);
        let details = batches
            .iter()
            .zip(names)
            .map(|(b, folder_name)| BatchDetail {
                folder_name,
                file_count: b.file_count,
                group_names: b.groups.iter().map(|g| g.base_name.clone()).collect(),
                flagged: b.flagged,
            })
            .collect();
        let oversized_groups = batches
            .iter()
            .flat_map(|b| b.groups.iter())
            .filter(|g| g.len() > max_files_per_batch)
            .map(|g| g.base_name.clone())
            .collect();
        Self {
            batch_count: batches.len(),
            batch_sizes: batches.iter().map(|b| b.file_count).collect(),
            total_files: batches.iter().map(|b| b.file_count).sum(),
            skipped_files: skipped,
            details,
            oversized_groups,
            cancelled: false,
        }
    }

    /// Empty preview for a planning pass stopped by cancellation.
    pub fn cancelled() -> Self {
        Self {
            batch_count: 0,
            batch_sizes: Vec::new(),
            total_files: 0,
            skipped_files: 0,
            details: Vec::new(),
            oversized_groups: Vec::new(),
            cancelled: true,
        }
    }
}

/// Reject prefixes that are not a single safe path component.
pub fn validate_prefix(prefix: &str) -> Result<(), BatchError> {
    let unsafe_prefix = prefix.is_empty()
        || prefix == "."
        || prefix == ".."
        || prefix.len() > MAX_PREFIX_LEN
        || prefix.contains(['/', '\\', '\0']);
    if unsafe_prefix {
        return Err(BatchError::UnsafePrefix(prefix.to_string()));
    }
    Ok(())
}

/// Order and pack `groups` into batches of at most `max_files_per_batch` files.
///
/// With a classification map, groups containing any flagged member are packed
/// separately and appended after the unflagged batches.
pub fn plan_batches(
    groups: &HashMap<String, Vec<String>>,
    max_files_per_batch: usize,
    policy: SortPolicy,
    inputs: &PlanInputs<'_>,
    cancel: &CancelToken,
) -> Result<Vec<Batch>, BatchError> {
    if max_files_per_batch == 0 {
        return Err(BatchError::InvalidCeiling(max_files_per_batch));
    }

    let mut plain = Vec::with_capacity(groups.len());
    let mut flagged = Vec::new();
    for (base, files) in groups {
        let group = FileGroup {
            base_name: base.clone(),
            files: files.clone(),
        };
        let is_flagged = inputs
            .flags
            .is_some_and(|f| group.files.iter().any(|n| f.get(n).copied().unwrap_or(false)));
        if is_flagged {
            flagged.push(group);
        } else {
            plain.push(group);
        }
    }

    sort_groups(&mut plain, policy, inputs.file_info);
    sort_groups(&mut flagged, policy, inputs.file_info);

    let mut batches = pack(plain, max_files_per_batch, false, 0, cancel)?;
    let offset = batches.len();
    batches.extend(pack(flagged, max_files_per_batch, true, offset, cancel)?);

    debug!(
        groups = groups.len(),
        batches = batches.len(),
        max_files_per_batch,
        policy = %policy,
        "planned batches"
    );
    Ok(batches)
}

fn pack(
    groups: Vec<FileGroup>,
    max: usize,
    flagged: bool,
    index_offset: usize,
    cancel: &CancelToken,
) -> Result<Vec<Batch>, BatchError> {
    let mut batches: Vec<Batch> = Vec::new();
    for (i, group) in groups.into_iter().enumerate() {
        if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            return Err(BatchError::Cancelled);
        }
        let len = group.len();
        let lo = batches.len().saturating_sub(SEARCH_DEPTH);
        let target = if len > max {
            None
        } else {
            (lo..batches.len())
                .rev()
                .find(|&j| batches[j].file_count + len <= max)
        };
        match target {
            Some(j) => batches[j].push(group),
            None => {
                let index = index_offset + batches.len();
                batches.push(Batch::new(index, group, flagged));
            }
        }
    }
    Ok(batches)
}

fn sort_groups(
    groups: &mut [FileGroup],
    policy: SortPolicy,
    info: Option<&HashMap<String, FileInfo>>,
) {
    let lookup = |name: &String| info.and_then(|m| m.get(name));
    let earliest = |g: &FileGroup| -> Option<i64> {
        g.files.iter().filter_map(|f| lookup(f)?.modified_ms).min()
    };
    let total_bytes = |g: &FileGroup| -> u64 {
        g.files.iter().filter_map(|f| lookup(f)?.size).sum()
    };

    match policy {
        SortPolicy::NameAsc => groups.sort_by(|a, b| a.base_name.cmp(&b.base_name)),
        SortPolicy::NameDesc => groups.sort_by(|a, b| b.base_name.cmp(&a.base_name)),
        SortPolicy::DateAsc | SortPolicy::DateDesc => {
            let desc = policy == SortPolicy::DateDesc;
            groups.sort_by_cached_key(|g| (DateKey { ts: earliest(g), desc }, g.base_name.clone()));
        }
        SortPolicy::SizeDesc => groups.sort_by_cached_key(|g| {
            (Reverse(g.len()), Reverse(total_bytes(g)), g.base_name.clone())
        }),
    }
}

/// Dated groups first, in the requested direction; undated groups last.
#[derive(PartialEq, Eq)]
struct DateKey {
    ts: Option<i64>,
    desc: bool,
}

impl Ord for DateKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.ts, other.ts) {
            (Some(a), Some(b)) if self.desc => b.cmp(&a),
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

impl PartialOrd for DateKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Folder names `{prefix}_{n}` with `n` 1-based and zero-padded to at least 3 digits.
pub fn folder_names(batches: &[Batch], prefix: &str) -> Vec<String> {
    let width = batches.len().to_string().len().max(3);
    batches
        .iter()
        .map(|b| {
            let suffix = if b.flagged { FLAGGED_SUFFIX } else { "" };
            format!("{prefix}_{:0width$}{suffix}", b.index + 1)
        })
        .collect()
}

/// Expand batches into per-file operations: batch by batch, group by group, file by file.
pub fn flatten(batches: &[Batch], source: &Path, output: &Path, prefix: &str) -> Vec<Operation> {
    let names = folder_names(batches, prefix);
    let total: usize = batches.iter().map(|b| b.file_count).sum();
    let mut ops = Vec::with_capacity(total);
    for (batch, folder) in batches.iter().zip(&names) {
        let dir = output.join(folder);
        for group in &batch.groups {
            for file in &group.files {
                ops.push(Operation {
                    file_name: file.clone(),
                    source_path: source.join(file),
                    dest_path: dir.join(file),
                    batch_index: batch.index,
                });
            }
        }
    }
    ops
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(sizes: &[(&str, usize)]) -> HashMap<String, Vec<String>> {
        sizes.iter()
            .map(|(base, n)| {
                let files = (0..*n).map(|i| format!("{base}.{i}.jpg")).collect();
                (base.to_string(), files)
            })
            .collect()
    }

    fn plan(g: &HashMap<String, Vec<String>>, max: usize, policy: SortPolicy) -> Vec<Batch> {
        plan_batches(g, max, policy, &PlanInputs::default(), &CancelToken::new()).unwrap()
    }

    #[test]
    fn oversized_group_gets_own_batch() {
        let mut g = HashMap::new();
        g.insert(
            "IMG_0001".to_string(),
            vec!["IMG_0001.CR2".to_string(), "IMG_0001.jpg".to_string()],
        );
        g.insert("IMG_0002".to_string(), vec!["IMG_0002.jpg".to_string()]);
        let b = plan(&g, 1, SortPolicy::NameAsc);
        assert_eq!(b.len(), 2);
        assert_eq!(b[0].groups[0].base_name, "IMG_0001");
        assert_eq!(b[0].file_count, 2);
        assert_eq!(b[1].groups[0].base_name, "IMG_0002");

        let preview = BatchPreview::build(&b, 1, "batch", 1);
        assert_eq!(preview.oversized_groups, vec!["IMG_0001".to_string()]);
        assert_eq!(preview.batch_sizes, vec![2, 1]);
    }

    #[test]
    fn zero_ceiling_is_rejected() {
        let g = groups(&[("a", 1)]);
        let err = plan_batches(&g, 0, SortPolicy::NameAsc, &PlanInputs::default(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, BatchError::InvalidCeiling(0)));
    }

    #[test]
    fn backfills_earlier_batch_with_room() {
        // a(3) -> #0, b(3) -> #1 (no room in #0), c(1) -> #1 (nearest with room)
        let g = groups(&[("a", 3), ("b", 3), ("c", 1)]);
        let b = plan(&g, 4, SortPolicy::NameAsc);
        assert_eq!(b.len(), 2);
        assert_eq!(b[1].file_count, 4);
        assert_eq!(b[1].groups[1].base_name, "c");
    }

    #[test]
    fn size_desc_orders_by_member_count() {
        let g = groups(&[("small", 1), ("big", 3), ("mid", 2)]);
        let b = plan(&g, 100, SortPolicy::SizeDesc);
        let order: Vec<_> = b[0].groups.iter().map(|g| g.base_name.as_str()).collect();
        assert_eq!(order, ["big", "mid", "small"]);
    }

    #[test]
    fn date_policies_put_undated_last() {
        let g = groups(&[("a", 1), ("b", 1), ("c", 1)]);
        let mut info = HashMap::new();
        info.insert("a.0.jpg".to_string(), FileInfo { modified_ms: Some(20), size: None });
        info.insert("c.0.jpg".to_string(), FileInfo { modified_ms: Some(10), size: None });
        let inputs = PlanInputs { file_info: Some(&info), flags: None };

        let asc = plan_batches(&g, 100, SortPolicy::DateAsc, &inputs, &CancelToken::new()).unwrap();
        let order: Vec<_> = asc[0].groups.iter().map(|g| g.base_name.as_str()).collect();
        assert_eq!(order, ["c", "a", "b"]);

        let desc = plan_batches(&g, 100, SortPolicy::DateDesc, &inputs, &CancelToken::new()).unwrap();
        let order: Vec<_> = desc[0].groups.iter().map(|g| g.base_name.as_str()).collect();
        assert_eq!(order, ["a", "c", "b"]);
    }

    #[test]
    fn flagged_groups_are_planned_after_plain_ones() {
        let g = groups(&[("a", 1), ("b", 1), ("c", 1)]);
        let mut flags = HashMap::new();
        flags.insert("b.0.jpg".to_string(), true);
        flags.insert("a.0.jpg".to_string(), false);
        let inputs = PlanInputs { file_info: None, flags: Some(&flags) };
        let b = plan_batches(&g, 10, SortPolicy::NameAsc, &inputs, &CancelToken::new()).unwrap();
        assert_eq!(b.len(), 2);
        assert!(!b[0].flagged);
        assert!(b[1].flagged);
        assert_eq!(b[1].index, 1);
        assert_eq!(folder_names(&b, "set"), vec!["set_001", "set_002_flagged"]);
    }

    #[test]
    fn folder_name_padding_grows_with_count() {
        let g: HashMap<String, Vec<String>> = (0..1000)
            .map(|i| (format!("g{i:04}"), vec![format!("g{i:04}.jpg")]))
            .collect();
        let b = plan(&g, 1, SortPolicy::NameAsc);
        let names = folder_names(&b, "batch");
        assert_eq!(names[0], "batch_0001");
        assert_eq!(names[999], "batch_1000");
    }

    #[test]
    fn prefix_validation() {
        assert!(validate_prefix("batch").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("..").is_err());
        assert!(validate_prefix("a/b").is_err());
        assert!(validate_prefix("a\\b").is_err());
        assert!(validate_prefix("a\0").is_err());
        assert!(validate_prefix(&"x".repeat(101)).is_err());
    }

    #[test]
    fn flatten_emits_in_plan_order() {
        let g = groups(&[("a", 2), ("b", 1)]);
        let b = plan(&g, 2, SortPolicy::NameAsc);
        let ops = flatten(&b, Path::new("/src"), Path::new("/out"), "batch");
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].dest_path, Path::new("/out/batch_001/a.0.jpg"));
        assert_eq!(ops[1].source_path, Path::new("/src/a.1.jpg"));
        assert_eq!(ops[2].dest_path, Path::new("/out/batch_002/b.0.jpg"));
        assert_eq!(ops[2].batch_index, 1);
    }

    #[test]
    fn sort_policy_parses() {
        assert_eq!("date-desc".parse::<SortPolicy>().unwrap(), SortPolicy::DateDesc);
        assert_eq!(" Size-Desc ".parse::<SortPolicy>().unwrap(), SortPolicy::SizeDesc);
        assert!("random".parse::<SortPolicy>().is_err());
    }
}
