//! Repository snapshot and per-file metadata records.

pub mod extract;
pub mod metadata;
pub mod tokens;
pub mod tree;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use extract::extract_snapshot;
pub use metadata::collect_file_records;
pub use tokens::count_tokens;
pub use tree::build_folder_tree;

/// Recent commit subjects are stored in a fixed number of slots.
pub const COMMIT_SLOTS: usize = 5;

/// Repository-level facts captured once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepoSnapshot {
    pub name: String,
    pub default_branch: String,
    pub current_branch: String,
    pub branches: Vec<String>,
    pub contributor_count: usize,
    pub root: PathBuf,
    /// Commits on HEAD within the recent-activity window.
    pub recent_commit_count: usize,
    /// Tracked and changed files per extension (`"rs" -> 12`).
    pub extension_counts: BTreeMap<String, usize>,
    pub changed_files: Vec<String>,
    pub diff_stat: String,
    /// `None` when the repository has no README.
    pub readme_tokens: Option<usize>,
    pub readme_path: Option<PathBuf>,
    /// Textual folder tree of the allow-listed files.
    pub folder_tree: String,
}

impl RepoSnapshot {
    /// True when nothing in the allow-list changed; downstream stages skip.
    pub fn no_update(&self) -> bool {
        self.changed_files.is_empty()
    }
}

/// Artifact locations for one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavePathBundle {
    pub diff: PathBuf,
    pub explain_in: PathBuf,
    pub explain_out: PathBuf,
    pub message_in: PathBuf,
    pub message_out: PathBuf,
}

/// Metadata for one changed file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Join key for every later stage; see [`file_id`].
    pub id: String,
    pub file_name: String,
    /// Repository-relative path.
    pub path: String,
    pub file_tokens: usize,
    pub diff_tokens: usize,
    /// Other entries in the file's directory.
    pub sibling_count: usize,
    /// Most recent commit subjects touching the file, newest first, padded to [`COMMIT_SLOTS`].
    pub recent_subjects: Vec<String>,
    pub recent_dates: Vec<DateTime<Utc>>,
    pub save_paths: SavePathBundle,
}

impl FileRecord {
    /// Non-empty recent commit subjects, newest first.
    pub fn subjects(&self) -> impl Iterator<Item = &str> {
        self.recent_subjects
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    pub fn absolute_path(&self, root: &Path) -> PathBuf {
        root.join(&self.path)
    }
}

/// Stable per-file identifier: `f` plus 12 hex digits of a UUIDv5 over the path.
///
/// Identical for the same repository-relative path across runs; distinct for
/// files sharing a name in different directories.
pub fn file_id(path: &str) -> String {
    let uuid = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, path.as_bytes());
    let hex = uuid.simple().to_string();
    format!("f{}", &hex[..12])
}

/// Pad or truncate `subjects` to exactly [`COMMIT_SLOTS`] entries.
pub fn pad_subjects(mut subjects: Vec<String>) -> Vec<String> {
    subjects.truncate(COMMIT_SLOTS);
    subjects.resize(COMMIT_SLOTS, String::new());
    subjects
}
