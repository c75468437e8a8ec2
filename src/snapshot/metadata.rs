//! File Metadata Collector.

use std::fs;
use std::path::Path;

use git2::Repository;
use tracing::warn;

use crate::artifact::{self, ArtifactStore};
use crate::git;
use crate::snapshot::{COMMIT_SLOTS, FileRecord, RepoSnapshot, count_tokens, file_id, pad_subjects};

/// Build one [`FileRecord`] per changed file and persist each file's diff text.
///
/// Per-file problems (unreadable content, failed diff or history lookups)
/// are logged and replaced with empty values.
pub fn collect_file_records(
    repo: &Repository,
    snapshot: &RepoSnapshot,
    store: &ArtifactStore,
) -> Vec<FileRecord> {
    snapshot
        .changed_files
        .iter()
        .map(|path| collect_one(repo, &snapshot.root, path, store))
        .collect()
}

fn collect_one(repo: &Repository, root: &Path, path: &str, store: &ArtifactStore) -> FileRecord {
    let id = file_id(path);
    let absolute = root.join(path);

    let content = read_lossy(&absolute).unwrap_or_else(|e| {
        warn!("Could not read {}: {}; using empty content", path, e);
        String::new()
    });

    let diff_text = match git::diff_for_path(repo, path) {
        Ok(diff) => diff.text,
        Err(e) => {
            warn!("Could not diff {}: {}", path, e);
            String::new()
        }
    };

    let save_paths = store.save_paths_for(&id);
    if let Err(e) = artifact::write_text(&save_paths.diff, &diff_text) {
        warn!("Could not persist diff for {}: {}", path, e);
    }

    let history = git::file_history(repo, path, COMMIT_SLOTS).unwrap_or_else(|e| {
        warn!("Could not read history of {}: {}", path, e);
        Vec::new()
    });

    let file_name = absolute
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string());

    FileRecord {
        id,
        file_name,
        path: path.to_string(),
        file_tokens: count_tokens(&content),
        diff_tokens: count_tokens(&diff_text),
        sibling_count: sibling_count(&absolute),
        recent_subjects: pad_subjects(history.iter().map(|c| c.subject.clone()).collect()),
        recent_dates: history.iter().map(|c| c.time).collect(),
        save_paths,
    }
}

/// File text with invalid UTF-8 replaced.
pub fn read_lossy(path: &Path) -> std::io::Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Entries sharing the file's directory, excluding the file itself.
fn sibling_count(path: &Path) -> usize {
    let Some(parent) = path.parent() else {
        return 0;
    };
    fs::read_dir(parent)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path() != path && !e.file_name().to_string_lossy().starts_with('.'))
                .count()
        })
        .unwrap_or(0)
}
