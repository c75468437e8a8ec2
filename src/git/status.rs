//! Working-tree status: which paths have pending changes.

use std::fmt;

use git2::{Repository, Status, StatusOptions};

use crate::error::GitError;

/// Kind of pending change for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    Renamed,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Added => write!(f, "Added"),
            ChangeKind::Modified => write!(f, "Modified"),
            ChangeKind::Deleted => write!(f, "Deleted"),
            ChangeKind::Renamed => write!(f, "Renamed"),
        }
    }
}

/// A path with staged or unstaged changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedPath {
    pub path: String,
    pub kind: ChangeKind,
}

/// Every path with staged, unstaged or (optionally) untracked changes, sorted by path.
pub fn changed_paths(
    repo: &Repository,
    include_untracked: bool,
) -> Result<Vec<ChangedPath>, GitError> {
    let mut opts = StatusOptions::new();
    opts.include_untracked(include_untracked)
        .recurse_untracked_dirs(include_untracked)
        .include_ignored(false)
        .renames_head_to_index(true);

    let statuses = repo.statuses(Some(&mut opts)).map_err(GitError::StatusFailed)?;

    let mut changed: Vec<ChangedPath> = statuses
        .iter()
        .filter_map(|entry| {
            let path = entry.path()?.to_string();
            classify(entry.status()).map(|kind| ChangedPath { path, kind })
        })
        .collect();

    changed.sort_by(|a, b| a.path.cmp(&b.path));
    changed.dedup_by(|a, b| a.path == b.path);
    Ok(changed)
}

fn classify(status: Status) -> Option<ChangeKind> {
    if status.is_ignored() || status.is_conflicted() {
        return None;
    }
    if status.intersects(Status::INDEX_RENAMED | Status::WT_RENAMED) {
        Some(ChangeKind::Renamed)
    } else if status.intersects(Status::INDEX_DELETED | Status::WT_DELETED) {
        Some(ChangeKind::Deleted)
    } else if status.intersects(Status::INDEX_NEW | Status::WT_NEW) {
        Some(ChangeKind::Added)
    } else if status.intersects(
        Status::INDEX_MODIFIED
            | Status::WT_MODIFIED
            | Status::INDEX_TYPECHANGE
            | Status::WT_TYPECHANGE,
    ) {
        Some(ChangeKind::Modified)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_with_commit(dir: &std::path::Path, files: &[(&str, &str)]) -> Repository {
        let repo = Repository::init(dir).unwrap();
        for (name, content) in files {
            std::fs::write(dir.join(name), content).unwrap();
        }
        {
            let mut index = repo.index().unwrap();
            for (name, _) in files {
                index.add_path(std::path::Path::new(name)).unwrap();
            }
            index.write().unwrap();
            let tree_id = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_id).unwrap();
            let sig = git2::Signature::now("Test", "test@test.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[]).unwrap();
        }
        repo
    }

    #[test]
    fn clean_repo_has_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_with_commit(dir.path(), &[("a.py", "x = 1\n")]);
        assert!(changed_paths(&repo, true).unwrap().is_empty());
    }

    #[test]
    fn reports_modified_deleted_and_untracked() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_with_commit(dir.path(), &[("a.py", "x = 1\n"), ("b.py", "y = 2\n")]);
        std::fs::write(dir.path().join("a.py"), "x = 2\n").unwrap();
        std::fs::remove_file(dir.path().join("b.py")).unwrap();
        std::fs::write(dir.path().join("c.py"), "z = 3\n").unwrap();

        let changed = changed_paths(&repo, true).unwrap();
        assert_eq!(
            changed,
            vec![
                ChangedPath { path: "a.py".into(), kind: ChangeKind::Modified },
                ChangedPath { path: "b.py".into(), kind: ChangeKind::Deleted },
                ChangedPath { path: "c.py".into(), kind: ChangeKind::Added },
            ]
        );
    }

    #[test]
    fn untracked_files_can_be_excluded() {
        let dir = tempfile::tempdir().unwrap();
        let repo = init_with_commit(dir.path(), &[("a.py", "x = 1\n")]);
        std::fs::write(dir.path().join("new.py"), "n = 0\n").unwrap();
        assert!(changed_paths(&repo, false).unwrap().is_empty());
    }

    #[test]
    fn change_kind_display() {
        assert_eq!(ChangeKind::Added.to_string(), "Added");
        assert_eq!(ChangeKind::Renamed.to_string(), "Renamed");
    }
}
