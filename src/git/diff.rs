//! Diff text and diff statistics against HEAD.

use git2::{DiffFormat, DiffOptions, DiffStatsFormat, ErrorCode, Repository, Tree};
use tracing::warn;

use crate::error::GitError;

/// Maximum characters of diff text kept per file.
const MAX_DIFF_LENGTH: usize = 30_000;

/// Unified diff of one path.
#[derive(Debug, Clone, Default)]
pub struct FileDiff {
    pub text: String,
    pub truncated: bool,
    pub additions: usize,
    pub deletions: usize,
}

/// Resolve the HEAD tree, distinguishing empty-repo errors from real failures.
///
/// Returns `Ok(None)` for repos with no commits (unborn branch / not found).
fn resolve_head_tree(repo: &Repository) -> Result<Option<Tree<'_>>, GitError> {
    let head_ref = match repo.head() {
        Ok(r) => r,
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            return Ok(None);
        }
        Err(e) => return Err(GitError::DiffFailed(e)),
    };

    let tree = head_ref.peel_to_tree().map_err(GitError::DiffFailed)?;
    Ok(Some(tree))
}

fn workdir_diff<'r>(repo: &'r Repository, paths: &[String]) -> Result<git2::Diff<'r>, GitError> {
    let head_tree = resolve_head_tree(repo)?;
    let mut opts = DiffOptions::new();
    opts.include_untracked(true)
        .recurse_untracked_dirs(true)
        .show_untracked_content(true);
    for p in paths {
        opts.pathspec(p);
    }
    repo.diff_tree_to_workdir_with_index(head_tree.as_ref(), Some(&mut opts))
        .map_err(GitError::DiffFailed)
}

/// Diff of `path` between HEAD and the working tree, staged changes included.
pub fn diff_for_path(repo: &Repository, path: &str) -> Result<FileDiff, GitError> {
    let diff = workdir_diff(repo, &[path.to_string()])?;
    let mut file_diff = FileDiff::default();

    let printed = diff.print(DiffFormat::Patch, |_delta, _hunk, line| {
        if file_diff.truncated {
            return true;
        }

        let origin = line.origin();
        match origin {
            '+' => file_diff.additions += 1,
            '-' => file_diff.deletions += 1,
            _ => {}
        }

        let content = String::from_utf8_lossy(line.content());
        if file_diff.text.len() + content.len() + 2 > MAX_DIFF_LENGTH {
            file_diff.truncated = true;
            return true;
        }

        if origin == '+' || origin == '-' || origin == ' ' {
            file_diff.text.push(origin);
        }
        file_diff.text.push_str(&content);
        true
    });

    if let Err(e) = printed {
        warn!("Failed to render diff for {}: {}", path, e);
        file_diff.truncated = true;
    }
    Ok(file_diff)
}

/// `git diff --stat` style summary for `paths`.
pub fn diff_stat(repo: &Repository, paths: &[String]) -> Result<String, GitError> {
    if paths.is_empty() {
        return Ok(String::new());
    }
    let diff = workdir_diff(repo, paths)?;
    let stats = diff.stats().map_err(GitError::DiffFailed)?;
    let buf = stats
        .to_buf(DiffStatsFormat::FULL, 80)
        .map_err(GitError::DiffFailed)?;
    Ok(buf.as_str().unwrap_or_default().trim_end().to_string())
}
