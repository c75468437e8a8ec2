//! Source-control access.
//!
//! Read-side queries (status, diffs, history, branches) go through git2.
//! Commit, push and remote probes shell out to the `git` binary so they
//! inherit the user's config, SSH agent and credential helpers.

pub mod diff;
pub mod history;
pub mod publish;
pub mod repo;
pub mod status;

pub use diff::{FileDiff, diff_for_path, diff_stat};
pub use history::{CommitInfo, contributor_count, file_history, recent_commit_count};
pub use publish::{GitCli, SourceControl};
pub use repo::{RepoInfo, open_repository, repo_info, tracked_files};
pub use status::{ChangeKind, ChangedPath, changed_paths};
