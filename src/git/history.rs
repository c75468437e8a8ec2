//! Commit history queries.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit, ErrorCode, Oid, Repository, Sort};

use crate::error::GitError;

/// Upper bound on commits inspected per history query.
const MAX_WALK: usize = 5_000;

/// Subject line and author time of one commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitInfo {
    pub subject: String,
    pub time: DateTime<Utc>,
}

impl CommitInfo {
    fn from_commit(commit: &Commit<'_>) -> Self {
        let subject = commit
            .message()
            .unwrap_or("")
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        let time = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self { subject, time }
    }
}

/// Revwalk from HEAD, newest first. `None` for a repository without commits.
fn walk_head(repo: &Repository) -> Result<Option<git2::Revwalk<'_>>, GitError> {
    match repo.head() {
        Ok(_) => {}
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            return Ok(None);
        }
        Err(e) => return Err(GitError::RevwalkError(e)),
    }

    let mut revwalk = repo.revwalk().map_err(GitError::RevwalkError)?;
    revwalk.push_head().map_err(GitError::RevwalkError)?;
    revwalk.set_sorting(Sort::TIME).map_err(GitError::RevwalkError)?;
    Ok(Some(revwalk))
}

fn entry_id(commit: &Commit<'_>, path: &str) -> Option<Oid> {
    commit
        .tree()
        .ok()?
        .get_path(std::path::Path::new(path))
        .ok()
        .map(|entry| entry.id())
}

/// The `limit` most recent commits that touched `path`, newest first.
pub fn file_history(
    repo: &Repository,
    path: &str,
    limit: usize,
) -> Result<Vec<CommitInfo>, GitError> {
    let Some(revwalk) = walk_head(repo)? else {
        return Ok(Vec::new());
    };

    let mut history = Vec::new();
    for oid in revwalk.take(MAX_WALK) {
        if history.len() >= limit {
            break;
        }
        let oid = oid.map_err(GitError::RevwalkError)?;
        let commit = repo.find_commit(oid).map_err(GitError::RevwalkError)?;

        let current = entry_id(&commit, path);
        let touched = match commit.parent(0) {
            Ok(parent) => current != entry_id(&parent, path),
            Err(_) => current.is_some(),
        };
        if touched {
            history.push(CommitInfo::from_commit(&commit));
        }
    }
    Ok(history)
}

/// Number of commits reachable from HEAD authored at or after `since`.
pub fn recent_commit_count(repo: &Repository, since: DateTime<Utc>) -> Result<usize, GitError> {
    let Some(revwalk) = walk_head(repo)? else {
        return Ok(0);
    };

    let mut count = 0;
    for oid in revwalk.take(MAX_WALK) {
        let oid = oid.map_err(GitError::RevwalkError)?;
        let commit = repo.find_commit(oid).map_err(GitError::RevwalkError)?;
        if CommitInfo::from_commit(&commit).time < since {
            break;
        }
        count += 1;
    }
    Ok(count)
}

/// Distinct author emails reachable from HEAD.
pub fn contributor_count(repo: &Repository) -> Result<usize, GitError> {
    let Some(revwalk) = walk_head(repo)? else {
        return Ok(0);
    };

    let mut authors = HashSet::new();
    for oid in revwalk.take(MAX_WALK) {
        let oid = oid.map_err(GitError::RevwalkError)?;
        let commit = repo.find_commit(oid).map_err(GitError::RevwalkError)?;
        if let Some(email) = commit.author().email() {
            authors.insert(email.to_lowercase());
        }
    }
    Ok(authors.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Signature, Time};
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        repo: Repository,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let repo = Repository::init(dir.path()).unwrap();
            Self { _dir: dir, repo }
        }

        fn commit(&self, file: &str, content: &str, message: &str, email: &str, secs: i64) {
            let root = self.repo.workdir().unwrap().to_path_buf();
            std::fs::write(root.join(file), content).unwrap();
            let mut index = self.repo.index().unwrap();
            index.add_path(Path::new(file)).unwrap();
            index.write().unwrap();
            let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
            let sig = Signature::new("Dev", email, &Time::new(secs, 0)).unwrap();
            let parents: Vec<Commit> = self
                .repo
                .head()
                .ok()
                .and_then(|h| h.peel_to_commit().ok())
                .into_iter()
                .collect();
            let parent_refs: Vec<&Commit> = parents.iter().collect();
            self.repo
                .commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
                .unwrap();
        }
    }

    #[test]
    fn file_history_only_lists_commits_touching_path() {
        let fx = Fixture::new();
        fx.commit("a.py", "1", "feat: add a", "a@x.io", 1_000);
        fx.commit("b.py", "1", "feat: add b", "b@x.io", 2_000);
        fx.commit("a.py", "2", "fix: tweak a\n\nbody", "a@x.io", 3_000);

        let history = file_history(&fx.repo, "a.py", 5).unwrap();
        let subjects: Vec<&str> = history.iter().map(|c| c.subject.as_str()).collect();
        assert_eq!(subjects, vec!["fix: tweak a", "feat: add a"]);
        assert_eq!(history[0].time.timestamp(), 3_000);
    }

    #[test]
    fn file_history_respects_limit() {
        let fx = Fixture::new();
        for i in 0..6 {
            fx.commit("a.py", &i.to_string(), &format!("change {i}"), "a@x.io", 1_000 + i);
        }
        assert_eq!(file_history(&fx.repo, "a.py", 5).unwrap().len(), 5);
    }

    #[test]
    fn empty_repository_has_no_history() {
        let fx = Fixture::new();
        assert!(file_history(&fx.repo, "a.py", 5).unwrap().is_empty());
        assert_eq!(contributor_count(&fx.repo).unwrap(), 0);
        assert_eq!(recent_commit_count(&fx.repo, Utc::now()).unwrap(), 0);
    }

    #[test]
    fn counts_contributors_and_recent_commits() {
        let fx = Fixture::new();
        fx.commit("a.py", "1", "one", "a@x.io", 1_000);
        fx.commit("a.py", "2", "two", "B@x.io", 5_000);
        fx.commit("a.py", "3", "three", "b@x.io", 9_000);

        assert_eq!(contributor_count(&fx.repo).unwrap(), 2);
        let since = Utc.timestamp_opt(4_000, 0).unwrap();
        assert_eq!(recent_commit_count(&fx.repo, since).unwrap(), 2);
    }
}
