//! Repository discovery and branch metadata.

use std::path::{Path, PathBuf};

use git2::{BranchType, ErrorCode, Repository};

use crate::error::GitError;

/// Open the repository containing `path`, rejecting bare repositories.
pub fn open_repository(path: &Path) -> Result<Repository, GitError> {
    let repo = Repository::discover(path).map_err(GitError::OpenRepository)?;
    if repo.is_bare() {
        return Err(GitError::BareRepository);
    }
    Ok(repo)
}

/// Branch and naming facts about a repository.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoInfo {
    pub name: String,
    pub root: PathBuf,
    pub current_branch: String,
    pub default_branch: String,
    pub branches: Vec<String>,
}

pub fn repo_info(repo: &Repository) -> Result<RepoInfo, GitError> {
    let root = repo
        .workdir()
        .ok_or(GitError::BareRepository)?
        .to_path_buf();
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "repository".to_string());

    let current_branch = current_branch(repo)?;
    let branches = local_branches(repo)?;
    let default_branch = default_branch(repo, &branches).unwrap_or_else(|| current_branch.clone());

    Ok(RepoInfo {
        name,
        root,
        current_branch,
        default_branch,
        branches,
    })
}

/// Short name of the checked-out branch, `HEAD` when detached.
fn current_branch(repo: &Repository) -> Result<String, GitError> {
    match repo.head() {
        Ok(head) if head.is_branch() => Ok(head.shorthand().unwrap_or("HEAD").to_string()),
        Ok(_) => Ok("HEAD".to_string()),
        Err(e) if e.code() == ErrorCode::UnbornBranch || e.code() == ErrorCode::NotFound => {
            // Unborn: HEAD still names the branch the first commit will land on
            let head = repo.find_reference("HEAD").map_err(GitError::Metadata)?;
            Ok(head
                .symbolic_target()
                .and_then(|t| t.strip_prefix("refs/heads/"))
                .unwrap_or("HEAD")
                .to_string())
        }
        Err(e) => Err(GitError::Metadata(e)),
    }
}

fn local_branches(repo: &Repository) -> Result<Vec<String>, GitError> {
    let mut names = Vec::new();
    for branch in repo
        .branches(Some(BranchType::Local))
        .map_err(GitError::Metadata)?
    {
        let (branch, _) = branch.map_err(GitError::Metadata)?;
        if let Ok(Some(name)) = branch.name() {
            names.push(name.to_string());
        }
    }
    names.sort();
    Ok(names)
}

/// `origin/HEAD` target if known, else `main` or `master` when present.
fn default_branch(repo: &Repository, branches: &[String]) -> Option<String> {
    if let Ok(reference) = repo.find_reference("refs/remotes/origin/HEAD")
        && let Some(target) = reference.symbolic_target()
        && let Some(name) = target.strip_prefix("refs/remotes/origin/")
    {
        return Some(name.to_string());
    }
    ["main", "master"]
        .into_iter()
        .find(|candidate| branches.iter().any(|b| b == candidate))
        .map(String::from)
}

/// Paths recorded in the index.
pub fn tracked_files(repo: &Repository) -> Result<Vec<String>, GitError> {
    let index = repo.index().map_err(GitError::Metadata)?;
    Ok(index
        .iter()
        .map(|entry| String::from_utf8_lossy(&entry.path).to_string())
        .collect())
}

/// A git config value, `None` when unset or empty.
pub fn config_value(repo: &Repository, key: &str) -> Option<String> {
    repo.config()
        .ok()?
        .get_string(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
}
