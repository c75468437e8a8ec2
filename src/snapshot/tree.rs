//! Compact textual folder tree for prompts.
//!
//! Folders are numbered and listed first as `"{index}={folder} ({depth})"`,
//! then files as `"[{folder index}]/{file name}"`, which keeps deep trees
//! short when folder names repeat.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::config::ChangeDetection;

/// Build the tree from repository-relative `paths`.
///
/// Paths are filtered by the extension allow-list. Any path with a
/// component starting with `.` or `__` is skipped.
pub fn build_folder_tree<'a>(
    paths: impl IntoIterator<Item = &'a str>,
    detection: &ChangeDetection,
) -> String {
    let mut files: BTreeSet<(String, String)> = BTreeSet::new();

    for path in paths {
        if !detection.allows(path) || is_hidden(path) {
            continue;
        }
        let p = Path::new(path);
        let Some(name) = p.file_name().map(|n| n.to_string_lossy().to_string()) else {
            continue;
        };
        let folder = p
            .parent()
            .map(|f| f.to_string_lossy().replace('\\', "/"))
            .filter(|f| !f.is_empty())
            .unwrap_or_else(|| ".".to_string());
        files.insert((folder, name));
    }

    let folders: BTreeSet<&str> = files.iter().map(|(folder, _)| folder.as_str()).collect();
    let index: BTreeMap<&str, usize> = folders.iter().enumerate().map(|(i, f)| (*f, i)).collect();

    let mut lines: Vec<String> = folders
        .iter()
        .enumerate()
        .map(|(i, folder)| format!("{i}={folder} ({})", depth(folder)))
        .collect();
    lines.extend(
        files
            .iter()
            .map(|(folder, name)| format!("[{}]/{}", index[folder.as_str()], name)),
    );
    lines.join("\n")
}

fn depth(folder: &str) -> usize {
    if folder == "." {
        1
    } else {
        folder.matches('/').count() + 1
    }
}

fn is_hidden(path: &str) -> bool {
    path.split('/')
        .any(|part| part.starts_with('.') || part.starts_with("__"))
}
