//! Shared prompt context for the explanation and commit-message generators.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use crate::snapshot::metadata::read_lossy;
use crate::snapshot::{FileRecord, RepoSnapshot};
use crate::strategy::{ReadmeMode, ReadmePolicy, StrategyRecord, Tier};

/// Substrings marking a line worth keeping from a partially quoted file.
///
/// Only `mid_focus` files are quoted through this filter. `keyword_only` files
/// are the largest ones and get the narrower [`declaration_lines`] instead, so
/// bodies (`return`, `self`, logging calls) are left out entirely.
pub const KEYWORDS: &[&str] = &[
    "def ", "return ", "class ", "self", "@", "from ", "logger", "fn ", "pub ", "impl ", "struct ",
    "import ", "function ",
];

/// Line prefixes (after indentation) that declare something.
const DECLARATION_PREFIXES: &[&str] = &[
    "def ", "async def ", "class ", "fn ", "pub fn ", "pub(crate) fn ", "async fn ",
    "pub async fn ", "struct ", "pub struct ", "enum ", "pub enum ", "trait ", "pub trait ",
    "impl ", "impl<", "mod ", "pub mod ", "function ", "export ", "interface ", "type ", "func ",
];

const MAX_DECLARATION_LINES: usize = 60;

/// Lines containing any of [`KEYWORDS`].
pub fn keyword_lines(text: &str) -> String {
    text.lines()
        .filter(|line| KEYWORDS.iter().any(|k| line.contains(k)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Declaration lines only, capped for very large files.
pub fn declaration_lines(text: &str) -> String {
    text.lines()
        .filter(|line| {
            let trimmed = line.trim_start();
            DECLARATION_PREFIXES.iter().any(|p| trimmed.starts_with(p))
        })
        .take(MAX_DECLARATION_LINES)
        .collect::<Vec<_>>()
        .join("\n")
}

/// The part of `text` quoted for a file of the given tier.
pub fn tier_content(text: &str, tier: Tier) -> String {
    match tier {
        Tier::FullPass => text.to_string(),
        Tier::MidFocus => keyword_lines(text),
        Tier::KeywordOnly => declaration_lines(text),
    }
}

/// From the first `# ` heading up to the next `## ` heading, or the first paragraph.
pub fn readme_summary(content: &str) -> String {
    let mut summary = Vec::new();
    let mut capture = false;
    for line in content.lines() {
        if line.starts_with("# ") {
            capture = true;
        } else if line.starts_with("## ") && capture {
            break;
        }
        if capture {
            summary.push(line);
        }
    }

    if summary.is_empty() {
        content.split("\n\n").next().unwrap_or_default().trim().to_string()
    } else {
        summary.join("\n").trim().to_string()
    }
}

/// Everything the generators put in front of the model for one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileContext {
    pub id: String,
    pub path: String,
    pub component_type: String,
    pub importance: u8,
    pub tier: Tier,
    pub main_content: String,
    pub commit_lines: String,
    pub related: String,
    pub folder_tree: String,
    pub readme: String,
}

/// Builds [`FileContext`]s for the files of one run.
///
/// The README is read once; file contents are read on demand and unreadable
/// files contribute empty text.
pub struct ContextBuilder<'a> {
    snapshot: &'a RepoSnapshot,
    files: HashMap<&'a str, &'a FileRecord>,
    readme: Option<String>,
}

impl<'a> ContextBuilder<'a> {
    pub fn new(snapshot: &'a RepoSnapshot, files: &'a [FileRecord]) -> Self {
        let readme = snapshot.readme_path.as_ref().and_then(|relative| {
            let path = snapshot.root.join(relative);
            match read_lossy(&path) {
                Ok(text) => Some(text),
                Err(e) => {
                    warn!("Could not read README {}: {}", path.display(), e);
                    None
                }
            }
        });

        Self {
            snapshot,
            files: files.iter().map(|f| (f.id.as_str(), f)).collect(),
            readme,
        }
    }

    /// README text quoted under `policy`; empty when excluded or unreadable.
    pub fn readme_excerpt(&self, policy: ReadmePolicy) -> String {
        if !policy.include {
            return String::new();
        }
        match (&self.readme, policy.mode) {
            (Some(text), ReadmeMode::Full) => text.clone(),
            (Some(text), ReadmeMode::Summary) => readme_summary(text),
            _ => String::new(),
        }
    }

    pub fn file(&self, id: &str) -> Option<&'a FileRecord> {
        self.files.get(id).copied()
    }

    pub fn build(&self, file: &FileRecord, strategy: &StrategyRecord) -> FileContext {
        let content = self.read_file(file);
        FileContext {
            id: file.id.clone(),
            path: file.path.clone(),
            component_type: strategy
                .component_type
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            importance: strategy.importance.unwrap_or(0),
            tier: strategy.tier,
            main_content: tier_content(&content, strategy.tier),
            commit_lines: file
                .subjects()
                .take(strategy.commit_window)
                .collect::<Vec<_>>()
                .join("\n"),
            related: self.related_section(strategy),
            folder_tree: self.snapshot.folder_tree.clone(),
            readme: self.readme_excerpt(strategy.readme),
        }
    }

    /// Keyword excerpt plus latest commit subject for each related file.
    fn related_section(&self, strategy: &StrategyRecord) -> String {
        let blocks: Vec<String> = strategy
            .related
            .iter()
            .filter_map(|id| {
                let Some(related) = self.file(id) else {
                    debug!("Related file {} has no metadata record", id);
                    return None;
                };
                let excerpt = keyword_lines(&self.read_file(related));
                let latest = related.subjects().next().unwrap_or_default();
                Some(format!("{}:\n{}\nLatest commit: {}\n", related.path, excerpt, latest))
            })
            .collect();

        if blocks.is_empty() {
            "no related files".to_string()
        } else {
            blocks.join("\n")
        }
    }

    fn read_file(&self, file: &FileRecord) -> String {
        read_or_empty(&file.absolute_path(&self.snapshot.root))
    }
}

fn read_or_empty(path: &Path) -> String {
    match read_lossy(path) {
        Ok(text) => text,
        Err(e) => {
            warn!("Could not read {}: {}; using empty content", path.display(), e);
            String::new()
        }
    }
}
