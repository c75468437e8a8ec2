//! Deterministic per-file rules: processing tier, commit window, README policy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Largest file (tokens) sent in full.
pub const FULL_PASS_FILE_TOKENS: usize = 300;
/// Largest diff (tokens) allowed alongside a full-pass file.
pub const FULL_PASS_DIFF_TOKENS: usize = 200;
/// Largest file (tokens) that still gets keyword lines rather than declarations only.
pub const MID_FOCUS_FILE_TOKENS: usize = 800;
/// README size (tokens) up to which it is included verbatim.
pub const README_FULL_TOKENS: usize = 1000;

/// How much of a file's content goes into its prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    FullPass,
    MidFocus,
    KeywordOnly,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::FullPass => "full_pass",
            Tier::MidFocus => "mid_focus",
            Tier::KeywordOnly => "keyword_only",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tier for a file of `file_tokens` with a diff of `diff_tokens`.
pub fn classify_tier(file_tokens: usize, diff_tokens: usize) -> Tier {
    if file_tokens <= FULL_PASS_FILE_TOKENS && diff_tokens <= FULL_PASS_DIFF_TOKENS {
        Tier::FullPass
    } else if file_tokens <= MID_FOCUS_FILE_TOKENS {
        Tier::MidFocus
    } else {
        Tier::KeywordOnly
    }
}

/// Number of recent commit subjects to include for a file.
///
/// `dates` is newest first. The anchor is the third most recent date, the
/// oldest one when fewer than three exist, or `now` without history. An
/// anchor more than 10 days old yields 5, more than 5 days yields 4, else 3.
pub fn commit_window(dates: &[DateTime<Utc>], now: DateTime<Utc>) -> usize {
    let recent = &dates[..dates.len().min(5)];
    let anchor = match recent.len() {
        0 => now,
        1 | 2 => recent[recent.len() - 1],
        _ => recent[2],
    };

    let days = (now - anchor).num_days();
    if days > 10 {
        5
    } else if days > 5 {
        4
    } else {
        3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadmeMode {
    #[default]
    None,
    Full,
    Summary,
}

impl ReadmeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadmeMode::None => "none",
            ReadmeMode::Full => "full",
            ReadmeMode::Summary => "summary",
        }
    }
}

/// Whether and how the repository README is quoted in prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ReadmePolicy {
    pub include: bool,
    pub mode: ReadmeMode,
}

impl ReadmePolicy {
    /// Policy from the README token count (`None` when there is no README).
    pub fn from_tokens(readme_tokens: Option<usize>) -> Self {
        match readme_tokens {
            None => Self::default(),
            Some(tokens) if tokens <= README_FULL_TOKENS => Self {
                include: true,
                mode: ReadmeMode::Full,
            },
            Some(_) => Self {
                include: true,
                mode: ReadmeMode::Summary,
            },
        }
    }
}
