//! Commit-message prompt templates.
//!
//! Templates carry a `{change}` placeholder that receives the per-file change
//! section. Built-in templates exist for every language and kind; a template
//! directory may override any of them with `<language>/<kind>.txt`.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::config::{Language, PromptConfig};
use crate::snapshot::metadata::read_lossy;

/// Placeholder replaced by the change section.
pub const CHANGE_PLACEHOLDER: &str = "{change}";

const DETAILED_LENGTH: u32 = 500;
const DETAILED_IMPORTANCE: u8 = 8;
const STANDARD_LENGTH: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    Brief,
    Standard,
    Detailed,
}

impl TemplateKind {
    /// Template for a file's recommended message length and importance.
    pub fn select(recommended_length: Option<u32>, importance: Option<u8>) -> Self {
        let length = recommended_length.unwrap_or(0);
        if length >= DETAILED_LENGTH || importance.is_some_and(|i| i >= DETAILED_IMPORTANCE) {
            TemplateKind::Detailed
        } else if length >= STANDARD_LENGTH {
            TemplateKind::Standard
        } else {
            TemplateKind::Brief
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateKind::Brief => "brief",
            TemplateKind::Standard => "standard",
            TemplateKind::Detailed => "detailed",
        }
    }
}

/// Template lookup for one language, with optional on-disk overrides.
#[derive(Debug, Clone)]
pub struct TemplateSet {
    language: Language,
    style: String,
    dir: Option<PathBuf>,
}

impl TemplateSet {
    pub fn from_config(config: &PromptConfig) -> Self {
        Self {
            language: config.language,
            style: config.style.clone(),
            dir: config.template_dir.clone(),
        }
    }

    pub fn style(&self) -> &str {
        &self.style
    }

    /// Override text when present and readable, otherwise the built-in template.
    pub fn load(&self, kind: TemplateKind) -> String {
        if let Some(dir) = &self.dir {
            let path = dir
                .join(self.language.as_str())
                .join(format!("{}.txt", kind.as_str()));
            if path.is_file() {
                match read_lossy(&path) {
                    Ok(text) => {
                        debug!("Using template override {}", path.display());
                        return text;
                    }
                    Err(e) => {
                        warn!("Could not read template {}: {}; using built-in", path.display(), e)
                    }
                }
            }
        }
        builtin(self.language, kind).to_string()
    }

    pub fn render(&self, kind: TemplateKind, change: &str) -> String {
        render(&self.load(kind), change)
    }
}

/// Substitute `change` into `template`; appended when the placeholder is absent.
pub fn render(template: &str, change: &str) -> String {
    if template.contains(CHANGE_PLACEHOLDER) {
        template.replace(CHANGE_PLACEHOLDER, change).trim().to_string()
    } else {
        format!("{}\n\n{}", template.trim_end(), change).trim().to_string()
    }
}

pub fn builtin(language: Language, kind: TemplateKind) -> &'static str {
    match (language, kind) {
        (Language::En, TemplateKind::Brief) => EN_BRIEF,
        (Language::En, TemplateKind::Standard) => EN_STANDARD,
        (Language::En, TemplateKind::Detailed) => EN_DETAILED,
        (Language::Ko, TemplateKind::Brief) => KO_BRIEF,
        (Language::Ko, TemplateKind::Standard) => KO_STANDARD,
        (Language::Ko, TemplateKind::Detailed) => KO_DETAILED,
    }
}

const EN_BRIEF: &str = r#"Write a one-line Git commit message for the change below.
- Format: `type(scope): description`, at most 50 characters
- Imperative mood, no trailing period
- Output only the commit message

{change}"#;

const EN_STANDARD: &str = r#"Write a Git commit message for the change below.
- Subject: `type(scope): description`, at most 50 characters, imperative mood
- Body: 2-4 lines wrapped at 72 characters explaining why the change was made
- Output only the commit message

{change}"#;

const EN_DETAILED: &str = r#"Write a detailed Git commit message for the change below.
- Subject: `type(scope): description`, at most 50 characters, imperative mood
- Body: explain the motivation, the previous behavior and the effect of the change
- List notable sub-changes as `- ` bullets, wrapped at 72 characters
- Mention follow-up risks or migration notes when the change needs them
- Output only the commit message

{change}"#;

const KO_BRIEF: &str = r#"아래 변경 사항에 대한 한 줄 Git 커밋 메시지를 작성해주세요.
- 형식: `type(scope): 설명`, 50자 이내
- 마침표 없이 작성
- 커밋 메시지만 출력

{change}"#;

const KO_STANDARD: &str = r#"아래 변경 사항에 대한 Git 커밋 메시지를 작성해주세요.
- 제목: `type(scope): 설명`, 50자 이내
- 본문: 변경 이유를 2~4줄로 설명 (72자 줄바꿈)
- 커밋 메시지만 출력

{change}"#;

const KO_DETAILED: &str = r#"아래 변경 사항에 대한 상세한 Git 커밋 메시지를 작성해주세요.
- 제목: `type(scope): 설명`, 50자 이내
- 본문: 변경 동기, 이전 동작, 변경 효과를 설명
- 주요 세부 변경은 `- ` 목록으로 정리 (72자 줄바꿈)
- 필요한 경우 후속 위험이나 마이그레이션 참고 사항 포함
- 커밋 메시지만 출력

{change}"#;
