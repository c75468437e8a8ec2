//! Commit message per changed file.

use std::path::Path;

use tracing::{debug, info};

use crate::artifact;
use crate::generate::context::{ContextBuilder, FileContext};
use crate::generate::templates::{TemplateKind, TemplateSet};
use crate::generate::{GenerationOutcome, select_targets};
use crate::llm::{LlmManager, PromptJob, SavePaths, is_error_sentinel};
use crate::snapshot::{FileRecord, RepoSnapshot};
use crate::strategy::StrategyRecord;

/// The per-file section substituted into a commit template.
fn change_section(ctx: &FileContext, explanation: Option<&str>, diff: &str, style: &str) -> String {
    let mut section = String::new();
    if let Some(explanation) = explanation {
        section.push_str(&format!("Functional summary:\n{}\n\n", explanation.trim()));
    }
    section.push_str(&format!(
        r#"File: {path} ({component_type}, importance {importance})
Commit style: {style}

Folder structure:
{tree}

Main content of the changed file:
{main_content}

Related files:
{related}

Recent commit messages:
{commits}
"#,
        path = ctx.path,
        component_type = ctx.component_type,
        importance = ctx.importance,
        tree = ctx.folder_tree,
        main_content = ctx.main_content,
        related = ctx.related,
        commits = ctx.commit_lines,
    ));
    if !ctx.readme.is_empty() {
        section.push_str(&format!("\nREADME:\n{}\n", ctx.readme));
    }
    section.push_str(&format!("\nChanges (diff):\n{diff}\n"));
    section
}

pub fn build_message_prompt(
    ctx: &FileContext,
    explanation: Option<&str>,
    diff: &str,
    templates: &TemplateSet,
    kind: TemplateKind,
) -> String {
    templates.render(kind, &change_section(ctx, explanation, diff, templates.style()))
}

/// Generate a commit message for every file that warrants one.
///
/// Reads each file's explanation output (when the explain stage produced one)
/// and its persisted diff text.
pub async fn generate_commit_messages(
    llm: &mut LlmManager,
    snapshot: &RepoSnapshot,
    files: &[FileRecord],
    strategies: &[StrategyRecord],
    templates: &TemplateSet,
) -> GenerationOutcome {
    let builder = ContextBuilder::new(snapshot, files);
    let (targets, skipped) = select_targets(&builder, strategies);

    let mut jobs = Vec::with_capacity(targets.len());
    for (file, strategy) in &targets {
        let ctx = builder.build(file, strategy);
        let explanation = read_explanation(&file.save_paths.explain_out);
        let diff = read_optional(&file.save_paths.diff).unwrap_or_default();
        let kind = TemplateKind::select(strategy.recommended_length, strategy.importance);
        debug!("{} uses the {} template", file.path, kind.as_str());

        llm.register(
            file.id.clone(),
            SavePaths::new(&file.save_paths.message_in, &file.save_paths.message_out),
        );
        let prompt = build_message_prompt(&ctx, explanation.as_deref(), &diff, templates, kind);
        jobs.push(PromptJob::new(file.id.clone(), prompt));
    }

    info!("Writing commit messages for {} file(s), {} skipped", jobs.len(), skipped.len());
    let results = llm.call_all(jobs).await;
    GenerationOutcome::collect(&targets, results, skipped)
}

fn read_explanation(path: &Path) -> Option<String> {
    read_optional(path).filter(|text| !text.trim().is_empty() && !is_error_sentinel(text))
}

fn read_optional(path: &Path) -> Option<String> {
    match artifact::read_text(path) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!("{}", e);
            None
        }
    }
}
