//! Functional explanation per changed file.

use tracing::info;

use crate::config::Language;
use crate::generate::context::{ContextBuilder, FileContext};
use crate::generate::{GenerationOutcome, select_targets};
use crate::llm::{LlmManager, PromptJob, SavePaths};
use crate::snapshot::{FileRecord, RepoSnapshot};
use crate::strategy::StrategyRecord;

/// Target explanation length requested from the model.
pub const EXPLANATION_TOKENS: usize = 300;

pub fn build_explain_prompt(ctx: &FileContext, language: Language) -> String {
    let language_rule = match language {
        Language::En => "Write the summary in English.",
        Language::Ko => "반드시 한국어로 작성해주세요.",
    };

    format!(
        r#"Summarize the main functionality and logic of the file below in about {tokens} tokens.
Describe its role in the overall repository structure and how it connects to related files.

File: {path}
Component type: {component_type}
Importance: {importance}

Main content:
{main_content}

Recent commit messages:
{commits}

Related files:
{related}

Folder structure:
{tree}

README:
{readme}

{language_rule}"#,
        tokens = EXPLANATION_TOKENS,
        path = ctx.path,
        component_type = ctx.component_type,
        importance = ctx.importance,
        main_content = ctx.main_content,
        commits = ctx.commit_lines,
        related = ctx.related,
        tree = ctx.folder_tree,
        readme = ctx.readme,
    )
}

/// Explain every file that warrants generation; outputs land in each file's explain paths.
pub async fn generate_explanations(
    llm: &mut LlmManager,
    snapshot: &RepoSnapshot,
    files: &[FileRecord],
    strategies: &[StrategyRecord],
    language: Language,
) -> GenerationOutcome {
    let builder = ContextBuilder::new(snapshot, files);
    let (targets, skipped) = select_targets(&builder, strategies);

    let mut jobs = Vec::with_capacity(targets.len());
    for (file, strategy) in &targets {
        let ctx = builder.build(file, strategy);
        llm.register(
            file.id.clone(),
            SavePaths::new(&file.save_paths.explain_in, &file.save_paths.explain_out),
        );
        jobs.push(PromptJob::new(file.id.clone(), build_explain_prompt(&ctx, language)));
    }

    info!("Explaining {} file(s), {} skipped", jobs.len(), skipped.len());
    let results = llm.call_all(jobs).await;
    GenerationOutcome::collect(&targets, results, skipped)
}
