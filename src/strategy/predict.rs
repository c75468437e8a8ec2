//! Model-assisted strategy prediction.
//!
//! Files are batched into at most three chunks. Each chunk prompt asks for a
//! JSON array with one element per file, keyed by the file identifier.
//! Malformed elements are discarded; an unparseable response or an exhausted
//! provider chain aborts the run.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::artifact::ArtifactStore;
use crate::error::StrategyError;
use crate::llm::{LlmManager, PromptJob, SavePaths, unfenced_json};
use crate::snapshot::{FileRecord, RepoSnapshot};
use crate::strategy::StrategyRecord;

/// Hard upper bound on changed files per run.
pub const MAX_FILES: usize = 60;

const MAX_RELATED: usize = 3;

/// 3 chunks above 50 files, 2 above 20, otherwise 1.
pub fn chunk_count(files: usize) -> usize {
    if files > 50 {
        3
    } else if files > 20 {
        2
    } else {
        1
    }
}

/// Split `items` into `chunks` contiguous, roughly equal slices.
pub fn split_chunks<T>(items: &[T], chunks: usize) -> Vec<&[T]> {
    if items.is_empty() {
        return Vec::new();
    }
    let size = items.len().div_ceil(chunks.max(1));
    items.chunks(size).collect()
}

/// One validated element of a strategy response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StrategyPrediction {
    pub id: String,
    #[serde(default)]
    pub detail_level: Option<u8>,
    #[serde(default)]
    pub recommended_length: Option<u32>,
    pub component_type: String,
    pub importance: u8,
    pub related_files: Vec<String>,
}

/// Predict importance, component type and related files for every file.
///
/// Returns enriched copies of `strategies`; the input is left untouched so a
/// failed prediction never leaks partial state.
pub async fn predict_strategies(
    llm: &mut LlmManager,
    store: &ArtifactStore,
    snapshot: &RepoSnapshot,
    files: &[FileRecord],
    strategies: &[StrategyRecord],
) -> Result<Vec<StrategyRecord>, StrategyError> {
    if files.len() > MAX_FILES {
        return Err(StrategyError::TooManyFiles {
            count: files.len(),
            limit: MAX_FILES,
        });
    }

    let chunks = split_chunks(files, chunk_count(files.len()));
    info!("Predicting strategy for {} file(s) in {} chunk(s)", files.len(), chunks.len());

    let by_id: HashMap<&str, &StrategyRecord> =
        strategies.iter().map(|s| (s.id.as_str(), s)).collect();
    let mut jobs = Vec::with_capacity(chunks.len());
    for (idx, chunk) in chunks.iter().enumerate() {
        let tag = format!("chunk_{idx}");
        let (input, output) = store.strategy_chunk_paths(idx);
        llm.register(tag.clone(), SavePaths::new(input, output));
        jobs.push(PromptJob::new(tag, build_strategy_prompt(snapshot, chunk, files, &by_id)));
    }

    let known: HashSet<&str> = files.iter().map(|f| f.id.as_str()).collect();
    let mut predictions = Vec::new();
    for (idx, result) in llm.call_all(jobs).await.into_iter().enumerate() {
        let raw = result.map_err(StrategyError::ProvidersExhausted)?;
        for element in parse_response(&raw, idx)? {
            if let Some(prediction) = validate_element(element, &known) {
                predictions.push(prediction);
            }
        }
    }

    let mut enriched = strategies.to_vec();
    apply_predictions(&mut enriched, predictions, files);
    Ok(enriched)
}

fn build_strategy_prompt(
    snapshot: &RepoSnapshot,
    chunk: &[FileRecord],
    all_files: &[FileRecord],
    strategies: &HashMap<&str, &StrategyRecord>,
) -> String {
    let file_lines: Vec<String> = chunk
        .iter()
        .map(|file| {
            let strategy = strategies.get(file.id.as_str());
            let tier = strategy.map(|s| s.tier.as_str()).unwrap_or("unknown");
            let readme = strategy.map(|s| s.readme.mode.as_str()).unwrap_or("none");
            let commits: Vec<&str> = file.subjects().collect();
            format!(
                concat!(
                    "- id: {}\n  path: {}\n  file_tokens: {}\n  diff_tokens: {}\n",
                    "  tier: {}\n  readme: {}\n  siblings: {}\n  recent_commits: {}",
                ),
                file.id,
                file.path,
                file.file_tokens,
                file.diff_tokens,
                tier,
                readme,
                file.sibling_count,
                if commits.is_empty() { "(none)".to_string() } else { commits.join(" | ") }
            )
        })
        .collect();

    let all_ids: Vec<String> = all_files.iter().map(|f| format!("{} = {}", f.id, f.path)).collect();

    format!(
        r#"Assign a processing strategy to each changed file below.

Return ONLY a JSON array with exactly one element per listed file:
[
  {{
    "id": "<file id exactly as given>",
    "detail_level": <int 1-5>,
    "recommended_length": <int, suggested commit message length in tokens>,
    "component_type": "<short label for the file's role>",
    "importance": <int 0-10>,
    "related_files": ["<id of another changed file>", ...]
  }}
]

Rules:
- importance 0 means trivial, 10 means critical to the repository.
- related_files holds at most 3 ids taken from "All changed files", never the file itself.

Repository: {name}
Default branch: {default_branch}
Current branch: {current_branch}
Branches: {branches}
Diff stat:
{diff_stat}

Folder structure:
{tree}

All changed files:
{all_ids}

Files to classify:
{files}
"#,
        name = snapshot.name,
        default_branch = snapshot.default_branch,
        current_branch = snapshot.current_branch,
        branches = snapshot.branches.join(", "),
        diff_stat = snapshot.diff_stat,
        tree = snapshot.folder_tree,
        all_ids = all_ids.join("\n"),
        files = file_lines.join("\n"),
    )
}

/// Parse a chunk response into its array elements.
///
/// Only a surrounding code fence is removed. Anything else around the array
/// makes the response unparseable.
fn parse_response(raw: &str, chunk: usize) -> Result<Vec<Value>, StrategyError> {
    let json = unfenced_json(raw);
    let value: Value = serde_json::from_str(&json).map_err(|e| StrategyError::UnparseableResponse {
        chunk,
        reason: e.to_string(),
    })?;

    match value {
        Value::Array(items) => Ok(items),
        Value::Object(_) => Err(StrategyError::UnparseableResponse {
            chunk,
            reason: "expected a JSON array, got an object".to_string(),
        }),
        other => Err(StrategyError::UnparseableResponse {
            chunk,
            reason: format!("expected a JSON array, got {other}"),
        }),
    }
}

fn validate_element(element: Value, known: &HashSet<&str>) -> Option<StrategyPrediction> {
    let prediction: StrategyPrediction = match serde_json::from_value(element) {
        Ok(p) => p,
        Err(e) => {
            warn!("discarding strategy element: {}", e);
            return None;
        }
    };

    if !known.contains(prediction.id.as_str()) {
        warn!("discarding strategy element: unknown id '{}'", prediction.id);
        return None;
    }
    if prediction.importance > 10 {
        warn!(
            "discarding strategy element: importance {} for '{}' is out of range",
            prediction.importance, prediction.id
        );
        return None;
    }
    Some(prediction)
}

/// Merge predictions into `strategies` by id.
///
/// Related entries may be ids or paths of other changed files; anything
/// else, self references and duplicates are dropped, and at most three kept.
fn apply_predictions(
    strategies: &mut [StrategyRecord],
    predictions: Vec<StrategyPrediction>,
    files: &[FileRecord],
) {
    let mut resolve: HashMap<&str, &str> = HashMap::new();
    for file in files {
        resolve.insert(file.id.as_str(), file.id.as_str());
        resolve.insert(file.path.as_str(), file.id.as_str());
    }

    let mut by_id: HashMap<String, StrategyPrediction> = HashMap::new();
    for prediction in predictions {
        by_id.insert(prediction.id.clone(), prediction);
    }

    for strategy in strategies.iter_mut() {
        let Some(prediction) = by_id.remove(&strategy.id) else {
            continue;
        };

        let mut related: Vec<String> = Vec::new();
        for entry in &prediction.related_files {
            match resolve.get(entry.as_str()) {
                Some(id) if *id != strategy.id && !related.iter().any(|r| r == id) => {
                    related.push(id.to_string())
                }
                Some(_) => {}
                None => warn!("Dropping unknown related file '{}' for {}", entry, strategy.path),
            }
        }
        related.truncate(MAX_RELATED);

        strategy.detail_level = prediction.detail_level.map(|d| d.clamp(1, 5));
        strategy.recommended_length = prediction.recommended_length;
        strategy.component_type = Some(prediction.component_type);
        strategy.importance = Some(prediction.importance);
        strategy.related = related;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::file;
    use crate::strategy::{ReadmePolicy, initial_strategies};
    use chrono::Utc;

    #[test]
    fn chunk_count_thresholds() {
        assert_eq!(chunk_count(0), 1);
        assert_eq!(chunk_count(20), 1);
        assert_eq!(chunk_count(21), 2);
        assert_eq!(chunk_count(50), 2);
        assert_eq!(chunk_count(51), 3);
        assert_eq!(chunk_count(60), 3);
    }

    #[test]
    fn split_produces_requested_number_of_balanced_chunks() {
        for n in 1..=MAX_FILES {
            let items: Vec<usize> = (0..n).collect();
            let k = chunk_count(n);
            let chunks = split_chunks(&items, k);
            assert_eq!(chunks.len(), k, "n = {n}");
            let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
            let max = *sizes.iter().max().unwrap();
            let min = *sizes.iter().min().unwrap();
            assert!(max - min <= 2, "n = {n}: {sizes:?}");
            assert_eq!(sizes.iter().sum::<usize>(), n);
        }
    }

    #[test]
    fn parse_accepts_fenced_array() {
        let raw = "```json\n[{\"id\": \"x\"}]\n```";
        assert_eq!(parse_response(raw, 0).unwrap().len(), 1);
    }

    #[test]
    fn parse_rejects_prose_and_objects() {
        assert!(matches!(
            parse_response("I cannot help with that.", 1),
            Err(StrategyError::UnparseableResponse { chunk: 1, .. })
        ));
        assert!(matches!(
            parse_response("{\"files\": []}", 0),
            Err(StrategyError::UnparseableResponse { .. })
        ));
    }

    #[test]
    fn parse_rejects_brackets_inside_prose() {
        assert!(matches!(
            parse_response("I am unable to classify these files. Result: []", 0),
            Err(StrategyError::UnparseableResponse { chunk: 0, .. })
        ));
        assert!(matches!(
            parse_response("Scores follow [1] as requested.", 2),
            Err(StrategyError::UnparseableResponse { chunk: 2, .. })
        ));
    }

    #[test]
    fn parse_rejects_array_with_trailing_prose() {
        let raw = r#"[{"id": "fa", "importance": 4}] Let me know if you need more."#;
        assert!(matches!(
            parse_response(raw, 0),
            Err(StrategyError::UnparseableResponse { .. })
        ));
    }

    #[test]
    fn parse_accepts_bare_array_with_whitespace() {
        let raw = "\n  [{\"id\": \"fa\"}, {\"id\": \"fb\"}]\n";
        assert_eq!(parse_response(raw, 0).unwrap().len(), 2);
    }

    #[test]
    fn invalid_elements_are_discarded() {
        let known: HashSet<&str> = ["fa"].into_iter().collect();
        let element = |id: &str, importance: u8| {
            serde_json::json!({
                "id": id,
                "component_type": "parser",
                "importance": importance,
                "related_files": [],
            })
        };
        let good = element("fa", 7);
        let unknown = element("zz", 1);
        let missing = serde_json::json!({"id": "fa", "importance": 1});
        let out_of_range = element("fa", 11);

        assert!(validate_element(good, &known).is_some());
        assert!(validate_element(unknown, &known).is_none());
        assert!(validate_element(missing, &known).is_none());
        assert!(validate_element(out_of_range, &known).is_none());
    }

    #[test]
    fn related_files_are_resolved_filtered_and_capped() {
        let files = vec![
            file("a.py", 10, 1),
            file("b.py", 10, 1),
            file("c.py", 10, 1),
            file("d.py", 10, 1),
            file("e.py", 10, 1),
        ];
        let mut strategies = initial_strategies(&files, ReadmePolicy::default(), Utc::now());
        let prediction = StrategyPrediction {
            id: files[0].id.clone(),
            detail_level: Some(9),
            recommended_length: Some(250),
            component_type: "core".into(),
            importance: 8,
            related_files: vec![
                files[0].id.clone(),
                "b.py".into(),
                files[1].id.clone(),
                "ghost.py".into(),
                files[2].id.clone(),
                files[3].id.clone(),
                files[4].id.clone(),
            ],
        };

        apply_predictions(&mut strategies, vec![prediction], &files);
        let a = &strategies[0];
        assert_eq!(a.related, vec![files[1].id.clone(), files[2].id.clone(), files[3].id.clone()]);
        assert_eq!(a.importance, Some(8));
        assert_eq!(a.detail_level, Some(5));
        assert_eq!(a.recommended_length, Some(250));
        assert_eq!(a.component_type.as_deref(), Some("core"));
        assert!(strategies[1].importance.is_none());
    }

    #[test]
    fn prompt_lists_ids_and_commits() {
        let files = vec![file("src/a.py", 10, 1)];
        let strategies = initial_strategies(&files, ReadmePolicy::default(), Utc::now());
        let by_id: HashMap<&str, &StrategyRecord> =
            strategies.iter().map(|s| (s.id.as_str(), s)).collect();
        let snapshot = RepoSnapshot {
            name: "demo".into(),
            default_branch: "main".into(),
            current_branch: "main".into(),
            branches: vec!["main".into()],
            contributor_count: 1,
            root: std::path::PathBuf::from("/tmp/demo"),
            recent_commit_count: 0,
            extension_counts: Default::default(),
            changed_files: vec!["src/a.py".into()],
            diff_stat: " src/a.py | 1 +".into(),
            readme_tokens: None,
            readme_path: None,
            folder_tree: "0=src (1)\n[0]/a.py".into(),
        };

        let prompt = build_strategy_prompt(&snapshot, &files, &files, &by_id);
        assert!(prompt.contains(&format!("- id: {}", files[0].id)));
        assert!(prompt.contains("tier: full_pass"));
        assert!(prompt.contains("readme: none"));
        assert!(prompt.contains("recent_commits: (none)"));
        assert!(prompt.contains("[0]/a.py"));
    }
}
