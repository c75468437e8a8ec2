//! Rules that must hold for every input, checked over generated inputs.

mod common;

use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{Duration, TimeZone, Utc};

use annalist::config::LlmStage;
use annalist::llm::{LlmManager, PromptJob};
use annalist::pipeline::Stage;
use annalist::snapshot::{SavePathBundle, file_id, pad_subjects};
use annalist::strategy::{
    MAX_FILES, ReadmePolicy, Tier, chunk_count, classify_tier, commit_window, initial_strategies,
    predict_strategies, split_chunks,
};
use annalist::{ArtifactStore, FileRecord, RepoSnapshot, StrategyError};

use common::{FakeModel, STRATEGY_MARKER, TestRepo, registry, strategy_prompt_files, test_config};

#[test]
fn tier_only_loosens_as_sizes_shrink() {
    fn rank(tier: Tier) -> u8 {
        match tier {
            Tier::FullPass => 0,
            Tier::MidFocus => 1,
            Tier::KeywordOnly => 2,
        }
    }

    for file_tokens in (0..=1200).step_by(25) {
        for diff_tokens in (0..=600).step_by(25) {
            let tier = classify_tier(file_tokens, diff_tokens);
            assert_eq!(tier, classify_tier(file_tokens, diff_tokens));
            if file_tokens >= 25 {
                assert!(rank(classify_tier(file_tokens - 25, diff_tokens)) <= rank(tier));
            }
            if diff_tokens >= 25 {
                assert!(rank(classify_tier(file_tokens, diff_tokens - 25)) <= rank(tier));
            }
        }
    }
}

#[test]
fn commit_window_is_always_between_three_and_five() {
    let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
    for len in 0..=7 {
        for step_days in [0, 1, 2, 3, 6, 11, 40] {
            let dates: Vec<_> = (0..len).map(|i| now - Duration::days(i * step_days)).collect();
            let window = commit_window(&dates, now);
            assert!((3..=5).contains(&window), "len {len}, step {step_days}: {window}");
        }
    }
}

#[test]
fn chunks_cover_every_file_exactly_once() {
    for files in 1..=60usize {
        let items: Vec<usize> = (0..files).collect();
        let chunks = split_chunks(&items, chunk_count(files));
        assert!(chunks.len() <= 3);
        let flattened: Vec<usize> = chunks.concat();
        assert_eq!(flattened, items);
    }
}

#[test]
fn file_ids_are_stable_and_distinct() {
    let paths: Vec<String> = (0..200)
        .flat_map(|i| [format!("src/mod{i}.rs"), format!("tests/mod{i}.rs")])
        .collect();
    let ids: HashSet<String> = paths.iter().map(|p| file_id(p)).collect();
    assert_eq!(ids.len(), paths.len());
    for path in &paths {
        let id = file_id(path);
        assert_eq!(id, file_id(path));
        assert_eq!(id.len(), 13);
        assert!(id.starts_with('f'));
    }
}

#[tokio::test]
async fn related_files_are_valid_distinct_and_capped() {
    let repo = TestRepo::new();
    for name in ["a", "b", "c", "d", "e"] {
        repo.write(&format!("pkg/{name}.py"), "x = 1\n");
    }
    repo.commit_all("feat: package");
    for name in ["a", "b", "c", "d", "e"] {
        repo.write(&format!("pkg/{name}.py"), "x = 2\n");
    }

    let ctx = repo.context();
    let config = test_config(&repo.results_dir());
    let noop = FakeModel::failing();
    annalist::Pipeline::new(config.clone(), repo.path(), registry(noop.clone(), noop))
        .run_stage(Stage::Extract, &ctx)
        .await
        .unwrap();
    let snapshot = ctx.store().read_snapshot().unwrap();
    let files = ctx.store().read_files().unwrap();

    // Every element names itself, an unknown id, a duplicate and every other file.
    let model = FakeModel::new(|_, prompt| {
        assert!(prompt.contains(STRATEGY_MARKER));
        let listed = strategy_prompt_files(prompt);
        let all: Vec<String> = listed.iter().map(|(id, _)| id.clone()).collect();
        let elements: Vec<serde_json::Value> = listed
            .iter()
            .map(|(id, _)| {
                let mut related = vec![id.clone(), "f000000000000".to_string()];
                related.extend(all.iter().cloned());
                related.extend(all.iter().cloned());
                serde_json::json!({
                    "id": id,
                    "component_type": "module",
                    "importance": 5,
                    "related_files": related,
                })
            })
            .collect();
        Ok(serde_json::Value::Array(elements).to_string())
    });
    let mut llm = LlmManager::new(
        LlmStage::Strategy,
        &config,
        registry(model.clone(), model),
        1300.0,
        ctx.store().root(),
    );
    let readme = ReadmePolicy::from_tokens(snapshot.readme_tokens);
    let initial = initial_strategies(&files, readme, Utc::now());

    let predicted = predict_strategies(&mut llm, ctx.store(), &snapshot, &files, &initial)
        .await
        .unwrap();

    let known: HashSet<&str> = files.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(predicted.len(), files.len());
    for record in &predicted {
        assert!(record.related.len() <= 3, "{:?}", record.related);
        let distinct: HashSet<&String> = record.related.iter().collect();
        assert_eq!(distinct.len(), record.related.len());
        assert!(!record.related.contains(&record.id));
        assert!(record.related.iter().all(|r| known.contains(r.as_str())));
        assert_eq!(record.importance, Some(5));
    }
}

#[tokio::test]
async fn call_all_results_follow_job_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.llm.concurrency = 4;
    let model = FakeModel::new(|_, prompt| Ok(format!("answer to {prompt}")));
    let mut llm = LlmManager::new(
        LlmStage::Explain,
        &config,
        registry(model.clone(), model.clone()),
        1300.0,
        dir.path(),
    );

    let jobs: Vec<PromptJob> = (0..12)
        .map(|i| PromptJob::new(format!("job{i}"), format!("prompt {i}")))
        .collect();
    let results = llm.call_all(jobs).await;

    let answers: Vec<String> = results.into_iter().map(Result::unwrap).collect();
    let expected: Vec<String> = (0..12).map(|i| format!("answer to prompt {i}")).collect();
    assert_eq!(answers, expected);
    assert_eq!(model.calls().len(), 12);
    assert!(dir.path().join("out_job11.txt").exists());
}

fn record(path: &str) -> FileRecord {
    FileRecord {
        id: file_id(path),
        file_name: path.rsplit('/').next().unwrap_or(path).to_string(),
        path: path.to_string(),
        file_tokens: 10,
        diff_tokens: 2,
        sibling_count: 0,
        recent_subjects: pad_subjects(Vec::new()),
        recent_dates: Vec::new(),
        save_paths: SavePathBundle {
            diff: PathBuf::from("diff"),
            explain_in: PathBuf::from("explain_in"),
            explain_out: PathBuf::from("explain_out"),
            message_in: PathBuf::from("message_in"),
            message_out: PathBuf::from("message_out"),
        },
    }
}

fn snapshot_of(files: &[FileRecord]) -> RepoSnapshot {
    RepoSnapshot {
        name: "demo".to_string(),
        default_branch: "main".to_string(),
        current_branch: "main".to_string(),
        branches: vec!["main".to_string()],
        contributor_count: 1,
        root: PathBuf::from("/tmp/demo"),
        recent_commit_count: 0,
        extension_counts: Default::default(),
        changed_files: files.iter().map(|f| f.path.clone()).collect(),
        diff_stat: String::new(),
        readme_tokens: None,
        readme_path: None,
        folder_tree: String::new(),
    }
}

#[tokio::test]
async fn file_count_above_the_limit_is_refused_without_calling_a_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let store = ArtifactStore::create(dir.path(), Utc::now().naive_utc()).unwrap();
    let model = FakeModel::new(|_, _| Ok("[]".to_string()));
    let mut llm = LlmManager::new(
        LlmStage::Strategy,
        &config,
        registry(model.clone(), model.clone()),
        1300.0,
        store.root(),
    );

    for count in [MAX_FILES, MAX_FILES + 1] {
        let files: Vec<FileRecord> =
            (0..count).map(|i| record(&format!("pkg/mod{i}.py"))).collect();
        let initial = initial_strategies(&files, ReadmePolicy::default(), Utc::now());
        let snapshot = snapshot_of(&files);
        let result = predict_strategies(&mut llm, &store, &snapshot, &files, &initial).await;

        if count == MAX_FILES {
            assert_eq!(result.unwrap().len(), MAX_FILES);
            assert_eq!(model.calls().len(), 3);
        } else {
            assert!(matches!(
                result,
                Err(StrategyError::TooManyFiles { count: 61, limit: 60 })
            ));
            assert_eq!(model.calls().len(), 3, "no call is made for 61 files");
        }
    }
}
