//! Per-run artifact directory.
//!
//! Layout under `<results_dir>/<run_id>/`:
//!
//! ```text
//! df/repo.json, df/files.json, df/strategy.json, df/ledger_<stage>.json
//! diff/<id>.txt
//! strategy/in/chunk_<n>.txt, strategy/out/chunk_<n>.txt
//! explain/in/<id>.txt, explain/out/<id>.txt
//! mk_msg/in/<id>.txt, mk_msg/out/<id>.txt
//! manual_review.json, classified_result.json
//! ```
//!
//! Run ids are `YYMMDD_HHMM` timestamps. A run never reuses an existing
//! directory; a clashing timestamp gets a `-N` suffix.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::cost::CostLedger;
use crate::error::ArtifactError;
use crate::snapshot::{FileRecord, RepoSnapshot, SavePathBundle};
use crate::strategy::StrategyRecord;

pub const RUN_ID_FORMAT: &str = "%y%m%d_%H%M";

const REPO_FILE: &str = "df/repo.json";
const FILES_FILE: &str = "df/files.json";
const STRATEGY_FILE: &str = "df/strategy.json";
pub const MANUAL_REVIEW_FILE: &str = "manual_review.json";
pub const CLASSIFIED_RESULT_FILE: &str = "classified_result.json";

/// Subdirectories owned by individual stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactDir {
    Tables,
    Diff,
    StrategyIn,
    StrategyOut,
    ExplainIn,
    ExplainOut,
    MessageIn,
    MessageOut,
}

impl ArtifactDir {
    const ALL: [ArtifactDir; 8] = [
        ArtifactDir::Tables,
        ArtifactDir::Diff,
        ArtifactDir::StrategyIn,
        ArtifactDir::StrategyOut,
        ArtifactDir::ExplainIn,
        ArtifactDir::ExplainOut,
        ArtifactDir::MessageIn,
        ArtifactDir::MessageOut,
    ];

    pub fn relative(&self) -> &'static str {
        match self {
            ArtifactDir::Tables => "df",
            ArtifactDir::Diff => "diff",
            ArtifactDir::StrategyIn => "strategy/in",
            ArtifactDir::StrategyOut => "strategy/out",
            ArtifactDir::ExplainIn => "explain/in",
            ArtifactDir::ExplainOut => "explain/out",
            ArtifactDir::MessageIn => "mk_msg/in",
            ArtifactDir::MessageOut => "mk_msg/out",
        }
    }
}

/// Handle to one run's artifact directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    run_id: String,
}

impl ArtifactStore {
    /// Create a fresh run directory for the timestamp `now`.
    pub fn create(results_dir: &Path, now: NaiveDateTime) -> Result<Self, ArtifactError> {
        let base = now.format(RUN_ID_FORMAT).to_string();
        let mut run_id = base.clone();
        let mut suffix = 1;
        while results_dir.join(&run_id).exists() {
            run_id = format!("{base}-{suffix}");
            suffix += 1;
        }

        let store = Self {
            root: results_dir.join(&run_id),
            run_id,
        };
        store.ensure_layout()?;
        debug!("Created artifact directory {}", store.root.display());
        Ok(store)
    }

    /// Open an existing run directory.
    pub fn open(results_dir: &Path, run_id: &str) -> Result<Self, ArtifactError> {
        if !is_valid_run_id(run_id) {
            return Err(ArtifactError::InvalidRunId(run_id.to_string()));
        }
        let root = results_dir.join(run_id);
        if !root.is_dir() {
            return Err(ArtifactError::RunNotFound(root));
        }
        let store = Self {
            root,
            run_id: run_id.to_string(),
        };
        store.ensure_layout()?;
        Ok(store)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, dir: ArtifactDir) -> PathBuf {
        self.root.join(dir.relative())
    }

    fn ensure_layout(&self) -> Result<(), ArtifactError> {
        for dir in ArtifactDir::ALL {
            let path = self.dir(dir);
            fs::create_dir_all(&path).map_err(|source| ArtifactError::CreateDir { path, source })?;
        }
        Ok(())
    }

    /// The five per-file artifact paths for `id`.
    pub fn save_paths_for(&self, id: &str) -> SavePathBundle {
        let file = format!("{id}.txt");
        SavePathBundle {
            diff: self.dir(ArtifactDir::Diff).join(&file),
            explain_in: self.dir(ArtifactDir::ExplainIn).join(&file),
            explain_out: self.dir(ArtifactDir::ExplainOut).join(&file),
            message_in: self.dir(ArtifactDir::MessageIn).join(&file),
            message_out: self.dir(ArtifactDir::MessageOut).join(&file),
        }
    }

    /// Input and output paths for strategy chunk `index`.
    pub fn strategy_chunk_paths(&self, index: usize) -> (PathBuf, PathBuf) {
        let file = format!("chunk_{index}.txt");
        (
            self.dir(ArtifactDir::StrategyIn).join(&file),
            self.dir(ArtifactDir::StrategyOut).join(file),
        )
    }

    pub fn write_snapshot(&self, snapshot: &RepoSnapshot) -> Result<(), ArtifactError> {
        self.write_json(REPO_FILE, snapshot, "repository snapshot")
    }

    pub fn read_snapshot(&self) -> Result<RepoSnapshot, ArtifactError> {
        self.read_json(REPO_FILE)
    }

    pub fn write_files(&self, files: &[FileRecord]) -> Result<(), ArtifactError> {
        self.write_json(FILES_FILE, &files, "file records")
    }

    pub fn read_files(&self) -> Result<Vec<FileRecord>, ArtifactError> {
        self.read_json(FILES_FILE)
    }

    pub fn strategy_path(&self) -> PathBuf {
        self.root.join(STRATEGY_FILE)
    }

    pub fn write_strategies(&self, strategies: &[StrategyRecord]) -> Result<(), ArtifactError> {
        self.write_json(STRATEGY_FILE, &strategies, "strategy records")
    }

    pub fn read_strategies(&self) -> Result<Vec<StrategyRecord>, ArtifactError> {
        self.read_json(STRATEGY_FILE)
    }

    pub fn write_ledger(&self, stage: &str, ledger: &CostLedger) -> Result<(), ArtifactError> {
        self.write_json(&format!("df/ledger_{stage}.json"), ledger, "cost ledger")
    }

    /// Every stage ledger of the run merged together. Unreadable ledgers are skipped.
    pub fn read_ledgers(&self) -> CostLedger {
        let mut merged = CostLedger::new();
        let Ok(entries) = fs::read_dir(self.dir(ArtifactDir::Tables)) else {
            return merged;
        };
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("ledger_") && n.ends_with(".json"))
            })
            .collect();
        paths.sort();

        for path in paths {
            match read_json_file::<CostLedger>(&path) {
                Ok(ledger) => merged.merge(ledger),
                Err(e) => tracing::warn!("Skipping unreadable ledger: {}", e),
            }
        }
        merged
    }

    /// Serialize `value` to `<root>/<relative>` atomically.
    pub fn write_json<T: Serialize + ?Sized>(
        &self,
        relative: &str,
        value: &T,
        what: &'static str,
    ) -> Result<(), ArtifactError> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|source| ArtifactError::Serialize { what, source })?;
        write_text(&self.root.join(relative), &json)
    }

    pub fn read_json<T: DeserializeOwned>(&self, relative: &str) -> Result<T, ArtifactError> {
        read_json_file(&self.root.join(relative))
    }
}

/// Whether `run_id` looks like `YYMMDD_HHMM` with an optional `-N` suffix.
pub fn is_valid_run_id(run_id: &str) -> bool {
    let re = regex_lite::Regex::new(r"^\d{6}_\d{4}(-\d+)?$");
    re.is_ok_and(|re| re.is_match(run_id))
}

/// Write `contents` to `path` through a temporary file in the same directory.
pub fn write_text(path: &Path, contents: &str) -> Result<(), ArtifactError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(|source| ArtifactError::CreateDir {
        path: parent.to_path_buf(),
        source,
    })?;

    let write_err = |source| ArtifactError::Write {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

pub fn read_text(path: &Path) -> Result<String, ArtifactError> {
    fs::read_to_string(path).map_err(|source| ArtifactError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json_file<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let contents = read_text(path)?;
    serde_json::from_str(&contents).map_err(|source| ArtifactError::Deserialize {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn create_names_run_by_timestamp_and_builds_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), at(14, 5)).unwrap();
        assert_eq!(store.run_id(), "240309_1405");
        for sub in ["df", "diff", "explain/in", "explain/out", "mk_msg/in", "mk_msg/out"] {
            assert!(store.root().join(sub).is_dir(), "missing {sub}");
        }
    }

    #[test]
    fn clashing_timestamp_gets_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let first = ArtifactStore::create(dir.path(), at(9, 0)).unwrap();
        let second = ArtifactStore::create(dir.path(), at(9, 0)).unwrap();
        let third = ArtifactStore::create(dir.path(), at(9, 0)).unwrap();
        assert_eq!(first.run_id(), "240309_0900");
        assert_eq!(second.run_id(), "240309_0900-1");
        assert_eq!(third.run_id(), "240309_0900-2");
    }

    #[test]
    fn open_rejects_malformed_and_missing_runs() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ArtifactStore::open(dir.path(), "../etc"),
            Err(ArtifactError::InvalidRunId(_))
        ));
        let err = ArtifactStore::open(dir.path(), "240101_0000").unwrap_err();
        assert!(err.is_missing());
    }

    #[test]
    fn save_paths_are_keyed_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), at(1, 1)).unwrap();
        let paths = store.save_paths_for("fabc");
        assert!(paths.diff.ends_with("diff/fabc.txt"));
        assert!(paths.explain_out.ends_with("explain/out/fabc.txt"));
        assert!(paths.message_in.ends_with("mk_msg/in/fabc.txt"));
    }

    #[test]
    fn write_text_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.txt");
        write_text(&path, "one").unwrap();
        write_text(&path, "two").unwrap();
        assert_eq!(read_text(&path).unwrap(), "two");
        assert_eq!(fs::read_dir(path.parent().unwrap()).unwrap().count(), 1);
    }

    #[test]
    fn missing_table_is_reported_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), at(2, 2)).unwrap();
        assert!(store.read_files().unwrap_err().is_missing());
    }

    #[test]
    fn ledgers_from_all_stages_are_merged() {
        use crate::cost::{Direction, LedgerRow};

        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::create(dir.path(), at(3, 3)).unwrap();
        let row = |meta: &str| LedgerRow {
            direction: Direction::In,
            tag: "t".into(),
            meta: meta.into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
            tokens: 1,
            cost_usd: 0.1,
            cost_local: 140.0,
            save_path: PathBuf::new(),
            ok: true,
        };
        let mut explain = CostLedger::new();
        explain.push(row("explain:t"));
        let mut message = CostLedger::new();
        message.push(row("commit_message:t"));
        store.write_ledger("explain", &explain).unwrap();
        store.write_ledger("commit_message", &message).unwrap();
        fs::write(store.dir(ArtifactDir::Tables).join("ledger_broken.json"), "{").unwrap();

        let merged = store.read_ledgers();
        assert_eq!(merged.input.len(), 2);
        assert_eq!(merged.total_local(), 280.0);
    }
}
