//! Shared test utilities for integration tests.
//!
//! Not all functions are used by every test file, but they're shared across tests.
#![allow(dead_code)]

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;
use git2::{Oid, Repository, Signature};
use tracing_subscriber::fmt::MakeWriter;

use annalist::error::{GitError, ProviderError};
use annalist::git::SourceControl;
use annalist::llm::{ModelClient, Provider, ProviderRegistry, SamplingParams};
use annalist::publish::{DeliveryStatus, NotificationChannel};
use annalist::{ArtifactStore, Config, RunContext};

/// A test git repository with a separate results directory.
pub struct TestRepo {
    pub dir: tempfile::TempDir,
    pub out: tempfile::TempDir,
    pub repo: Repository,
}

impl TestRepo {
    /// Create a new empty git repository with a local identity.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp directory");
        let out = tempfile::tempdir().expect("Failed to create temp directory");
        let repo = Repository::init(dir.path()).expect("Failed to init git repo");
        {
            let mut config = repo.config().expect("Failed to open repo config");
            config.set_str("user.name", "Test User").unwrap();
            config.set_str("user.email", "test@example.com").unwrap();
            config.set_bool("commit.gpgsign", false).unwrap();
        }
        Self { dir, out, repo }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn results_dir(&self) -> PathBuf {
        self.out.path().join("results")
    }

    /// Write `contents` to the repository-relative `path`, creating parents.
    pub fn write(&self, path: &str, contents: &str) {
        let full = self.dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(full, contents).expect("Failed to write file");
    }

    /// Stage everything in the working tree and commit it. Returns the commit OID.
    pub fn commit_all(&self, message: &str) -> Oid {
        let sig =
            Signature::now("Test User", "test@example.com").expect("Failed to create signature");
        let mut index = self.repo.index().expect("Failed to get index");
        index
            .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
            .expect("Failed to add files");
        index.write().expect("Failed to write index");
        let tree_id = index.write_tree().expect("Failed to write tree");
        let tree = self.repo.find_tree(tree_id).expect("Failed to find tree");

        let parent = self.repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        let parents: Vec<&git2::Commit> = parent.iter().collect();

        self.repo
            .commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)
            .expect("Failed to create commit")
    }

    /// A fresh run directory under [`TestRepo::results_dir`].
    pub fn store(&self) -> ArtifactStore {
        let now = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(9, 0, 0).unwrap();
        ArtifactStore::create(&self.results_dir(), now).expect("Failed to create run directory")
    }

    /// A run context with a fixed exchange rate of 1300.
    pub fn context(&self) -> RunContext {
        RunContext::with_fixed_rate(self.store(), 1300.0)
    }
}

/// Default configuration with single attempts and no serial delay.
pub fn test_config(results_dir: &Path) -> Config {
    let mut config = Config::default();
    config.llm.serial_delay_ms = 0;
    config.llm.strategy.max_attempts = 1;
    config.llm.explain.max_attempts = 1;
    config.llm.commit_message.max_attempts = 1;
    config.results_dir = results_dir.to_path_buf();
    config
}

/// A recorded model call.
#[derive(Debug, Clone)]
pub struct Call {
    pub model: String,
    pub prompt: String,
}

type Responder = dyn Fn(&str, &str) -> Result<String, ProviderError> + Send + Sync;

/// A model client answering through a closure of `(model, prompt)`.
pub struct FakeModel {
    respond: Box<Responder>,
    calls: Mutex<Vec<Call>>,
}

impl FakeModel {
    pub fn new(
        respond: impl Fn(&str, &str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// A model that always fails with HTTP 503.
    pub fn failing() -> Arc<Self> {
        Self::new(|_, _| {
            Err(ProviderError::Status {
                status: 503,
                body: "unavailable".into(),
            })
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_containing(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.prompt.contains(needle)).count()
    }
}

#[async_trait]
impl ModelClient for FakeModel {
    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        _params: &SamplingParams,
    ) -> Result<String, ProviderError> {
        self.calls.lock().unwrap().push(Call {
            model: model.to_string(),
            prompt: prompt.to_string(),
        });
        (self.respond)(model, prompt)
    }
}

/// Registry serving both providers from the given clients.
pub fn registry(openai: Arc<FakeModel>, fireworks: Arc<FakeModel>) -> ProviderRegistry {
    ProviderRegistry::new()
        .with_client(Provider::OpenAi, openai)
        .with_client(Provider::Fireworks, fireworks)
}

pub const STRATEGY_MARKER: &str = "Assign a processing strategy";
pub const EXPLAIN_MARKER: &str = "Summarize the main functionality";
pub const MESSAGE_MARKER: &str = "Git commit message";

/// `(id, path)` pairs listed under "Files to classify" in a strategy prompt.
pub fn strategy_prompt_files(prompt: &str) -> Vec<(String, String)> {
    let mut files = Vec::new();
    let mut lines = prompt.lines();
    while let Some(line) = lines.next() {
        if let Some(id) = line.strip_prefix("- id: ") {
            let path = lines
                .next()
                .and_then(|l| l.trim().strip_prefix("path: "))
                .unwrap_or_default();
            files.push((id.trim().to_string(), path.to_string()));
        }
    }
    files
}

/// A strategy response rating each file with `importance(path)`.
pub fn strategy_response(prompt: &str, importance: impl Fn(&str) -> u8) -> String {
    let elements: Vec<serde_json::Value> = strategy_prompt_files(prompt)
        .into_iter()
        .map(|(id, path)| {
            serde_json::json!({
                "id": id,
                "detail_level": 3,
                "recommended_length": 100,
                "component_type": "module",
                "importance": importance(&path),
                "related_files": [],
            })
        })
        .collect();
    serde_json::Value::Array(elements).to_string()
}

/// The path named on the prompt's `File:` line.
pub fn prompt_path(prompt: &str) -> Option<String> {
    prompt.lines().find_map(|line| {
        let rest = line.strip_prefix("File: ")?;
        Some(rest.split(" (").next().unwrap_or(rest).trim().to_string())
    })
}

/// A model that answers strategy, explanation and commit-message prompts.
pub fn scripted_model(importance: fn(&str) -> u8) -> Arc<FakeModel> {
    FakeModel::new(move |_, prompt| {
        if prompt.contains(STRATEGY_MARKER) {
            return Ok(strategy_response(prompt, importance));
        }
        let path = prompt_path(prompt).unwrap_or_else(|| "unknown".to_string());
        if prompt.contains(EXPLAIN_MARKER) {
            Ok(format!("{path} handles its part of the program."))
        } else if prompt.contains(MESSAGE_MARKER) {
            Ok(format!("feat: update {path}"))
        } else {
            Err(ProviderError::MalformedResponse(format!("unexpected prompt: {prompt}")))
        }
    })
}

/// Source control that records commits instead of running git.
#[derive(Default)]
pub struct RecordingScm {
    pub commits: Mutex<Vec<(String, String)>>,
    pub pushes: AtomicUsize,
}

impl RecordingScm {
    pub fn commits(&self) -> Vec<(String, String)> {
        self.commits.lock().unwrap().clone()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

impl SourceControl for RecordingScm {
    fn commit_path(&self, path: &str, message: &str) -> Result<(), GitError> {
        self.commits.lock().unwrap().push((path.to_string(), message.to_string()));
        Ok(())
    }

    fn push(&self) -> Result<(), GitError> {
        self.pushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remote_reachable(&self, _remote: &str) -> Result<(), GitError> {
        Ok(())
    }
}

/// A notification channel that keeps every message it is sent.
pub struct RecordingChannel {
    name: String,
    accept: bool,
    pub messages: Mutex<Vec<(String, DeliveryStatus)>>,
}

impl RecordingChannel {
    pub fn new(name: &str, accept: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            accept,
            messages: Mutex::new(Vec::new()),
        })
    }

    pub fn messages(&self) -> Vec<(String, DeliveryStatus)> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: &str, status: DeliveryStatus) -> bool {
        self.messages.lock().unwrap().push((message.to_string(), status));
        self.accept
    }

    async fn ping(&self) -> bool {
        self.accept
    }
}

/// Captures formatted log output of the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    /// Install a capturing subscriber until the guard is dropped.
    pub fn install() -> (Self, tracing::subscriber::DefaultGuard) {
        let capture = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(capture.clone())
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

pub struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogCapture {
    type Writer = CaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CaptureWriter(self.0.clone())
    }
}
