//! Publisher: per-file commits, then notification and record fan-out.
//!
//! Every destination is isolated. A failed commit moves its file to the
//! failed list, a failed channel is reported in the record body, and a failed
//! record upload is logged; none of them stops the rest of the batch.

pub mod notify;
pub mod record;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::git::SourceControl;
use crate::report::ClassifiedResult;
use crate::snapshot::FileRecord;

pub use notify::{DeliveryStatus, NotificationChannel, WebhookChannel, channels_from_config};
pub use record::{NotionRecord, RecordChannel};

/// Commit message used when no generated message exists for a file.
pub fn fallback_message(path: &str) -> String {
    format!("chore(auto): {path} changes (no generated message)")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    pub push: bool,
    pub notify: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            push: true,
            notify: true,
        }
    }
}

/// Per-file commit results plus channel delivery results, by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    pub success: Vec<String>,
    pub fallback: Vec<String>,
    pub failed: Vec<String>,
    pub failed_channels: Vec<String>,
    pub record_uploaded: bool,
}

impl PublishOutcome {
    pub fn status(&self) -> DeliveryStatus {
        if self.failed.is_empty() {
            DeliveryStatus::Success
        } else {
            DeliveryStatus::Failure
        }
    }
}

pub struct Publisher {
    scm: Arc<dyn SourceControl>,
    channels: Vec<Arc<dyn NotificationChannel>>,
    record: Option<Arc<dyn RecordChannel>>,
}

impl Publisher {
    pub fn new(
        scm: Arc<dyn SourceControl>,
        channels: Vec<Arc<dyn NotificationChannel>>,
        record: Option<Arc<dyn RecordChannel>>,
    ) -> Self {
        Self { scm, channels, record }
    }

    /// Commit every file, then notify and record the run.
    pub async fn publish(
        &self,
        files: &[FileRecord],
        result: &ClassifiedResult,
        options: PublishOptions,
    ) -> PublishOutcome {
        let mut outcome = self.commit_files(files, result, options.push);
        info!(
            "Commits: {} succeeded, {} used the fallback message, {} failed",
            outcome.success.len(),
            outcome.fallback.len(),
            outcome.failed.len()
        );

        if !options.notify {
            info!("Notifications disabled; skipping channels and record upload");
            return outcome;
        }

        let text = notification_text(result, &outcome);
        let status = outcome.status();
        for channel in &self.channels {
            if !channel.send(&text, status).await {
                warn!("Channel {} did not accept the notification", channel.name());
                outcome.failed_channels.push(channel.name().to_string());
            }
        }

        if let Some(record) = &self.record {
            let title = format!("annalist run {}", result.run_id);
            let body = record_body(&text, result, &outcome.failed_channels);
            match record.upload(&title, &body).await {
                Ok(()) => outcome.record_uploaded = true,
                Err(e) => error!("Record upload to {} failed: {}", record.name(), e),
            }
        }

        outcome
    }

    /// Commit each file on its own with its generated or fallback message.
    pub fn commit_files(
        &self,
        files: &[FileRecord],
        result: &ClassifiedResult,
        push: bool,
    ) -> PublishOutcome {
        let mut outcome = PublishOutcome::default();

        for file in files {
            let (message, generated) = match result.commit_for(&file.id) {
                Some(message) => (message.to_string(), true),
                None => (fallback_message(&file.path), false),
            };

            let committed = self.scm.commit_path(&file.path, &message).and_then(|()| {
                if push { self.scm.push() } else { Ok(()) }
            });

            match committed {
                Ok(()) if generated => outcome.success.push(file.path.clone()),
                Ok(()) => {
                    warn!("Committed {} with the fallback message", file.path);
                    outcome.fallback.push(file.path.clone());
                }
                Err(e) => {
                    error!("Publishing {} failed: {}", file.path, e);
                    outcome.failed.push(file.path.clone());
                }
            }
        }

        outcome
    }
}

/// The message sent to every notification channel.
pub fn notification_text(result: &ClassifiedResult, outcome: &PublishOutcome) -> String {
    let notify = &result.notify;
    let mut lines = vec![
        format!(
            "annalist run {}: {} committed, {} fallback, {} failed",
            result.run_id,
            outcome.success.len(),
            outcome.fallback.len(),
            outcome.failed.len()
        ),
        notify.summary.clone(),
    ];

    if !notify.commits.is_empty() {
        lines.push(String::new());
        lines.extend(notify.commits.iter().cloned());
    }

    lines.push(String::new());
    lines.push(format!("Cost: {}", notify.cost_line()));
    if !notify.cost_breakdown.is_empty() {
        lines.push(format!("By stage: {}", notify.breakdown_line()));
    }
    if !outcome.failed.is_empty() {
        lines.push(format!("Failed: {}", outcome.failed.join(", ")));
    }
    if !outcome.fallback.is_empty() {
        lines.push(format!("Fallback: {}", outcome.fallback.join(", ")));
    }
    if !notify.review_files.is_empty() {
        let review: Vec<String> = notify
            .review_files
            .iter()
            .map(|r| format!("{} ({})", r.path, r.importance))
            .collect();
        lines.push(format!("Manual review: {}", review.join(", ")));
    }

    lines.join("\n")
}

fn record_body(text: &str, result: &ClassifiedResult, failed_channels: &[String]) -> String {
    let mut body = text.to_string();
    if !failed_channels.is_empty() {
        body.push_str(&format!("\nFailed channels: {}", failed_channels.join(", ")));
    }
    for explanation in &result.explanations {
        body.push_str(&format!("\n\nFILE: {}\n{}", explanation.path, explanation.text.trim()));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::error::{GitError, RecordError};
    use crate::git::publish::MockSourceControl;
    use crate::report::{GeneratedText, NotifyPayload};
    use crate::snapshot::{SavePathBundle, file_id, pad_subjects};
    use crate::strategy::ManualReviewEntry;

    fn file(path: &str) -> FileRecord {
        FileRecord {
            id: file_id(path),
            file_name: path.to_string(),
            path: path.to_string(),
            file_tokens: 1,
            diff_tokens: 1,
            sibling_count: 0,
            recent_subjects: pad_subjects(Vec::new()),
            recent_dates: Vec::new(),
            save_paths: SavePathBundle {
                diff: "d".into(),
                explain_in: "ei".into(),
                explain_out: "eo".into(),
                message_in: "mi".into(),
                message_out: "mo".into(),
            },
        }
    }

    fn result_with_commit(files: &[FileRecord]) -> ClassifiedResult {
        ClassifiedResult {
            run_id: "240501_0930".into(),
            commits: vec![GeneratedText {
                id: files[0].id.clone(),
                path: files[0].path.clone(),
                text: "feat: add a".into(),
            }],
            explanations: vec![GeneratedText {
                id: files[0].id.clone(),
                path: files[0].path.clone(),
                text: "A does things.".into(),
            }],
            notify: NotifyPayload {
                summary: "1 of 3 file(s) got a commit message".into(),
                total_files: 3,
                commits: vec!["feat: add a".into()],
                currency: "KRW".into(),
                cost_total_usd: 0.01,
                cost_total_local: 14.0,
                cost_breakdown: [("explain".to_string(), 14.0)].into_iter().collect(),
                review_files: vec![ManualReviewEntry {
                    id: files[0].id.clone(),
                    path: "a.py".into(),
                    importance: 9,
                }],
            },
        }
    }

    struct RecordingChannel {
        name: &'static str,
        accept: bool,
        sent: Mutex<Vec<(String, DeliveryStatus)>>,
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            self.name
        }

        async fn send(&self, message: &str, status: DeliveryStatus) -> bool {
            self.sent.lock().unwrap().push((message.to_string(), status));
            self.accept
        }

        async fn ping(&self) -> bool {
            self.accept
        }
    }

    struct RecordingRecord {
        uploads: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RecordChannel for RecordingRecord {
        fn name(&self) -> &str {
            "recording"
        }

        async fn upload(&self, title: &str, body: &str) -> Result<(), RecordError> {
            self.uploads.lock().unwrap().push((title.to_string(), body.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn groups_success_fallback_and_failure_and_isolates_channels() {
        let files = vec![file("a.py"), file("b.py"), file("c.py")];
        let result = result_with_commit(&files);

        let mut scm = MockSourceControl::new();
        scm.expect_commit_path()
            .withf(|path, message| {
                path.to_string() == "a.py" && message.to_string() == "feat: add a"
            })
            .returning(|_, _| Ok(()));
        scm.expect_commit_path()
            .withf(|path, message| {
                path.to_string() == "b.py" && message.to_string() == fallback_message("b.py")
            })
            .returning(|_, _| Ok(()));
        scm.expect_commit_path()
            .withf(|path, _| path.to_string() == "c.py")
            .returning(|_, _| {
                Err(GitError::CommandFailed {
                    operation: "commit".into(),
                    stderr: "nothing to commit".into(),
                })
            });
        scm.expect_push().times(2).returning(|| Ok(()));

        let broken = Arc::new(RecordingChannel {
            name: "broken",
            accept: false,
            sent: Mutex::new(Vec::new()),
        });
        let working = Arc::new(RecordingChannel {
            name: "working",
            accept: true,
            sent: Mutex::new(Vec::new()),
        });
        let record = Arc::new(RecordingRecord {
            uploads: Mutex::new(Vec::new()),
        });

        let publisher = Publisher::new(
            Arc::new(scm),
            vec![
                broken.clone() as Arc<dyn NotificationChannel>,
                working.clone() as Arc<dyn NotificationChannel>,
            ],
            Some(record.clone() as Arc<dyn RecordChannel>),
        );
        let outcome = publisher.publish(&files, &result, PublishOptions::default()).await;

        assert_eq!(outcome.success, vec!["a.py"]);
        assert_eq!(outcome.fallback, vec!["b.py"]);
        assert_eq!(outcome.failed, vec!["c.py"]);
        assert_eq!(outcome.failed_channels, vec!["broken"]);
        assert!(outcome.record_uploaded);

        let sent = working.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (text, status) = &sent[0];
        assert_eq!(*status, DeliveryStatus::Failure);
        assert!(text.contains("1 committed, 1 fallback, 1 failed"));
        assert!(text.contains("Failed: c.py"));
        assert!(text.contains("Fallback: b.py"));
        assert!(text.contains("Manual review: a.py (9)"));
        assert!(text.contains("Cost: 14.00 KRW"));

        let uploads = record.uploads.lock().unwrap();
        assert_eq!(uploads[0].0, "annalist run 240501_0930");
        assert!(uploads[0].1.contains("Failed channels: broken"));
        assert!(uploads[0].1.contains("FILE: a.py\nA does things."));
    }

    #[tokio::test]
    async fn dry_run_skips_push_and_channels() {
        let files = vec![file("a.py")];
        let result = result_with_commit(&files);

        let mut scm = MockSourceControl::new();
        scm.expect_commit_path().times(1).returning(|_, _| Ok(()));
        scm.expect_push().never();

        let channel = Arc::new(RecordingChannel {
            name: "c",
            accept: true,
            sent: Mutex::new(Vec::new()),
        });
        let channels = vec![channel.clone() as Arc<dyn NotificationChannel>];
        let publisher = Publisher::new(Arc::new(scm), channels, None);
        let outcome = publisher
            .publish(&files, &result, PublishOptions { push: false, notify: false })
            .await;

        assert_eq!(outcome.success, vec!["a.py"]);
        assert_eq!(outcome.status(), DeliveryStatus::Success);
        assert!(channel.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn push_failure_marks_file_failed() {
        let files = vec![file("a.py")];
        let mut scm = MockSourceControl::new();
        scm.expect_commit_path().returning(|_, _| Ok(()));
        scm.expect_push().returning(|| {
            Err(GitError::CommandFailed {
                operation: "push".into(),
                stderr: "rejected".into(),
            })
        });
        let publisher = Publisher::new(Arc::new(scm), Vec::new(), None);
        let outcome = publisher.commit_files(&files, &result_with_commit(&files), true);
        assert_eq!(outcome.failed, vec!["a.py"]);
    }
}
