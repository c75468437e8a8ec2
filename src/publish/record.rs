//! Record channels: long-lived run logs kept outside the repository.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::config::RecordConfig;
use crate::error::RecordError;

pub const NOTION_API_BASE: &str = "https://api.notion.com";
pub const NOTION_VERSION: &str = "2022-06-28";
const NOTION_API_KEY_ENV: &str = "NOTION_API_KEY";
const NOTION_PAGE_ID_ENV: &str = "NOTION_PAGE_ID";
/// Notion rejects rich-text items longer than this.
const MAX_TEXT_CHARS: usize = 2000;
const TIMEOUT: Duration = Duration::from_secs(15);

#[async_trait]
pub trait RecordChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Append `body` under `title`, creating any missing parent structure.
    async fn upload(&self, title: &str, body: &str) -> Result<(), RecordError>;
}

/// Notion page with nested toggles: repository → `YYYY-MM` → `DD HH:MM`.
pub struct NotionRecord {
    http: reqwest::Client,
    base_url: String,
    token: String,
    parent_page_id: String,
    repo_name: String,
    offset: FixedOffset,
}

impl NotionRecord {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        parent_page_id: impl Into<String>,
        repo_name: impl Into<String>,
        offset_hours: i32,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            parent_page_id: parent_page_id.into(),
            repo_name: repo_name.into(),
            offset: FixedOffset::east_opt(offset_hours * 3600).unwrap_or_else(utc_offset),
        }
    }

    /// Build from configuration and the environment.
    ///
    /// `NOTION_API_KEY` is required; `NOTION_PAGE_ID` overrides the configured parent page.
    pub fn from_config(
        config: &RecordConfig,
        repo_name: &str,
        offset_hours: i32,
    ) -> Result<Self, RecordError> {
        let RecordConfig::Notion { parent_page_id } = config;
        let token = non_empty_env(NOTION_API_KEY_ENV)
            .ok_or(RecordError::MissingCredentials(NOTION_API_KEY_ENV))?;
        let page = non_empty_env(NOTION_PAGE_ID_ENV)
            .or_else(|| parent_page_id.clone())
            .ok_or(RecordError::MissingCredentials(NOTION_PAGE_ID_ENV))?;
        Ok(Self::new(NOTION_API_BASE, token, page, repo_name, offset_hours))
    }

    async fn children(&self, block_id: &str) -> Result<Vec<Value>, RecordError> {
        let url = format!("{}/v1/blocks/{}/children?page_size=100", self.base_url, block_id);
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .timeout(TIMEOUT)
            .send()
            .await
            .map_err(RecordError::Http)?;
        let body = checked_json(response).await?;
        Ok(body
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(&self, block_id: &str, children: Vec<Value>) -> Result<Value, RecordError> {
        let url = format!("{}/v1/blocks/{}/children", self.base_url, block_id);
        let response = self
            .http
            .patch(url)
            .bearer_auth(&self.token)
            .header("Notion-Version", NOTION_VERSION)
            .timeout(TIMEOUT)
            .json(&json!({ "children": children }))
            .send()
            .await
            .map_err(RecordError::Http)?;
        checked_json(response).await
    }

    /// Id of the toggle titled `title` under `parent`, created when absent.
    async fn find_or_create_toggle(
        &self,
        parent: &str,
        title: &str,
    ) -> Result<String, RecordError> {
        match self.children(parent).await {
            Ok(children) => {
                if let Some(id) = children.iter().find_map(|b| toggle_id_if_titled(b, title)) {
                    return Ok(id);
                }
            }
            // A listing failure falls through to creation.
            Err(e) => debug!("Could not list children of {}: {}", parent, e),
        }

        let created = self.append(parent, vec![toggle_block(title)]).await?;
        created
            .get("results")
            .and_then(|r| r.get(0))
            .and_then(|b| b.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| RecordError::MalformedResponse("created toggle has no id".into()))
    }

    async fn upload_at(
        &self,
        title: &str,
        body: &str,
        now: DateTime<FixedOffset>,
    ) -> Result<(), RecordError> {
        let mut parent = self.parent_page_id.clone();
        for label in toggle_titles(&self.repo_name, now) {
            parent = self.find_or_create_toggle(&parent, &label).await?;
        }
        self.append(&parent, vec![paragraph_block(title, body)]).await?;
        info!("Uploaded run record to Notion");
        Ok(())
    }
}

#[async_trait]
impl RecordChannel for NotionRecord {
    fn name(&self) -> &str {
        "notion"
    }

    async fn upload(&self, title: &str, body: &str) -> Result<(), RecordError> {
        self.upload_at(title, body, Utc::now().with_timezone(&self.offset)).await
    }
}

/// Toggle labels from the outermost level inward.
pub fn toggle_titles(repo_name: &str, now: DateTime<FixedOffset>) -> [String; 3] {
    [
        repo_name.to_string(),
        now.format("%Y-%m").to_string(),
        now.format("%d %H:%M").to_string(),
    ]
}

fn toggle_id_if_titled(block: &Value, title: &str) -> Option<String> {
    if block.get("type").and_then(Value::as_str) != Some("toggle") {
        return None;
    }
    let text = block
        .pointer("/toggle/rich_text/0/text/content")
        .and_then(Value::as_str)?;
    if text == title {
        block.get("id").and_then(Value::as_str).map(str::to_string)
    } else {
        None
    }
}

fn toggle_block(title: &str) -> Value {
    json!({
        "object": "block",
        "type": "toggle",
        "toggle": {
            "rich_text": [{"type": "text", "text": {"content": title}}],
            "children": []
        }
    })
}

fn paragraph_block(title: &str, body: &str) -> Value {
    let full = if title.is_empty() {
        body.to_string()
    } else {
        format!("{title}\n\n{body}")
    };
    let rich_text: Vec<Value> = split_chars(&full, MAX_TEXT_CHARS)
        .into_iter()
        .map(|chunk| json!({"type": "text", "text": {"content": chunk}}))
        .collect();
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": { "rich_text": rich_text }
    })
}

fn split_chars(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars.chunks(max).map(|c| c.iter().collect()).collect()
}

async fn checked_json(response: reqwest::Response) -> Result<Value, RecordError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RecordError::Status {
            status: status.as_u16(),
            body: body.chars().take(300).collect(),
        });
    }
    response
        .json()
        .await
        .map_err(|e| RecordError::MalformedResponse(e.to_string()))
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn utc_offset() -> FixedOffset {
    Utc.fix()
}
