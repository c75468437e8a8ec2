//! USD to local-currency exchange rate with a file-backed 24h cache.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ExchangeConfig;
use crate::error::ExchangeError;

/// Where a fresh exchange rate comes from.
#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    async fn fetch(&self) -> Result<f64, ExchangeError>;
}

/// JSON rate endpoint returning `{"rates": {"<CURRENCY>": <rate>}}`.
pub struct HttpRateSource {
    url: String,
    currency: String,
    http: reqwest::Client,
}

impl HttpRateSource {
    pub fn new(url: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            currency: currency.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self::new(&config.source_url, &config.currency)
    }
}

#[async_trait]
impl ExchangeRateSource for HttpRateSource {
    async fn fetch(&self) -> Result<f64, ExchangeError> {
        let response = self
            .http
            .get(&self.url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(ExchangeError::Http)?;

        if !response.status().is_success() {
            return Err(ExchangeError::Status(response.status().as_u16()));
        }

        let body: serde_json::Value = response.json().await.map_err(ExchangeError::Http)?;
        body.get("rates")
            .and_then(|rates| rates.get(&self.currency))
            .and_then(|rate| rate.as_f64())
            .filter(|rate| *rate > 0.0)
            .ok_or_else(|| ExchangeError::MissingRate(self.currency.clone()))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CachedRate {
    rate: f64,
    currency: String,
    fetched_at: DateTime<Utc>,
}

/// File cache in front of an [`ExchangeRateSource`].
///
/// The cache is read optimistically and rewritten at most once per refresh.
/// Concurrent processes may race on the file; the loser just sees a slightly
/// older rate.
#[derive(Debug, Clone)]
pub struct ExchangeRateCache {
    path: PathBuf,
    currency: String,
    max_age: Duration,
    fallback: f64,
}

impl ExchangeRateCache {
    pub fn new(
        path: impl Into<PathBuf>,
        currency: impl Into<String>,
        max_age: Duration,
        fallback: f64,
    ) -> Self {
        Self {
            path: path.into(),
            currency: currency.into(),
            max_age,
            fallback,
        }
    }

    pub fn from_config(config: &ExchangeConfig) -> Self {
        Self::new(
            &config.cache_file,
            &config.currency,
            Duration::from_secs(config.max_age_hours * 3600),
            config.fallback_rate,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fallback(&self) -> f64 {
        self.fallback
    }

    /// Cached rate if the cache file is younger than `max_age`.
    pub fn read_fresh(&self) -> Option<f64> {
        let age = fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .ok()?
            .elapsed()
            .ok()?;
        if age > self.max_age {
            debug!("Exchange rate cache is {}s old, refreshing", age.as_secs());
            return None;
        }
        self.read_any()
    }

    fn read_any(&self) -> Option<f64> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let cached: CachedRate = serde_json::from_str(&contents).ok()?;
        (cached.currency == self.currency && cached.rate > 0.0).then_some(cached.rate)
    }

    /// Fresh cached rate, otherwise a refresh from `source`.
    pub async fn resolve(&self, source: &dyn ExchangeRateSource) -> f64 {
        match self.read_fresh() {
            Some(rate) => rate,
            None => self.refresh(source).await,
        }
    }

    /// Fetch from `source` and rewrite the cache.
    ///
    /// When the source is unavailable the last cached value is used, and
    /// failing that the configured fallback rate.
    pub async fn refresh(&self, source: &dyn ExchangeRateSource) -> f64 {
        match source.fetch().await {
            Ok(rate) => {
                if let Err(e) = self.write(rate) {
                    warn!("Could not update exchange rate cache: {}", e);
                }
                info!("Exchange rate refreshed: 1 USD = {} {}", rate, self.currency);
                rate
            }
            Err(e) => {
                let rate = self.read_any().unwrap_or(self.fallback);
                warn!("Exchange rate source unavailable ({}), using {}", e, rate);
                rate
            }
        }
    }

    fn write(&self, rate: f64) -> Result<(), ExchangeError> {
        let cache_err = |source| ExchangeError::Cache {
            path: self.path.clone(),
            source,
        };
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        fs::create_dir_all(parent).map_err(cache_err)?;

        let cached = CachedRate {
            rate,
            currency: self.currency.clone(),
            fetched_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&cached)
            .map_err(|e| cache_err(std::io::Error::other(e)))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(cache_err)?;
        tmp.write_all(json.as_bytes()).map_err(cache_err)?;
        tmp.persist(&self.path).map_err(|e| cache_err(e.error))?;
        Ok(())
    }
}
