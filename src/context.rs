//! Per-invocation run context.
//!
//! Built once per `annalist` invocation and passed to every stage. It pins
//! the run's artifact directory, log path and start time, and holds the
//! exchange rate, which is fetched lazily on first use and only refreshed
//! when asked to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::cost::{ExchangeRateCache, ExchangeRateSource, HttpRateSource};
use crate::error::ExchangeError;

pub const RUN_LOG_FILE: &str = "run.log";

pub struct RunContext {
    store: ArtifactStore,
    log_path: PathBuf,
    started_at: DateTime<Utc>,
    cache: ExchangeRateCache,
    source: Arc<dyn ExchangeRateSource>,
    exchange_rate: Mutex<Option<f64>>,
}

impl RunContext {
    pub fn new(
        store: ArtifactStore,
        log_path: impl Into<PathBuf>,
        started_at: DateTime<Utc>,
        cache: ExchangeRateCache,
        source: Arc<dyn ExchangeRateSource>,
    ) -> Self {
        Self {
            store,
            log_path: log_path.into(),
            started_at,
            cache,
            source,
            exchange_rate: Mutex::new(None),
        }
    }

    /// Context using the configured log directory and HTTP rate source.
    pub fn from_config(store: ArtifactStore, config: &Config, started_at: DateTime<Utc>) -> Self {
        let log_path = run_log_path(&config.logs_dir, store.run_id());
        Self::new(
            store,
            log_path,
            started_at,
            ExchangeRateCache::from_config(&config.exchange),
            Arc::new(HttpRateSource::from_config(&config.exchange)),
        )
    }

    /// Context with a constant exchange rate and no network access.
    pub fn with_fixed_rate(store: ArtifactStore, rate: f64) -> Self {
        let cache_path = store.root().join("exchange_rate.json");
        let log_path = store.root().join(RUN_LOG_FILE);
        Self {
            store,
            log_path,
            started_at: Utc::now(),
            cache: ExchangeRateCache::new(cache_path, "KRW", std::time::Duration::ZERO, rate),
            source: Arc::new(FixedRateSource(rate)),
            // Seeded so that a lookup never touches the cache file.
            exchange_rate: Mutex::new(Some(rate)),
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn run_id(&self) -> &str {
        self.store.run_id()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// USD to local-currency rate, resolved on first call and reused afterwards.
    pub async fn exchange_rate(&self) -> f64 {
        let mut slot = self.exchange_rate.lock().await;
        if let Some(rate) = *slot {
            return rate;
        }
        let rate = self.cache.resolve(self.source.as_ref()).await;
        *slot = Some(rate);
        rate
    }

    /// Fetch a new rate from the source, bypassing the cache freshness check.
    pub async fn refresh_exchange_rate(&self) -> f64 {
        let mut slot = self.exchange_rate.lock().await;
        let rate = self.cache.refresh(self.source.as_ref()).await;
        *slot = Some(rate);
        rate
    }
}

/// `<logs_dir>/<run_id>/run.log`.
pub fn run_log_path(logs_dir: &Path, run_id: &str) -> PathBuf {
    logs_dir.join(run_id).join(RUN_LOG_FILE)
}

/// A source that always answers with the same rate.
pub struct FixedRateSource(pub f64);

#[async_trait]
impl ExchangeRateSource for FixedRateSource {
    async fn fetch(&self) -> Result<f64, ExchangeError> {
        Ok(self.0)
    }
}
