//! Engine configuration: YAML file, then `WORDTRACE_*` environment overrides

use crate::pipeline::OrchestratorConfig;
use crate::resolve::{ResolverConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "WORDTRACE_";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub similarity_threshold: f32,
    pub tie_epsilon: f32,
    pub neighbor_k: usize,
    pub embedding_dimensions: usize,
    pub assist_timeout_ms: u64,
    pub retry: RetryPolicy,
    pub workers: usize,
    pub max_article_attempts: u32,
    pub retention_days: i64,
    pub sweep_interval_secs: u64,
    /// 0 disables the background reconciler
    pub reconcile_interval_secs: u64,
    pub db_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            tie_epsilon: 0.01,
            neighbor_k: 5,
            embedding_dimensions: 768,
            assist_timeout_ms: 10_000,
            retry: RetryPolicy::default(),
            workers: 4,
            max_article_attempts: 3,
            retention_days: 30,
            sweep_interval_secs: 3600,
            reconcile_interval_secs: 0,
            db_path: None,
        }
    }
}

impl EngineConfig {
    /// Load from an optional YAML file, apply the environment, validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_from(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    /// Override fields from `WORDTRACE_<FIELD>` variables found by `lookup`
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("SIMILARITY_THRESHOLD") {
            self.similarity_threshold = parse_env("SIMILARITY_THRESHOLD", &v)?;
        }
        if let Some(v) = var("TIE_EPSILON") {
            self.tie_epsilon = parse_env("TIE_EPSILON", &v)?;
        }
        if let Some(v) = var("NEIGHBOR_K") {
            self.neighbor_k = parse_env("NEIGHBOR_K", &v)?;
        }
        if let Some(v) = var("EMBEDDING_DIMENSIONS") {
            self.embedding_dimensions = parse_env("EMBEDDING_DIMENSIONS", &v)?;
        }
        if let Some(v) = var("ASSIST_TIMEOUT_MS") {
            self.assist_timeout_ms = parse_env("ASSIST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = var("RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env("RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("RETRY_BASE_DELAY_MS") {
            self.retry.base_delay_ms = parse_env("RETRY_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = var("RETRY_MAX_DELAY_MS") {
            self.retry.max_delay_ms = parse_env("RETRY_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = var("WORKERS") {
            self.workers = parse_env("WORKERS", &v)?;
        }
        if let Some(v) = var("MAX_ARTICLE_ATTEMPTS") {
            self.max_article_attempts = parse_env("MAX_ARTICLE_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("RETENTION_DAYS") {
            self.retention_days = parse_env("RETENTION_DAYS", &v)?;
        }
        if let Some(v) = var("SWEEP_INTERVAL_SECS") {
            self.sweep_interval_secs = parse_env("SWEEP_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("RECONCILE_INTERVAL_SECS") {
            self.reconcile_interval_secs = parse_env("RECONCILE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = var("DB_PATH") {
            self.db_path = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return invalid(format!(
                "similarity_threshold must be in (0, 1], got {}",
                self.similarity_threshold
            ));
        }
        if !(0.0..1.0).contains(&self.tie_epsilon) {
            return invalid(format!("tie_epsilon must be in [0, 1), got {}", self.tie_epsilon));
        }
        if self.neighbor_k == 0 {
            return invalid("neighbor_k must be at least 1".into());
        }
        if self.embedding_dimensions == 0 {
            return invalid("embedding_dimensions must be at least 1".into());
        }
        if self.workers == 0 {
            return invalid("workers must be at least 1".into());
        }
        if self.max_article_attempts == 0 || self.retry.max_attempts == 0 {
            return invalid("attempt counts must be at least 1".into());
        }
        if self.retention_days <= 0 {
            return invalid(format!("retention_days must be positive, got {}", self.retention_days));
        }
        if self.sweep_interval_secs == 0 {
            return invalid("sweep_interval_secs must be at least 1".into());
        }
        Ok(())
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            similarity_threshold: self.similarity_threshold,
            tie_epsilon: self.tie_epsilon,
            neighbor_k: self.neighbor_k,
            assist_timeout: Duration::from_millis(self.assist_timeout_ms),
            retry: self.retry,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            workers: self.workers,
            max_article_attempts: self.max_article_attempts,
            retention: chrono::Duration::days(self.retention_days),
            article_backoff: self.retry,
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn reconcile_interval(&self) -> Option<Duration> {
        (self.reconcile_interval_secs > 0).then(|| Duration::from_secs(self.reconcile_interval_secs))
    }

    /// Configured database path, falling back to the platform data dir
    pub fn db_path(&self) -> PathBuf {
        self.db_path.clone().unwrap_or_else(default_db_path)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{ENV_PREFIX}{name}: cannot parse {value:?}")))
}

/// `<data dir>/wordtrace/wordtrace.db`
pub fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("wordtrace").join("wordtrace.db")
}
