//! Articles and their processing state machine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::ValidationError;

/// Unique identifier for an article
///
/// Derived from the article URL so that re-ingesting the same URL addresses
/// the same article.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(String);

impl ArticleId {
    /// Deterministic id for a URL (UUID v5, URL namespace)
    pub fn from_url(url: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, url.trim().as_bytes()).to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ArticleId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Closed set of article categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleCategory {
    Politics,
    Business,
    Sports,
    Entertainment,
    Technology,
    HealthScience,
    World,
}

impl ArticleCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleCategory::Politics => "politics",
            ArticleCategory::Business => "business",
            ArticleCategory::Sports => "sports",
            ArticleCategory::Entertainment => "entertainment",
            ArticleCategory::Technology => "technology",
            ArticleCategory::HealthScience => "health_science",
            ArticleCategory::World => "world",
        }
    }
}

impl fmt::Display for ArticleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArticleCategory {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match normalized.as_str() {
            "politics" => Ok(ArticleCategory::Politics),
            "business" => Ok(ArticleCategory::Business),
            "sports" => Ok(ArticleCategory::Sports),
            "entertainment" => Ok(ArticleCategory::Entertainment),
            "technology" => Ok(ArticleCategory::Technology),
            "health_science" => Ok(ArticleCategory::HealthScience),
            "world" => Ok(ArticleCategory::World),
            _ => Err(ValidationError::UnknownArticleCategory(s.to_string())),
        }
    }
}

/// Per-article processing state
///
/// ```text
/// Pending -> Extracting -> Resolving -> Stored
///                |              |-----> PartialSuccess
///                v              v
///        Failed(retryable)  Failed(retryable)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArticleState {
    Pending,
    Extracting,
    Resolving,
    Stored,
    PartialSuccess,
    Failed { retryable: bool },
}

impl ArticleState {
    /// Whether the state machine allows `self -> next`
    pub fn can_transition_to(&self, next: ArticleState) -> bool {
        use ArticleState::*;
        matches!(
            (self, next),
            (Pending, Extracting)
                | (Extracting, Resolving)
                | (Extracting, Failed { .. })
                | (Resolving, Stored)
                | (Resolving, PartialSuccess)
                | (Resolving, Failed { .. })
                // a retry starts over
                | (Failed { retryable: true }, Pending)
        )
    }

    /// The commit (or failure) for this article has fully completed
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ArticleState::Stored | ArticleState::PartialSuccess | ArticleState::Failed { .. }
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleState::Pending => "pending",
            ArticleState::Extracting => "extracting",
            ArticleState::Resolving => "resolving",
            ArticleState::Stored => "stored",
            ArticleState::PartialSuccess => "partial_success",
            ArticleState::Failed { retryable: true } => "failed_retryable",
            ArticleState::Failed { retryable: false } => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => ArticleState::Pending,
            "extracting" => ArticleState::Extracting,
            "resolving" => ArticleState::Resolving,
            "stored" => ArticleState::Stored,
            "partial_success" => ArticleState::PartialSuccess,
            "failed_retryable" => ArticleState::Failed { retryable: true },
            "failed" => ArticleState::Failed { retryable: false },
            _ => return None,
        })
    }
}

impl fmt::Display for ArticleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A news article as tracked by the graph store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub url: String,
    pub title: String,
    pub category: ArticleCategory,
    pub published_at: DateTime<Utc>,
    /// Feed or outlet the article came from
    pub source: String,
    /// After this instant the article and its edges are purged
    pub expires_at: DateTime<Utc>,
    pub state: ArticleState,
    /// Committed with an empty keyword set although mentions were extracted
    pub flagged: bool,
    pub committed_at: Option<DateTime<Utc>>,
}

impl Article {
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        category: ArticleCategory,
        published_at: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        let url = url.into();
        Self {
            id: ArticleId::from_url(&url),
            url,
            title: title.into(),
            category,
            published_at,
            source: source.into(),
            expires_at: Utc::now() + Duration::days(30),
            state: ArticleState::Pending,
            flagged: false,
            committed_at: None,
        }
    }

    /// Set the retention deadline relative to now
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.expires_at = Utc::now() + retention;
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = expires_at;
        self
    }
}
