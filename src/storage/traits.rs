//! Storage trait definitions

use crate::model::{
    Article, ArticleCategory, ArticleId, ArticleState, CanonicalKeyword, KeywordId, KeywordType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParse(String),

    #[error("Keyword not found: {0}")]
    KeywordNotFound(KeywordId),

    #[error("Article not found: {0}")]
    ArticleNotFound(ArticleId),

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("Poisoned lock: {0}")]
    LockPoisoned(&'static str),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    /// Violations that must fail the affected commit instead of being retried
    pub fn is_integrity(&self) -> bool {
        match self {
            StorageError::DataIntegrity(_) | StorageError::DimensionMismatch { .. } => true,
            StorageError::Database(rusqlite::Error::SqliteFailure(e, _)) => {
                e.code == rusqlite::ErrorCode::ConstraintViolation
            }
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A HAS_KEYWORD edge between an article and a canonical keyword
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordEdge {
    pub article_id: ArticleId,
    pub keyword_id: KeywordId,
    pub relevance: f32,
    pub extracted_at: DateTime<Utc>,
}

impl KeywordEdge {
    pub fn new(article_id: ArticleId, keyword_id: KeywordId, relevance: f32) -> Self {
        Self {
            article_id,
            keyword_id,
            relevance,
            extracted_at: Utc::now(),
        }
    }
}

/// Filter over committed articles and their keywords
///
/// Empty `categories` / `keyword_types` mean "all". The time range applies to
/// `published_at`: inclusive start, exclusive end.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct GraphFilter {
    pub published_from: Option<DateTime<Utc>>,
    pub published_to: Option<DateTime<Utc>>,
    pub categories: Vec<ArticleCategory>,
    pub keyword_types: Vec<KeywordType>,
}

impl GraphFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.published_from = Some(from);
        self.published_to = Some(to);
        self
    }

    pub fn with_category(mut self, category: ArticleCategory) -> Self {
        if !self.categories.contains(&category) {
            self.categories.push(category);
        }
        self
    }

    pub fn with_keyword_type(mut self, keyword_type: KeywordType) -> Self {
        if !self.keyword_types.contains(&keyword_type) {
            self.keyword_types.push(keyword_type);
        }
        self
    }

    pub fn matches_article(&self, article: &Article) -> bool {
        if let Some(from) = self.published_from {
            if article.published_at < from {
                return false;
            }
        }
        if let Some(to) = self.published_to {
            if article.published_at >= to {
                return false;
            }
        }
        self.categories.is_empty() || self.categories.contains(&article.category)
    }

    pub fn allows_type(&self, keyword_type: KeywordType) -> bool {
        self.keyword_types.is_empty() || self.keyword_types.contains(&keyword_type)
    }

    /// Order-independent form, so equal filters share one cache entry
    pub fn normalized(&self) -> Self {
        let mut categories = self.categories.clone();
        categories.sort_by_key(|c| c.as_str());
        categories.dedup();
        let mut keyword_types = self.keyword_types.clone();
        keyword_types.sort();
        keyword_types.dedup();
        Self {
            published_from: self.published_from,
            published_to: self.published_to,
            categories,
            keyword_types,
        }
    }
}

/// Outcome of one retention sweep
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpiryReport {
    /// Articles removed together with their edges
    pub removed: Vec<ArticleId>,
    /// Expired articles skipped because their commit is still in flight
    pub deferred: Vec<ArticleId>,
    pub edges_removed: usize,
}

/// Persistence for canonical keywords with nearest-neighbour lookup.
///
/// Implementations must be thread-safe (Send + Sync).
pub trait KeywordStore: Send + Sync {
    /// Insert or update a keyword.
    ///
    /// Aliases are append-only: an update never drops an alias the stored
    /// keyword already has. A different id with the same type and canonical
    /// name is a `DataIntegrity` error.
    fn upsert_keyword(&self, keyword: &CanonicalKeyword) -> StorageResult<()>;

    fn get_keyword(&self, id: &KeywordId) -> StorageResult<Option<CanonicalKeyword>>;

    /// Keywords for the given ids; unknown ids are skipped
    fn get_keywords(&self, ids: &[KeywordId]) -> StorageResult<Vec<CanonicalKeyword>>;

    /// Case-insensitive lookup on canonical name within a type
    fn find_by_name(
        &self,
        keyword_type: KeywordType,
        canonical_name: &str,
    ) -> StorageResult<Option<CanonicalKeyword>>;

    fn list_keywords(&self, keyword_type: Option<KeywordType>) -> StorageResult<Vec<CanonicalKeyword>>;

    fn keyword_count(&self) -> StorageResult<usize>;

    /// Up to `k` keywords of `keyword_type`, ordered by descending similarity
    fn nearest_neighbors(
        &self,
        embedding: &[f32],
        keyword_type: KeywordType,
        k: usize,
    ) -> StorageResult<Vec<(CanonicalKeyword, f32)>>;

    /// Replace `survivor` and delete `absorbed` as one unit (reconciliation only).
    ///
    /// Edges must already point at the survivor.
    fn merge_into(&self, survivor: &CanonicalKeyword, absorbed: &KeywordId) -> StorageResult<()>;

    /// Dimensionality of stored embeddings
    fn embedding_dimensions(&self) -> usize;
}

/// Persistence for the bipartite Article <-> Keyword relation.
///
/// Implementations must be thread-safe (Send + Sync). Queries only see
/// articles whose commit has completed, so a keyword set is never observed
/// half-written.
pub trait GraphStore: Send + Sync {
    /// Register an article as in flight (metadata + non-terminal state).
    ///
    /// Previously committed edges stay visible until the next commit.
    fn begin_article(&self, article: &Article) -> StorageResult<()>;

    /// Write article metadata, its final state and all edges as one transaction
    fn commit_article(&self, article: &Article, edges: &[KeywordEdge]) -> StorageResult<()>;

    fn set_article_state(&self, id: &ArticleId, state: ArticleState) -> StorageResult<()>;

    fn get_article(&self, id: &ArticleId) -> StorageResult<Option<Article>>;

    /// Idempotent upsert keyed on (article, keyword); updates relevance if present
    fn add_edge(&self, edge: &KeywordEdge) -> StorageResult<()>;

    fn edges_for_article(&self, id: &ArticleId) -> StorageResult<Vec<KeywordEdge>>;

    /// Committed articles carrying `keyword_id` that match the filter
    fn articles_for_keyword(
        &self,
        keyword_id: &KeywordId,
        filter: &GraphFilter,
    ) -> StorageResult<Vec<ArticleId>>;

    /// Join of committed, filter-matching articles with their keyword ids
    /// (restricted to the filter's keyword types). Articles left with no
    /// keywords are omitted.
    fn keyword_sets(&self, filter: &GraphFilter) -> StorageResult<Vec<(ArticleId, Vec<KeywordId>)>>;

    /// Remove articles whose deadline is before `cutoff`, with their edges.
    ///
    /// Articles whose commit is still in flight are deferred, not removed.
    fn expire_articles_before(&self, cutoff: DateTime<Utc>) -> StorageResult<ExpiryReport>;

    /// Point every edge of `from` at `to`, keeping the higher relevance on
    /// collision. Returns the number of edges moved.
    fn reassign_keyword(&self, from: &KeywordId, to: &KeywordId) -> StorageResult<usize>;

    /// Monotonic counter bumped by every write visible to queries
    fn generation(&self) -> u64;

    fn health_check(&self) -> StorageResult<()>;
}

/// Extension trait for opening stores from paths
pub trait OpenStore: Sized {
    /// Open or create a store at the given path
    fn open(path: impl AsRef<Path>, dimensions: usize) -> StorageResult<Self>;

    /// Create an in-memory store (useful for testing)
    fn open_in_memory(dimensions: usize) -> StorageResult<Self>;
}
