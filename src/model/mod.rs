//! Core data model: canonical keywords, articles and mentions

mod article;
mod keyword;
mod mention;


pub use article::{Article, ArticleCategory, ArticleId, ArticleState};
pub use keyword::{CanonicalKeyword, KeywordCategory, KeywordId, KeywordSummary, KeywordType};
pub use mention::{ArticleSubmission, ExtractedKeyword, ExtractionResult, KeywordMention};

use thiserror::Error;

/// Rejections at the ingestion boundary
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Unknown keyword type: {0}")]
    UnknownKeywordType(String),

    #[error("Unknown keyword category: {0}")]
    UnknownKeywordCategory(String),

    #[error("Unknown article category: {0}")]
    UnknownArticleCategory(String),

    #[error("Category {category} does not belong to keyword type {keyword_type}")]
    CategoryTypeMismatch {
        category: KeywordCategory,
        keyword_type: KeywordType,
    },

    #[error("Keyword surface form is empty")]
    EmptySurfaceForm,

    #[error("Relevance {0} outside 0.0..=1.0")]
    RelevanceOutOfRange(f32),
}
