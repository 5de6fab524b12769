//! Mention ingestion boundary
//!
//! Raw extraction output arrives with open string fields. It is validated
//! into closed enumerations here; unrecognized values are rejected rather
//! than stored as free text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::article::{ArticleCategory, ArticleId};
use super::keyword::{KeywordCategory, KeywordType};
use super::ValidationError;

/// One keyword as produced by the external extraction step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedKeyword {
    /// Surface form as it appeared in the article
    pub name: String,
    /// The extractor's guess at a standardized name
    #[serde(default, alias = "canonical_name")]
    pub canonical_name_guess: String,
    #[serde(rename = "type", alias = "keyword_type")]
    pub keyword_type: String,
    pub category: String,
    /// Pre-computed embedding, if the extractor supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance: Option<f32>,
}

impl ExtractedKeyword {
    pub fn new(
        name: impl Into<String>,
        canonical_name_guess: impl Into<String>,
        keyword_type: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            canonical_name_guess: canonical_name_guess.into(),
            keyword_type: keyword_type.into(),
            category: category.into(),
            embedding: None,
            relevance: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_relevance(mut self, relevance: f32) -> Self {
        self.relevance = Some(relevance);
        self
    }

    /// Validate into a typed mention for `article_id`
    pub fn into_mention(self, article_id: &ArticleId) -> Result<KeywordMention, ValidationError> {
        let surface = self.name.trim().to_string();
        if surface.is_empty() {
            return Err(ValidationError::EmptySurfaceForm);
        }
        let keyword_type: KeywordType = self.keyword_type.parse()?;
        let category: KeywordCategory = self.category.parse()?;
        if category.keyword_type() != keyword_type {
            return Err(ValidationError::CategoryTypeMismatch {
                category,
                keyword_type,
            });
        }
        let relevance = self.relevance.unwrap_or(1.0);
        if !(0.0..=1.0).contains(&relevance) {
            return Err(ValidationError::RelevanceOutOfRange(relevance));
        }
        let guess = self.canonical_name_guess.trim();
        let canonical_name_guess = if guess.is_empty() {
            surface.clone()
        } else {
            guess.to_string()
        };

        Ok(KeywordMention {
            surface_form: surface,
            canonical_name_guess,
            keyword_type,
            category,
            embedding: self.embedding,
            article_id: article_id.clone(),
            relevance,
        })
    }
}

/// What the extraction step produced for one article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    #[serde(alias = "article_category")]
    pub article_category: String,
    #[serde(default)]
    pub keywords: Vec<ExtractedKeyword>,
}

impl ExtractionResult {
    pub fn category(&self) -> Result<ArticleCategory, ValidationError> {
        self.article_category.parse()
    }
}

/// An article handed to the pipeline: metadata plus its extraction result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleSubmission {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(alias = "published_at")]
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    pub extraction: ExtractionResult,
}

impl ArticleSubmission {
    pub fn article_id(&self) -> ArticleId {
        ArticleId::from_url(&self.url)
    }
}

/// A validated keyword occurrence tied to one article
///
/// Transient: consumed by the resolver and discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordMention {
    pub surface_form: String,
    pub canonical_name_guess: String,
    pub keyword_type: KeywordType,
    pub category: KeywordCategory,
    pub embedding: Option<Vec<f32>>,
    pub article_id: ArticleId,
    pub relevance: f32,
}

impl KeywordMention {
    /// Text handed to the embedding provider when no embedding is supplied
    pub fn embedding_text(&self) -> &str {
        &self.canonical_name_guess
    }
}
