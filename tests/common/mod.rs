//! Common test utilities for wordtrace integration tests
//!
//! Deterministic embedders and assists, plus builders for article
//! submissions and mentions.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wordtrace::resolve::{AssistError, Candidate, EmbeddingError, Verdict};
use wordtrace::{
    ArticleId, ArticleSubmission, CanonicalizationAssist, Embedder, EntityResolver,
    ExtractedKeyword, ExtractionResult, KeywordCategory, KeywordMention, ResolverConfig,
    RetryPolicy, Store,
};

/// Counts calls across clones
#[derive(Clone, Default)]
pub struct CallCounter(Arc<AtomicUsize>);

impl CallCounter {
    pub fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Embedder with a fixed text -> vector table
pub struct TableEmbedder {
    dimensions: usize,
    table: HashMap<String, Vec<f32>>,
    pub calls: CallCounter,
}

impl TableEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            table: HashMap::new(),
            calls: CallCounter::default(),
        }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.table.insert(text.to_string(), vector);
        self
    }
}

impl Embedder for TableEmbedder {
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.hit();
        texts
            .iter()
            .map(|t| {
                self.table
                    .get(*t)
                    .cloned()
                    .ok_or_else(|| EmbeddingError::Unavailable(format!("no vector for {t}")))
                    .and_then(|v| {
                        if v.len() == self.dimensions {
                            Ok(v)
                        } else {
                            Err(EmbeddingError::DimensionMismatch {
                                expected: self.dimensions,
                                actual: v.len(),
                            })
                        }
                    })
            })
            .collect()
    }
}

/// Assist that always answers the same verdict and counts calls
pub struct ScriptedAssist {
    verdict: Option<Verdict>,
    pub calls: CallCounter,
}

impl ScriptedAssist {
    pub fn answering(verdict: Verdict) -> Self {
        Self {
            verdict: Some(verdict),
            calls: CallCounter::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            verdict: None,
            calls: CallCounter::default(),
        }
    }
}

#[async_trait]
impl CanonicalizationAssist for ScriptedAssist {
    async fn disambiguate(
        &self,
        _mention: &KeywordMention,
        _candidates: &[Candidate],
    ) -> Result<Verdict, AssistError> {
        self.calls.hit();
        self.verdict
            .clone()
            .ok_or_else(|| AssistError::Unavailable("scripted failure".to_string()))
    }
}

/// Unit vector at `degrees` in the plane
pub fn at_angle(degrees: f32) -> Vec<f32> {
    let r = degrees.to_radians();
    vec![r.cos(), r.sin()]
}

/// Unit vector whose cosine with `[1, 0]` is `similarity`
pub fn with_similarity(similarity: f32) -> Vec<f32> {
    vec![similarity, (1.0 - similarity * similarity).sqrt()]
}

pub fn resolver_config() -> ResolverConfig {
    ResolverConfig {
        retry: RetryPolicy::none(),
        ..ResolverConfig::default()
    }
}

pub fn resolver(
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    assist: Arc<dyn CanonicalizationAssist>,
) -> EntityResolver {
    EntityResolver::new(store, embedder, assist, resolver_config())
}

pub fn mention(
    surface: &str,
    guess: &str,
    category: KeywordCategory,
    embedding: Vec<f32>,
) -> KeywordMention {
    KeywordMention {
        surface_form: surface.to_string(),
        canonical_name_guess: guess.to_string(),
        keyword_type: category.keyword_type(),
        category,
        embedding: Some(embedding),
        article_id: ArticleId::from_string("test-article"),
        relevance: 1.0,
    }
}

pub fn entity(name: &str, category: &str, embedding: Vec<f32>) -> ExtractedKeyword {
    ExtractedKeyword::new(name, name, "entity", category).with_embedding(embedding)
}

pub fn concept(name: &str, category: &str, embedding: Vec<f32>) -> ExtractedKeyword {
    ExtractedKeyword::new(name, name, "concept", category).with_embedding(embedding)
}

pub fn submission(
    url: &str,
    category: &str,
    published_at: DateTime<Utc>,
    keywords: Vec<ExtractedKeyword>,
) -> ArticleSubmission {
    ArticleSubmission {
        url: url.to_string(),
        title: format!("Article at {url}"),
        published_at,
        source: "wire".to_string(),
        extraction: ExtractionResult {
            article_category: category.to_string(),
            keywords,
        },
    }
}
