//! Canonicalization Assist boundary
//!
//! Consulted only when two or more existing keywords tie for a mention. The
//! verdict is authoritative; any failure degrades to "create new".

use crate::model::{CanonicalKeyword, KeywordId, KeywordMention};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// One tied candidate as presented to the assist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub keyword_id: KeywordId,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub similarity: f32,
}

impl Candidate {
    pub fn from_keyword(keyword: &CanonicalKeyword, similarity: f32) -> Self {
        Self {
            keyword_id: keyword.id.clone(),
            canonical_name: keyword.canonical_name.clone(),
            aliases: keyword.aliases.clone(),
            similarity,
        }
    }
}

/// The assist's decision for an ambiguous mention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "keyword_id", rename_all = "snake_case")]
pub enum Verdict {
    /// The mention denotes this existing keyword
    Existing(KeywordId),
    /// None of the candidates; create a new keyword
    New,
}

/// Errors from assist invocations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssistError {
    #[error("assist timed out after {0:?}")]
    Timeout(Duration),

    #[error("assist unavailable: {0}")]
    Unavailable(String),

    #[error("no assist configured")]
    NotConfigured,
}

impl AssistError {
    /// Whether another attempt may succeed.
    ///
    /// A timeout already spent the whole per-call budget and is not retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, AssistError::Unavailable(_))
    }
}

/// Capability trait for disambiguating tied candidates.
///
/// Abstracts over how the assist is reached (LLM service, rules, mock).
#[async_trait]
pub trait CanonicalizationAssist: Send + Sync {
    async fn disambiguate(
        &self,
        mention: &KeywordMention,
        candidates: &[Candidate],
    ) -> Result<Verdict, AssistError>;
}

/// Placeholder used when no assist is configured; ties fall back to "create new"
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAssist;

#[async_trait]
impl CanonicalizationAssist for NoAssist {
    async fn disambiguate(
        &self,
        _mention: &KeywordMention,
        _candidates: &[Candidate],
    ) -> Result<Verdict, AssistError> {
        Err(AssistError::NotConfigured)
    }
}

/// Picks the candidate whose name or aliases contain the mention's canonical
/// guess (case-insensitive). Answers `New` when none or several do.
#[derive(Debug, Default, Clone, Copy)]
pub struct AliasMatchAssist;

#[async_trait]
impl CanonicalizationAssist for AliasMatchAssist {
    async fn disambiguate(
        &self,
        mention: &KeywordMention,
        candidates: &[Candidate],
    ) -> Result<Verdict, AssistError> {
        let wanted = [
            mention.canonical_name_guess.to_lowercase(),
            mention.surface_form.to_lowercase(),
        ];
        let hits: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| {
                std::iter::once(&c.canonical_name)
                    .chain(c.aliases.iter())
                    .any(|name| wanted.contains(&name.to_lowercase()))
            })
            .collect();
        Ok(match hits.as_slice() {
            [only] => Verdict::Existing(only.keyword_id.clone()),
            _ => Verdict::New,
        })
    }
}

/// Invoke the assist, failing with `AssistError::Timeout` past `timeout`
pub async fn disambiguate_within(
    assist: &dyn CanonicalizationAssist,
    mention: &KeywordMention,
    candidates: &[Candidate],
    timeout: Duration,
) -> Result<Verdict, AssistError> {
    match tokio::time::timeout(timeout, assist.disambiguate(mention, candidates)).await {
        Ok(result) => result,
        Err(_) => Err(AssistError::Timeout(timeout)),
    }
}
