//! Pipeline orchestration: per-article state machine, batch runs, retention
//!
//! Articles move `Pending -> Extracting -> Resolving -> Stored` (or
//! `PartialSuccess` / `Failed`). Each article's keyword set is committed in
//! one store transaction. Batch runs spread articles over a bounded worker
//! pool and retry retryable failures.

mod cancel;
mod orchestrator;
mod retention;

pub use cancel::CancellationToken;
pub use orchestrator::{
    ArticleReport, BatchReport, FailedArticle, MentionFailure, Orchestrator, OrchestratorConfig,
};
pub use retention::RetentionSweeper;

use crate::model::{ArticleId, ArticleState};
use crate::storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("article {article_id}: illegal transition {from} -> {to}")]
    InvalidTransition {
        article_id: ArticleId,
        from: ArticleState,
        to: ArticleState,
    },

    /// The extraction result cannot be turned into an article at all
    #[error("article {article_id} rejected: {reason}")]
    InvalidArticle { article_id: ArticleId, reason: String },

    /// Another run is still processing the same article
    #[error("article {0} is already in flight")]
    ArticleInFlight(ArticleId),

    #[error("article {article_id}: storage error: {source}")]
    Storage {
        article_id: ArticleId,
        #[source]
        source: StorageError,
    },

    #[error("article {article_id}: data integrity violation: {reason}")]
    DataIntegrity { article_id: ArticleId, reason: String },

    /// Scheduling stopped on a systemic failure; carries what completed
    #[error("batch halted: {reason}")]
    Halted {
        reason: String,
        report: Box<BatchReport>,
    },
}

impl PipelineError {
    pub(crate) fn storage(article_id: &ArticleId, source: StorageError) -> Self {
        if source.is_integrity() {
            PipelineError::DataIntegrity {
                article_id: article_id.clone(),
                reason: source.to_string(),
            }
        } else {
            PipelineError::Storage {
                article_id: article_id.clone(),
                source,
            }
        }
    }

    /// Whether another attempt at the same article may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::Storage { .. } | PipelineError::ArticleInFlight(_)
        )
    }

    pub fn article_id(&self) -> Option<&ArticleId> {
        match self {
            PipelineError::InvalidTransition { article_id, .. }
            | PipelineError::InvalidArticle { article_id, .. }
            | PipelineError::Storage { article_id, .. }
            | PipelineError::DataIntegrity { article_id, .. } => Some(article_id),
            PipelineError::ArticleInFlight(id) => Some(id),
            PipelineError::Halted { .. } => None,
        }
    }
}
