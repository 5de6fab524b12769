//! Entity resolution: mentions in, canonical keyword ids out
//!
//! `EntityResolver` decides merge / create / assist for each mention inside
//! a per-type critical section. `Reconciler` is the convergence pass that
//! folds together keywords which drifted within the threshold of each other.

mod assist;
mod embedder;
mod lock;
mod reconcile;
mod resolver;
mod retry;

pub use assist::{
    disambiguate_within, AliasMatchAssist, AssistError, Candidate, CanonicalizationAssist,
    NoAssist, Verdict,
};
#[cfg(feature = "embeddings")]
pub use embedder::FastEmbedEmbedder;
pub use embedder::{Embedder, EmbeddingError, NoEmbedder};
pub use lock::TypeLocks;
pub use reconcile::{MergeRecord, ReconcileReport, Reconciler};
pub use resolver::{AssistedDecision, Decision, EntityResolver, Resolution, ResolverConfig};
pub use retry::RetryPolicy;

use crate::storage::StorageError;
use thiserror::Error;

/// Errors from resolving a single mention
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The mention cannot be resolved as given (bad embedding, bad fields)
    #[error("invalid mention: {0}")]
    InvalidMention(String),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),
}

impl ResolveError {
    /// A collaborator failed in a way that may succeed on a later attempt
    pub fn is_transient(&self) -> bool {
        match self {
            ResolveError::Embedding(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<StorageError> for ResolveError {
    fn from(e: StorageError) -> Self {
        if e.is_integrity() {
            ResolveError::DataIntegrity(e.to_string())
        } else {
            ResolveError::Storage(e)
        }
    }
}
