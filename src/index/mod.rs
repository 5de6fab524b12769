//! Vector index abstraction for canonical keyword embeddings
//!
//! The keyword stores delegate nearest-neighbour search to a `VectorIndex`,
//! so an exact brute-force scan can be swapped for an approximate index
//! without changing callers.

mod brute_force;
mod sqlite_vec;

pub use brute_force::BruteForceIndex;
#[cfg(feature = "embeddings")]
pub use sqlite_vec::SqliteVecIndex;

use crate::model::{KeywordId, KeywordType};
use crate::storage::StorageResult;

/// Insert/query contract for embedding search, partitioned by keyword type.
pub trait VectorIndex: Send + Sync {
    /// Dimensionality every stored and queried vector must have
    fn dimensions(&self) -> usize;

    /// Insert or replace the vector for a keyword
    fn insert(&self, id: &KeywordId, keyword_type: KeywordType, vector: &[f32]) -> StorageResult<()>;

    /// Remove a keyword's vector. Removing an unknown id is a no-op.
    fn remove(&self, id: &KeywordId) -> StorageResult<()>;

    /// Up to `k` keywords of `keyword_type`, ordered by descending cosine similarity
    fn nearest(
        &self,
        query: &[f32],
        keyword_type: KeywordType,
        k: usize,
    ) -> StorageResult<Vec<(KeywordId, f32)>>;

    /// Number of indexed vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cosine similarity between two vectors (0.0 when either is zero).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
