//! Exact nearest-neighbour search by full cosine scan

use super::{cosine_similarity, VectorIndex};
use crate::model::{KeywordId, KeywordType};
use crate::storage::{StorageError, StorageResult};
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory exact index.
///
/// Thread-safe via RwLock. Partitioned by keyword type so that entity and
/// concept vectors never mix. Adequate for tens of thousands of keywords.
pub struct BruteForceIndex {
    dimensions: usize,
    partitions: RwLock<HashMap<KeywordType, HashMap<KeywordId, Vec<f32>>>>,
}

impl BruteForceIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            partitions: RwLock::new(HashMap::new()),
        }
    }

    fn check_dimensions(&self, actual: usize) -> StorageResult<()> {
        if actual != self.dimensions {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimensions,
                actual,
            });
        }
        Ok(())
    }
}

impl VectorIndex for BruteForceIndex {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn insert(&self, id: &KeywordId, keyword_type: KeywordType, vector: &[f32]) -> StorageResult<()> {
        self.check_dimensions(vector.len())?;
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| StorageError::LockPoisoned("vector index"))?;
        // A keyword never changes type, but keep partitions disjoint anyway
        for (ty, partition) in partitions.iter_mut() {
            if *ty != keyword_type {
                partition.remove(id);
            }
        }
        partitions
            .entry(keyword_type)
            .or_default()
            .insert(id.clone(), vector.to_vec());
        Ok(())
    }

    fn remove(&self, id: &KeywordId) -> StorageResult<()> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| StorageError::LockPoisoned("vector index"))?;
        for partition in partitions.values_mut() {
            partition.remove(id);
        }
        Ok(())
    }

    fn nearest(
        &self,
        query: &[f32],
        keyword_type: KeywordType,
        k: usize,
    ) -> StorageResult<Vec<(KeywordId, f32)>> {
        self.check_dimensions(query.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let partitions = self
            .partitions
            .read()
            .map_err(|_| StorageError::LockPoisoned("vector index"))?;
        let Some(partition) = partitions.get(&keyword_type) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(KeywordId, f32)> = partition
            .iter()
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .collect();
        scored.sort_by(|(ia, sa), (ib, sb)| sb.total_cmp(sa).then_with(|| ia.cmp(ib)));
        scored.truncate(k);
        Ok(scored)
    }

    fn len(&self) -> usize {
        self.partitions
            .read()
            .map(|p| p.values().map(|part| part.len()).sum())
            .unwrap_or(0)
    }
}
