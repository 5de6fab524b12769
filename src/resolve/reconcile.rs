//! Reconciliation: merge canonical keywords that sit within the threshold
//!
//! Representative embeddings drift as mentions are absorbed, assist fallbacks
//! create provisional keywords, and thresholds get retuned. A reconcile pass
//! restores "no two same-type keywords at or above the threshold" by folding
//! each such pair into its older member, repeated until nothing changes.

use super::lock::TypeLocks;
use crate::model::{CanonicalKeyword, KeywordId, KeywordType};
use crate::pipeline::CancellationToken;
use crate::storage::{StorageResult, Store};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One absorbed keyword
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeRecord {
    pub keyword_type: KeywordType,
    pub survivor: KeywordId,
    pub absorbed: KeywordId,
    pub absorbed_name: String,
    pub similarity: f32,
    pub edges_moved: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    /// Passes run across all types, including the final no-op pass per type
    pub passes: usize,
    pub merges: Vec<MergeRecord>,
}

impl ReconcileReport {
    pub fn edges_moved(&self) -> usize {
        self.merges.iter().map(|m| m.edges_moved).sum()
    }
}

pub struct Reconciler {
    store: Arc<dyn Store>,
    locks: TypeLocks,
    threshold: f32,
    neighbor_k: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, locks: TypeLocks, threshold: f32, neighbor_k: usize) -> Self {
        Self {
            store,
            locks,
            threshold,
            neighbor_k: neighbor_k.max(1),
        }
    }

    /// Reconcile every keyword type to a fixpoint
    pub async fn run_once(&self) -> StorageResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for keyword_type in KeywordType::ALL {
            let _guard = self.locks.acquire(keyword_type).await;
            loop {
                report.passes += 1;
                let merged = self.pass(keyword_type, &mut report)?;
                debug!(keyword_type = %keyword_type, merged, "reconcile pass");
                if merged == 0 {
                    break;
                }
            }
        }
        if !report.merges.is_empty() {
            info!(
                merges = report.merges.len(),
                edges_moved = report.edges_moved(),
                "reconciliation merged keywords"
            );
        }
        Ok(report)
    }

    /// Run `run_once` every `interval` until cancelled
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = %e, "reconciliation failed");
                        }
                    }
                }
            }
            debug!("reconciler stopped");
        })
    }

    fn pass(&self, keyword_type: KeywordType, report: &mut ReconcileReport) -> StorageResult<usize> {
        let keywords = self.store.list_keywords(Some(keyword_type))?;
        let mut gone: HashSet<KeywordId> = HashSet::new();
        let mut merged = 0;

        for keyword in keywords {
            if gone.contains(&keyword.id) {
                continue;
            }
            // Keep folding into this keyword while it has a partner above the threshold
            loop {
                let Some(current) = self.store.get_keyword(&keyword.id)? else {
                    break;
                };
                let partner = self
                    .store
                    .nearest_neighbors(&current.embedding, keyword_type, self.neighbor_k + 1)?
                    .into_iter()
                    .find(|(other, sim)| {
                        other.id != current.id && !gone.contains(&other.id) && *sim >= self.threshold
                    });
                let Some((other, similarity)) = partner else {
                    break;
                };

                let record = self.merge_pair(current, other, similarity)?;
                gone.insert(record.absorbed.clone());
                let current_absorbed = record.absorbed == keyword.id;
                report.merges.push(record);
                merged += 1;
                if current_absorbed {
                    break;
                }
            }
        }
        Ok(merged)
    }

    /// Fold the younger keyword into the older one (ties broken by id)
    fn merge_pair(
        &self,
        a: CanonicalKeyword,
        b: CanonicalKeyword,
        similarity: f32,
    ) -> StorageResult<MergeRecord> {
        let (mut survivor, absorbed) = if (a.created_at, &a.id) <= (b.created_at, &b.id) {
            (a, b)
        } else {
            (b, a)
        };
        survivor.absorb_keyword(&absorbed);
        let edges_moved = self.store.reassign_keyword(&absorbed.id, &survivor.id)?;
        self.store.merge_into(&survivor, &absorbed.id)?;
        info!(
            survivor = %survivor.id,
            survivor_name = %survivor.canonical_name,
            absorbed = %absorbed.id,
            absorbed_name = %absorbed.canonical_name,
            similarity,
            edges_moved,
            "keywords reconciled"
        );
        Ok(MergeRecord {
            keyword_type: survivor.keyword_type,
            survivor: survivor.id,
            absorbed: absorbed.id,
            absorbed_name: absorbed.canonical_name,
            similarity,
            edges_moved,
        })
    }
}
