//! Co-occurrence computation with a generation-checked cache

use super::{CoOccurrence, CoOccurrenceGraph, GraphEdge, GraphNode, ProjectionFilter};
use crate::model::{ArticleId, KeywordId};
use crate::storage::{StorageResult, Store};
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Distinct filters kept per generation
const MAX_CACHED_FILTERS: usize = 64;

type KeywordSets = Vec<(ArticleId, Vec<KeywordId>)>;

/// Keyword sets and the pairs counted from them, taken from one store read
#[derive(Clone)]
struct Snapshot {
    generation: u64,
    last_used: u64,
    sets: Arc<KeywordSets>,
    pairs: Arc<Vec<CoOccurrence>>,
}

/// Read-only co-occurrence projection over a graph store.
///
/// Results are cached per normalized filter and tagged with the store's
/// write generation. Entries from older generations are evicted on the next
/// insert, and at most `MAX_CACHED_FILTERS` filters are kept.
pub struct ProjectionEngine {
    store: Arc<dyn Store>,
    cache: DashMap<ProjectionFilter, Snapshot>,
    clock: AtomicU64,
}

impl ProjectionEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            clock: AtomicU64::new(0),
        }
    }

    /// Drop every cached projection
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    pub fn cached_filters(&self) -> usize {
        self.cache.len()
    }

    /// Keyword pairs sharing qualifying articles, by weight desc then ids
    pub fn compute_co_occurrence(&self, filter: &ProjectionFilter) -> StorageResult<Vec<CoOccurrence>> {
        Ok(self.snapshot(filter)?.pairs.as_ref().clone())
    }

    fn snapshot(&self, filter: &ProjectionFilter) -> StorageResult<Snapshot> {
        let key = filter.normalized();
        let generation = self.store.generation();
        let tick = self.clock.fetch_add(1, Ordering::Relaxed);
        if let Some(mut hit) = self.cache.get_mut(&key) {
            if hit.generation == generation {
                hit.last_used = tick;
                return Ok(hit.clone());
            }
        }

        let sets = self.store.keyword_sets(&key)?;
        let pairs = count_pairs(&sets);
        debug!(
            articles = sets.len(),
            pairs = pairs.len(),
            generation,
            "co-occurrence recomputed"
        );
        let snapshot = Snapshot {
            generation,
            last_used: tick,
            sets: Arc::new(sets),
            pairs: Arc::new(pairs),
        };
        self.evict(generation);
        self.cache.insert(key, snapshot.clone());
        Ok(snapshot)
    }

    /// Drop stale generations, then the least recently used entries past the cap
    fn evict(&self, generation: u64) {
        self.cache.retain(|_, entry| entry.generation == generation);
        while self.cache.len() >= MAX_CACHED_FILTERS {
            let oldest = self
                .cache
                .iter()
                .min_by_key(|entry| entry.last_used)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.cache.remove(&key);
                }
                None => break,
            }
        }
    }

    /// The `{nodes, edges}` document for a filter.
    ///
    /// Edges below `min_weight` are trimmed. With `min_weight <= 1` every
    /// keyword of a qualifying article is a node; otherwise only keywords
    /// that keep at least one edge. Nodes and edges come from the same
    /// snapshot; an edge whose keyword vanished before the node lookup is
    /// dropped.
    pub fn co_occurrence_graph(
        &self,
        filter: &ProjectionFilter,
        min_weight: usize,
    ) -> StorageResult<CoOccurrenceGraph> {
        let snapshot = self.snapshot(filter)?;

        let mut article_counts: HashMap<&KeywordId, usize> = HashMap::new();
        for (_, keywords) in snapshot.sets.iter() {
            for id in keywords {
                *article_counts.entry(id).or_default() += 1;
            }
        }

        let edges: Vec<GraphEdge> = snapshot
            .pairs
            .iter()
            .filter(|p| p.weight >= min_weight.max(1))
            .cloned()
            .map(GraphEdge::from)
            .collect();

        let node_ids: BTreeSet<KeywordId> = if min_weight <= 1 {
            article_counts.keys().map(|id| (*id).clone()).collect()
        } else {
            edges
                .iter()
                .flat_map(|e| [e.source.clone(), e.target.clone()])
                .collect()
        };

        let ids: Vec<KeywordId> = node_ids.into_iter().collect();
        let nodes: Vec<GraphNode> = self
            .store
            .get_keywords(&ids)?
            .into_iter()
            .map(|kw| GraphNode {
                article_count: article_counts.get(&kw.id).copied().unwrap_or(0),
                id: kw.id,
                canonical_name: kw.canonical_name,
                keyword_type: kw.keyword_type,
                category: kw.category,
            })
            .collect();

        let present: BTreeSet<&KeywordId> = nodes.iter().map(|n| &n.id).collect();
        let edges: Vec<GraphEdge> = edges
            .into_iter()
            .filter(|e| present.contains(&e.source) && present.contains(&e.target))
            .collect();

        Ok(CoOccurrenceGraph { nodes, edges })
    }
}

/// Count unordered keyword pairs over article keyword sets
fn count_pairs(sets: &[(ArticleId, Vec<KeywordId>)]) -> Vec<CoOccurrence> {
    let mut support: BTreeMap<(KeywordId, KeywordId), BTreeSet<ArticleId>> = BTreeMap::new();

    for (article_id, keywords) in sets {
        let distinct: Vec<&KeywordId> = keywords.iter().collect::<BTreeSet<_>>().into_iter().collect();
        for i in 0..distinct.len() {
            for j in (i + 1)..distinct.len() {
                // `distinct` is sorted, so (i, j) is already (smaller, larger)
                support
                    .entry((distinct[i].clone(), distinct[j].clone()))
                    .or_default()
                    .insert(article_id.clone());
            }
        }
    }

    let mut pairs: Vec<CoOccurrence> = support
        .into_iter()
        .map(|((a, b), articles)| CoOccurrence {
            a,
            b,
            weight: articles.len(),
            article_ids: articles.into_iter().collect(),
        })
        .collect();
    pairs.sort_by(|x, y| {
        y.weight
            .cmp(&x.weight)
            .then_with(|| x.a.cmp(&y.a))
            .then_with(|| x.b.cmp(&y.b))
    });
    pairs
}
