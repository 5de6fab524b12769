//! In-memory storage backend
//!
//! Implements both `KeywordStore` and `GraphStore` behind RwLocks. Used for
//! tests and for ephemeral runs without a database file. An article commit
//! happens under a single write lock, so readers see all of its edges or none.

use super::traits::{
    ExpiryReport, GraphFilter, GraphStore, KeywordEdge, KeywordStore, OpenStore, StorageError,
    StorageResult,
};
use crate::index::{BruteForceIndex, VectorIndex};
use crate::model::{Article, ArticleId, ArticleState, CanonicalKeyword, KeywordId, KeywordType};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

fn name_key(keyword_type: KeywordType, name: &str) -> (KeywordType, String) {
    (keyword_type, name.trim().to_lowercase())
}

#[derive(Debug, Default)]
struct KeywordTable {
    by_id: HashMap<KeywordId, CanonicalKeyword>,
    by_name: HashMap<(KeywordType, String), KeywordId>,
}

#[derive(Debug, Default)]
struct GraphTables {
    articles: HashMap<ArticleId, Article>,
    edges: HashMap<ArticleId, BTreeMap<KeywordId, KeywordEdge>>,
}

/// Thread-safe in-memory keyword and graph store
pub struct MemoryStore {
    keywords: RwLock<KeywordTable>,
    graph: RwLock<GraphTables>,
    index: Box<dyn VectorIndex>,
    generation: AtomicU64,
}

impl MemoryStore {
    /// Store with an exact brute-force index of the given dimensionality
    pub fn new(dimensions: usize) -> Self {
        Self::with_index(Box::new(BruteForceIndex::new(dimensions)))
    }

    /// Store delegating nearest-neighbour search to a custom index
    pub fn with_index(index: Box<dyn VectorIndex>) -> Self {
        Self {
            keywords: RwLock::new(KeywordTable::default()),
            graph: RwLock::new(GraphTables::default()),
            index,
            generation: AtomicU64::new(0),
        }
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Merge incoming aliases after the stored ones so aliases never shrink
    fn preserve_aliases(existing: &CanonicalKeyword, incoming: &CanonicalKeyword) -> CanonicalKeyword {
        let mut merged = incoming.clone();
        merged.aliases = existing.aliases.clone();
        for alias in &incoming.aliases {
            merged.add_alias(alias.clone());
        }
        merged
    }
}

impl OpenStore for MemoryStore {
    /// The path is ignored; memory stores never persist
    fn open(_path: impl AsRef<Path>, dimensions: usize) -> StorageResult<Self> {
        Ok(Self::new(dimensions))
    }

    fn open_in_memory(dimensions: usize) -> StorageResult<Self> {
        Ok(Self::new(dimensions))
    }
}

impl KeywordStore for MemoryStore {
    fn upsert_keyword(&self, keyword: &CanonicalKeyword) -> StorageResult<()> {
        let dims = self.index.dimensions();
        if keyword.embedding.len() != dims {
            return Err(StorageError::DimensionMismatch {
                expected: dims,
                actual: keyword.embedding.len(),
            });
        }

        let mut table = self
            .keywords
            .write()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;

        let key = name_key(keyword.keyword_type, &keyword.canonical_name);
        if let Some(owner) = table.by_name.get(&key) {
            if *owner != keyword.id {
                return Err(StorageError::DataIntegrity(format!(
                    "{} '{}' already exists as {}",
                    keyword.keyword_type, keyword.canonical_name, owner
                )));
            }
        }

        let stored = match table.by_id.get(&keyword.id) {
            Some(existing) => {
                let old_key = name_key(existing.keyword_type, &existing.canonical_name);
                let merged = Self::preserve_aliases(existing, keyword);
                table.by_name.remove(&old_key);
                merged
            }
            None => keyword.clone(),
        };

        self.index
            .insert(&stored.id, stored.keyword_type, &stored.embedding)?;
        table.by_name.insert(key, stored.id.clone());
        table.by_id.insert(stored.id.clone(), stored);
        Ok(())
    }

    fn get_keyword(&self, id: &KeywordId) -> StorageResult<Option<CanonicalKeyword>> {
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        Ok(table.by_id.get(id).cloned())
    }

    fn get_keywords(&self, ids: &[KeywordId]) -> StorageResult<Vec<CanonicalKeyword>> {
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        Ok(ids.iter().filter_map(|id| table.by_id.get(id).cloned()).collect())
    }

    fn find_by_name(
        &self,
        keyword_type: KeywordType,
        canonical_name: &str,
    ) -> StorageResult<Option<CanonicalKeyword>> {
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        Ok(table
            .by_name
            .get(&name_key(keyword_type, canonical_name))
            .and_then(|id| table.by_id.get(id).cloned()))
    }

    fn list_keywords(&self, keyword_type: Option<KeywordType>) -> StorageResult<Vec<CanonicalKeyword>> {
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        let mut keywords: Vec<CanonicalKeyword> = table
            .by_id
            .values()
            .filter(|k| keyword_type.map_or(true, |t| k.keyword_type == t))
            .cloned()
            .collect();
        keywords.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(keywords)
    }

    fn keyword_count(&self) -> StorageResult<usize> {
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        Ok(table.by_id.len())
    }

    fn nearest_neighbors(
        &self,
        embedding: &[f32],
        keyword_type: KeywordType,
        k: usize,
    ) -> StorageResult<Vec<(CanonicalKeyword, f32)>> {
        let hits = self.index.nearest(embedding, keyword_type, k)?;
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        Ok(hits
            .into_iter()
            .filter_map(|(id, sim)| table.by_id.get(&id).map(|kw| (kw.clone(), sim)))
            .collect())
    }

    fn merge_into(&self, survivor: &CanonicalKeyword, absorbed: &KeywordId) -> StorageResult<()> {
        // Lock order is keywords then graph, as in commit_article
        {
            let mut table = self
                .keywords
                .write()
                .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
            {
                let graph = self
                    .graph
                    .read()
                    .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
                let dangling = graph.edges.values().any(|edges| edges.contains_key(absorbed));
                if dangling {
                    return Err(StorageError::DataIntegrity(format!(
                        "keyword {} still has edges; reassign them before merging",
                        absorbed
                    )));
                }
            }
            let removed = table
                .by_id
                .remove(absorbed)
                .ok_or_else(|| StorageError::KeywordNotFound(absorbed.clone()))?;
            table
                .by_name
                .remove(&name_key(removed.keyword_type, &removed.canonical_name));
        }
        self.index.remove(absorbed)?;
        self.upsert_keyword(survivor)?;
        self.bump();
        Ok(())
    }

    fn embedding_dimensions(&self) -> usize {
        self.index.dimensions()
    }
}

impl GraphStore for MemoryStore {
    fn begin_article(&self, article: &Article) -> StorageResult<()> {
        let mut graph = self
            .graph
            .write()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        let mut registered = article.clone();
        // Keep the last commit timestamp: earlier edges stay visible
        if let Some(existing) = graph.articles.get(&article.id) {
            registered.committed_at = existing.committed_at;
        }
        graph.articles.insert(article.id.clone(), registered);
        Ok(())
    }

    fn commit_article(&self, article: &Article, edges: &[KeywordEdge]) -> StorageResult<()> {
        // The keyword read guard spans the edge write so no merge can remove
        // a checked keyword before its edge lands
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        for edge in edges {
            if edge.article_id != article.id {
                return Err(StorageError::DataIntegrity(format!(
                    "edge for article {} committed under {}",
                    edge.article_id, article.id
                )));
            }
            if !table.by_id.contains_key(&edge.keyword_id) {
                return Err(StorageError::KeywordNotFound(edge.keyword_id.clone()));
            }
        }

        let mut graph = self
            .graph
            .write()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        let mut committed = article.clone();
        if committed.committed_at.is_none() {
            committed.committed_at = Some(Utc::now());
        }
        graph.articles.insert(article.id.clone(), committed);
        let article_edges = graph.edges.entry(article.id.clone()).or_default();
        for edge in edges {
            article_edges.insert(edge.keyword_id.clone(), edge.clone());
        }
        drop(graph);
        drop(table);
        self.bump();
        Ok(())
    }

    fn set_article_state(&self, id: &ArticleId, state: ArticleState) -> StorageResult<()> {
        let mut graph = self
            .graph
            .write()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        let article = graph
            .articles
            .get_mut(id)
            .ok_or_else(|| StorageError::ArticleNotFound(id.clone()))?;
        article.state = state;
        Ok(())
    }

    fn get_article(&self, id: &ArticleId) -> StorageResult<Option<Article>> {
        let graph = self
            .graph
            .read()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        Ok(graph.articles.get(id).cloned())
    }

    fn add_edge(&self, edge: &KeywordEdge) -> StorageResult<()> {
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        if !table.by_id.contains_key(&edge.keyword_id) {
            return Err(StorageError::KeywordNotFound(edge.keyword_id.clone()));
        }

        let mut graph = self
            .graph
            .write()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        if !graph.articles.contains_key(&edge.article_id) {
            return Err(StorageError::ArticleNotFound(edge.article_id.clone()));
        }
        graph
            .edges
            .entry(edge.article_id.clone())
            .or_default()
            .insert(edge.keyword_id.clone(), edge.clone());
        drop(graph);
        drop(table);
        self.bump();
        Ok(())
    }

    fn edges_for_article(&self, id: &ArticleId) -> StorageResult<Vec<KeywordEdge>> {
        let graph = self
            .graph
            .read()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        Ok(graph
            .edges
            .get(id)
            .map(|edges| edges.values().cloned().collect())
            .unwrap_or_default())
    }

    fn articles_for_keyword(
        &self,
        keyword_id: &KeywordId,
        filter: &GraphFilter,
    ) -> StorageResult<Vec<ArticleId>> {
        let graph = self
            .graph
            .read()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        let mut ids: Vec<ArticleId> = graph
            .edges
            .iter()
            .filter(|(_, edges)| edges.contains_key(keyword_id))
            .filter_map(|(article_id, _)| graph.articles.get(article_id))
            .filter(|a| a.committed_at.is_some() && filter.matches_article(a))
            .map(|a| a.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    fn keyword_sets(&self, filter: &GraphFilter) -> StorageResult<Vec<(ArticleId, Vec<KeywordId>)>> {
        let table = self
            .keywords
            .read()
            .map_err(|_| StorageError::LockPoisoned("keyword table"))?;
        let graph = self
            .graph
            .read()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;

        let mut sets = Vec::new();
        for (article_id, edges) in &graph.edges {
            let Some(article) = graph.articles.get(article_id) else {
                continue;
            };
            if article.committed_at.is_none() || !filter.matches_article(article) {
                continue;
            }
            let keywords: Vec<KeywordId> = edges
                .keys()
                .filter(|id| {
                    table
                        .by_id
                        .get(*id)
                        .map_or(false, |kw| filter.allows_type(kw.keyword_type))
                })
                .cloned()
                .collect();
            if !keywords.is_empty() {
                sets.push((article_id.clone(), keywords));
            }
        }
        sets.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(sets)
    }

    fn expire_articles_before(&self, cutoff: DateTime<Utc>) -> StorageResult<ExpiryReport> {
        let mut graph = self
            .graph
            .write()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        let mut report = ExpiryReport::default();

        let expired: Vec<(ArticleId, bool)> = graph
            .articles
            .values()
            .filter(|a| a.expires_at < cutoff)
            .map(|a| (a.id.clone(), a.state.is_terminal()))
            .collect();

        for (id, terminal) in expired {
            if !terminal {
                report.deferred.push(id);
                continue;
            }
            graph.articles.remove(&id);
            if let Some(edges) = graph.edges.remove(&id) {
                report.edges_removed += edges.len();
            }
            report.removed.push(id);
        }
        drop(graph);

        report.removed.sort();
        report.deferred.sort();
        if !report.removed.is_empty() {
            self.bump();
        }
        Ok(report)
    }

    fn reassign_keyword(&self, from: &KeywordId, to: &KeywordId) -> StorageResult<usize> {
        if from == to {
            return Ok(0);
        }
        let mut graph = self
            .graph
            .write()
            .map_err(|_| StorageError::LockPoisoned("graph tables"))?;
        let mut moved = 0;
        for edges in graph.edges.values_mut() {
            let Some(mut edge) = edges.remove(from) else {
                continue;
            };
            edge.keyword_id = to.clone();
            match edges.get_mut(to) {
                Some(existing) => {
                    if edge.relevance > existing.relevance {
                        existing.relevance = edge.relevance;
                    }
                }
                None => {
                    edges.insert(to.clone(), edge);
                }
            }
            moved += 1;
        }
        drop(graph);
        if moved > 0 {
            self.bump();
        }
        Ok(moved)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn health_check(&self) -> StorageResult<()> {
        self.graph
            .read()
            .map(|_| ())
            .map_err(|_| StorageError::LockPoisoned("graph tables"))
    }
}
