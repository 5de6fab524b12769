//! Entity Resolver: map one mention to exactly one canonical keyword

use super::assist::{
    disambiguate_within, AssistError, Candidate, CanonicalizationAssist, Verdict,
};
use super::embedder::{Embedder, EmbeddingError};
use super::lock::TypeLocks;
use super::retry::RetryPolicy;
use super::ResolveError;
use crate::model::{CanonicalKeyword, KeywordId, KeywordMention, KeywordType};
use crate::storage::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Assisted decisions kept in memory for inspection
const DECISION_LOG_CAPACITY: usize = 1024;

/// Tuning knobs for matching
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Minimum cosine similarity for a merge
    pub similarity_threshold: f32,
    /// Candidates within this distance of the best one count as a tie
    pub tie_epsilon: f32,
    /// Nearest neighbours fetched per mention
    pub neighbor_k: usize,
    pub assist_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            tie_epsilon: 0.01,
            neighbor_k: 5,
            assist_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
        }
    }
}

/// How a mention ended up at its keyword
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Unambiguous match at or above the threshold
    Merged { similarity: f32 },
    /// No candidate reached the threshold; a new keyword was created
    Created,
    /// Below the threshold, but a keyword of this type already carries the
    /// mention's canonical name
    NameMatch,
    /// The assist settled a tie
    Assisted { verdict: Verdict },
    /// A tie the assist could not settle; a new keyword was created
    AssistFallback { reason: String },
}

impl Decision {
    /// Whether this decision added a keyword to the store
    pub fn created_keyword(&self) -> bool {
        matches!(
            self,
            Decision::Created
                | Decision::AssistFallback { .. }
                | Decision::Assisted { verdict: Verdict::New }
        )
    }
}

/// Outcome of resolving one mention
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub keyword_id: KeywordId,
    pub decision: Decision,
}

/// Audit record for a tie that reached the assist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistedDecision {
    pub surface_form: String,
    pub canonical_name_guess: String,
    pub keyword_type: KeywordType,
    pub candidates: Vec<Candidate>,
    pub outcome: Decision,
    pub keyword_id: KeywordId,
    pub decided_at: DateTime<Utc>,
}

/// Resolves mentions against the canonical keyword store.
///
/// Every call performs at most one keyword write, one embedding request
/// and one assist request, each plus retries on transient failures.
pub struct EntityResolver {
    store: Arc<dyn Store>,
    embedder: Arc<dyn Embedder>,
    assist: Arc<dyn CanonicalizationAssist>,
    locks: TypeLocks,
    config: ResolverConfig,
    decisions: Mutex<VecDeque<AssistedDecision>>,
}

impl EntityResolver {
    pub fn new(
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        assist: Arc<dyn CanonicalizationAssist>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            assist,
            locks: TypeLocks::new(),
            config,
            decisions: Mutex::new(VecDeque::new()),
        }
    }

    /// Share critical sections with another component (the reconciler)
    pub fn with_locks(mut self, locks: TypeLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &TypeLocks {
        &self.locks
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Most recent assisted decisions, oldest first
    pub fn assisted_decisions(&self) -> Vec<AssistedDecision> {
        self.decisions
            .lock()
            .map(|log| log.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn resolve(&self, mention: &KeywordMention) -> Result<Resolution, ResolveError> {
        let embedding = self.embedding_for(mention).await?;
        let _guard = self.locks.acquire(mention.keyword_type).await;

        let neighbors = self.store.nearest_neighbors(
            &embedding,
            mention.keyword_type,
            self.config.neighbor_k,
        )?;

        let threshold = self.config.similarity_threshold;
        let Some((best, best_sim)) = neighbors.first().filter(|(_, sim)| *sim >= threshold) else {
            return self.create_or_name_match(mention, embedding, Decision::Created);
        };
        let best_sim = *best_sim;

        let tied: Vec<&(CanonicalKeyword, f32)> = neighbors
            .iter()
            .filter(|(_, sim)| *sim >= threshold && best_sim - *sim <= self.config.tie_epsilon)
            .collect();

        if tied.len() < 2 {
            let mut keyword = best.clone();
            self.merge(&mut keyword, mention, &embedding)?;
            debug!(
                keyword_id = %keyword.id,
                surface = %mention.surface_form,
                similarity = best_sim,
                "mention merged"
            );
            return Ok(Resolution {
                keyword_id: keyword.id,
                decision: Decision::Merged {
                    similarity: best_sim,
                },
            });
        }

        let candidates: Vec<Candidate> = tied
            .iter()
            .map(|(kw, sim)| Candidate::from_keyword(kw, *sim))
            .collect();
        let resolution = self
            .settle_tie(mention, embedding, &tied, &candidates)
            .await?;
        self.record(mention, candidates, &resolution);
        Ok(resolution)
    }

    async fn settle_tie(
        &self,
        mention: &KeywordMention,
        embedding: Vec<f32>,
        tied: &[&(CanonicalKeyword, f32)],
        candidates: &[Candidate],
    ) -> Result<Resolution, ResolveError> {
        debug!(
            surface = %mention.surface_form,
            candidates = candidates.len(),
            "ambiguous match, consulting assist"
        );
        let verdict = self
            .config
            .retry
            .run("assist", AssistError::is_transient, || {
                disambiguate_within(
                    self.assist.as_ref(),
                    mention,
                    candidates,
                    self.config.assist_timeout,
                )
            })
            .await;

        match verdict {
            Ok(Verdict::Existing(id)) => {
                let Some((chosen, _)) = tied.iter().find(|(kw, _)| kw.id == id) else {
                    warn!(
                        surface = %mention.surface_form,
                        keyword_id = %id,
                        "assist chose a keyword outside the candidate set; creating new"
                    );
                    return self.create_distinct(
                        mention,
                        embedding,
                        Decision::AssistFallback {
                            reason: format!("verdict {} not among candidates", id),
                        },
                    );
                };
                let mut keyword = chosen.clone();
                self.merge(&mut keyword, mention, &embedding)?;
                Ok(Resolution {
                    keyword_id: keyword.id,
                    decision: Decision::Assisted {
                        verdict: Verdict::Existing(id),
                    },
                })
            }
            Ok(Verdict::New) => self.create_distinct(
                mention,
                embedding,
                Decision::Assisted {
                    verdict: Verdict::New,
                },
            ),
            Err(e) => {
                warn!(surface = %mention.surface_form, error = %e, "assist failed; creating new");
                self.create_distinct(
                    mention,
                    embedding,
                    Decision::AssistFallback {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    /// Create a keyword for the mention, unless its canonical name is taken
    /// within the type, in which case merge into the owner.
    fn create_or_name_match(
        &self,
        mention: &KeywordMention,
        embedding: Vec<f32>,
        decision: Decision,
    ) -> Result<Resolution, ResolveError> {
        if let Some(mut existing) = self
            .store
            .find_by_name(mention.keyword_type, &mention.canonical_name_guess)?
        {
            self.merge(&mut existing, mention, &embedding)?;
            debug!(keyword_id = %existing.id, surface = %mention.surface_form, "merged by name");
            return Ok(Resolution {
                keyword_id: existing.id,
                decision: Decision::NameMatch,
            });
        }
        self.create(mention, mention.canonical_name_guess.clone(), embedding, decision)
    }

    /// Always create a keyword. A taken canonical name gets a numeric suffix
    /// and the collision is reported at warn level.
    fn create_distinct(
        &self,
        mention: &KeywordMention,
        embedding: Vec<f32>,
        decision: Decision,
    ) -> Result<Resolution, ResolveError> {
        let guess = &mention.canonical_name_guess;
        let mut name = guess.clone();
        let mut suffix = 1u32;
        while let Some(owner) = self.store.find_by_name(mention.keyword_type, &name)? {
            suffix += 1;
            name = format!("{guess} ({suffix})");
            warn!(
                surface = %mention.surface_form,
                taken_by = %owner.id,
                name = %name,
                "canonical name collision; creating under a distinct name"
            );
        }
        self.create(mention, name, embedding, decision)
    }

    fn create(
        &self,
        mention: &KeywordMention,
        name: String,
        embedding: Vec<f32>,
        decision: Decision,
    ) -> Result<Resolution, ResolveError> {
        let keyword = CanonicalKeyword::new(
            name,
            mention.keyword_type,
            mention.category,
            embedding,
        )
        .with_alias(mention.surface_form.clone());
        self.store.upsert_keyword(&keyword)?;
        info!(
            keyword_id = %keyword.id,
            name = %keyword.canonical_name,
            keyword_type = %keyword.keyword_type,
            "canonical keyword created"
        );
        Ok(Resolution {
            keyword_id: keyword.id,
            decision,
        })
    }

    fn merge(
        &self,
        keyword: &mut CanonicalKeyword,
        mention: &KeywordMention,
        embedding: &[f32],
    ) -> Result<(), ResolveError> {
        keyword.add_alias(mention.surface_form.clone());
        if mention.canonical_name_guess != keyword.canonical_name {
            keyword.add_alias(mention.canonical_name_guess.clone());
        }
        keyword.absorb_embedding(embedding);
        keyword.touch();
        self.store.upsert_keyword(keyword)?;
        Ok(())
    }

    async fn embedding_for(&self, mention: &KeywordMention) -> Result<Vec<f32>, ResolveError> {
        let expected = self.store.embedding_dimensions();
        if let Some(embedding) = &mention.embedding {
            if embedding.len() != expected {
                return Err(ResolveError::InvalidMention(format!(
                    "embedding for '{}' has {} dimensions, store expects {}",
                    mention.surface_form,
                    embedding.len(),
                    expected
                )));
            }
            return Ok(embedding.clone());
        }

        let text = mention.embedding_text().to_string();
        let embedding = self
            .config
            .retry
            .run("embed", EmbeddingError::is_transient, || {
                let embedder = Arc::clone(&self.embedder);
                let text = text.clone();
                async move {
                    match tokio::task::spawn_blocking(move || embedder.embed(&text)).await {
                        Ok(result) => result,
                        Err(e) => Err(EmbeddingError::Unavailable(e.to_string())),
                    }
                }
            })
            .await?;

        if embedding.len() != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            }
            .into());
        }
        Ok(embedding)
    }

    fn record(&self, mention: &KeywordMention, candidates: Vec<Candidate>, resolution: &Resolution) {
        info!(
            surface = %mention.surface_form,
            keyword_id = %resolution.keyword_id,
            candidates = candidates.len(),
            decision = ?resolution.decision,
            "assisted decision"
        );
        let entry = AssistedDecision {
            surface_form: mention.surface_form.clone(),
            canonical_name_guess: mention.canonical_name_guess.clone(),
            keyword_type: mention.keyword_type,
            candidates,
            outcome: resolution.decision.clone(),
            keyword_id: resolution.keyword_id.clone(),
            decided_at: Utc::now(),
        };
        if let Ok(mut log) = self.decisions.lock() {
            if log.len() == DECISION_LOG_CAPACITY {
                log.pop_front();
            }
            log.push_back(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ArticleId, KeywordCategory};
    use crate::resolve::assist::{AssistError, NoAssist};
    use crate::storage::{KeywordStore, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CallCounter(Arc<AtomicUsize>);

    impl CallCounter {
        fn get(&self) -> usize {
            self.0.load(Ordering::Relaxed)
        }
        fn increment(&self) -> usize {
            self.0.fetch_add(1, Ordering::Relaxed) + 1
        }
    }

    /// Returns `vector` for every text; fails the first `failures` calls
    struct MockEmbedder {
        vector: Vec<f32>,
        failures: usize,
        calls: CallCounter,
    }

    impl Embedder for MockEmbedder {
        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let n = self.calls.increment();
            if n <= self.failures {
                return Err(EmbeddingError::Unavailable("rate limited".into()));
            }
            Ok(texts.iter().map(|_| self.vector.clone()).collect())
        }
    }

    struct FixedAssist {
        verdict: Result<Verdict, AssistError>,
        calls: CallCounter,
    }

    #[async_trait]
    impl CanonicalizationAssist for FixedAssist {
        async fn disambiguate(
            &self,
            _mention: &KeywordMention,
            _candidates: &[Candidate],
        ) -> Result<Verdict, AssistError> {
            self.calls.increment();
            self.verdict.clone()
        }
    }

    fn mention(surface: &str, guess: &str, embedding: Option<Vec<f32>>) -> KeywordMention {
        KeywordMention {
            surface_form: surface.to_string(),
            canonical_name_guess: guess.to_string(),
            keyword_type: KeywordType::Entity,
            category: KeywordCategory::Person,
            embedding,
            article_id: ArticleId::from("article"),
            relevance: 1.0,
        }
    }

    fn resolver_with(
        store: Arc<MemoryStore>,
        embedder: Arc<dyn Embedder>,
        assist: Arc<dyn CanonicalizationAssist>,
    ) -> EntityResolver {
        let config = ResolverConfig {
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..ResolverConfig::default()
        };
        EntityResolver::new(store, embedder, assist, config)
    }

    fn simple_resolver(store: Arc<MemoryStore>) -> EntityResolver {
        let embedder = Arc::new(MockEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            failures: 0,
            calls: CallCounter::default(),
        });
        resolver_with(store, embedder, Arc::new(NoAssist))
    }

    fn seed(store: &MemoryStore, name: &str, embedding: Vec<f32>) -> CanonicalKeyword {
        let kw = CanonicalKeyword::new(name, KeywordType::Entity, KeywordCategory::Person, embedding)
            .with_alias(name);
        store.upsert_keyword(&kw).unwrap();
        kw
    }

    #[tokio::test]
    async fn first_mention_creates_keyword_with_surface_alias() {
        let store = Arc::new(MemoryStore::new(3));
        let resolver = simple_resolver(store.clone());

        let res = resolver
            .resolve(&mention("Trump", "Donald Trump", Some(vec![1.0, 0.0, 0.0])))
            .await
            .unwrap();
        assert_eq!(res.decision, Decision::Created);

        let kw = store.get_keyword(&res.keyword_id).unwrap().unwrap();
        assert_eq!(kw.canonical_name, "Donald Trump");
        assert_eq!(kw.aliases, vec!["Trump"]);
    }

    #[tokio::test]
    async fn merge_above_threshold_updates_aliases_and_embedding() {
        let store = Arc::new(MemoryStore::new(2));
        let existing = seed(&store, "Donald Trump", vec![1.0, 0.0]);
        let resolver = simple_resolver(store.clone());

        let m = vec![0.92, (1.0f32 - 0.92 * 0.92).sqrt()];
        let res = resolver
            .resolve(&mention("President Trump", "Donald Trump", Some(m.clone())))
            .await
            .unwrap();
        assert_eq!(res.keyword_id, existing.id);
        match res.decision {
            Decision::Merged { similarity } => assert!((similarity - 0.92).abs() < 1e-4),
            other => panic!("expected merge, got {other:?}"),
        }

        let kw = store.get_keyword(&existing.id).unwrap().unwrap();
        assert!(kw.has_alias("President Trump"));
        assert_eq!(kw.mention_count, 2);
        assert!((kw.embedding[0] - (1.0 + 0.92) / 2.0).abs() < 1e-5);
        assert!((kw.embedding[1] - m[1] / 2.0).abs() < 1e-5);
        assert_eq!(store.keyword_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn below_threshold_creates_new() {
        let store = Arc::new(MemoryStore::new(2));
        seed(&store, "Paris", vec![1.0, 0.0]);
        let resolver = simple_resolver(store.clone());

        let res = resolver
            .resolve(&mention("Berlin", "Berlin", Some(vec![0.6, 0.8])))
            .await
            .unwrap();
        assert_eq!(res.decision, Decision::Created);
        assert_eq!(store.keyword_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn exact_name_below_threshold_merges_by_name() {
        let store = Arc::new(MemoryStore::new(2));
        let paris = seed(&store, "Paris", vec![1.0, 0.0]);
        let resolver = simple_resolver(store.clone());

        let res = resolver
            .resolve(&mention("paris", "PARIS", Some(vec![0.0, 1.0])))
            .await
            .unwrap();
        assert_eq!(res.keyword_id, paris.id);
        assert_eq!(res.decision, Decision::NameMatch);
        assert_eq!(store.keyword_count().unwrap(), 1);
    }

    fn tied_store() -> (Arc<MemoryStore>, CanonicalKeyword, CanonicalKeyword) {
        let store = Arc::new(MemoryStore::new(3));
        let a = seed(&store, "European Commission", vec![0.95, (1.0f32 - 0.9025).sqrt(), 0.0]);
        let b = seed(&store, "European Council", vec![0.945, 0.0, (1.0f32 - 0.945 * 0.945).sqrt()]);
        (store, a, b)
    }

    #[tokio::test]
    async fn tie_goes_to_assist_and_verdict_is_authoritative() {
        let (store, _a, b) = tied_store();
        let calls = CallCounter::default();
        let assist = Arc::new(FixedAssist {
            verdict: Ok(Verdict::Existing(b.id.clone())),
            calls: calls.clone(),
        });
        let embedder = Arc::new(MockEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            failures: 0,
            calls: CallCounter::default(),
        });
        let resolver = resolver_with(store.clone(), embedder, assist);

        let res = resolver
            .resolve(&mention("EU Council", "EU Council", Some(vec![1.0, 0.0, 0.0])))
            .await
            .unwrap();
        assert_eq!(res.keyword_id, b.id);
        assert_eq!(
            res.decision,
            Decision::Assisted {
                verdict: Verdict::Existing(b.id.clone())
            }
        );
        assert_eq!(calls.get(), 1);

        let log = resolver.assisted_decisions();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].candidates.len(), 2);
        assert_eq!(log[0].keyword_id, b.id);
    }

    #[tokio::test]
    async fn unavailable_assist_falls_back_to_create() {
        let (store, _, _) = tied_store();
        let resolver = simple_resolver(store.clone());

        let res = resolver
            .resolve(&mention("EU Body", "EU Body", Some(vec![1.0, 0.0, 0.0])))
            .await
            .unwrap();
        assert!(matches!(res.decision, Decision::AssistFallback { .. }));
        assert!(res.decision.created_keyword());
        assert_eq!(store.keyword_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn verdict_outside_candidates_falls_back_to_create() {
        let (store, _, _) = tied_store();
        let assist = Arc::new(FixedAssist {
            verdict: Ok(Verdict::Existing(KeywordId::from("somewhere-else"))),
            calls: CallCounter::default(),
        });
        let embedder = Arc::new(MockEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            failures: 0,
            calls: CallCounter::default(),
        });
        let resolver = resolver_with(store.clone(), embedder, assist);

        let res = resolver
            .resolve(&mention("EU Body", "EU Body", Some(vec![1.0, 0.0, 0.0])))
            .await
            .unwrap();
        assert!(matches!(res.decision, Decision::AssistFallback { .. }));
        assert_eq!(store.keyword_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn assisted_new_never_merges_by_name() {
        let (store, a, _) = tied_store();
        let assist = Arc::new(FixedAssist {
            verdict: Ok(Verdict::New),
            calls: CallCounter::default(),
        });
        let embedder = Arc::new(MockEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            failures: 0,
            calls: CallCounter::default(),
        });
        let resolver = resolver_with(store.clone(), embedder, assist);

        let res = resolver
            .resolve(&mention(
                "the Commission",
                "European Commission",
                Some(vec![1.0, 0.0, 0.0]),
            ))
            .await
            .unwrap();
        assert_eq!(
            res.decision,
            Decision::Assisted {
                verdict: Verdict::New
            }
        );
        assert_ne!(res.keyword_id, a.id);
        assert_eq!(store.keyword_count().unwrap(), 3);

        let created = store.get_keyword(&res.keyword_id).unwrap().unwrap();
        assert_eq!(created.canonical_name, "European Commission (2)");
        assert!(created.has_alias("the Commission"));
        let untouched = store.get_keyword(&a.id).unwrap().unwrap();
        assert!(!untouched.has_alias("the Commission"));
        assert_eq!(untouched.mention_count, 1);
    }

    /// Fails with `Unavailable` for the first `failures` calls, then answers
    struct FlakyAssist {
        verdict: Verdict,
        failures: usize,
        calls: CallCounter,
    }

    #[async_trait]
    impl CanonicalizationAssist for FlakyAssist {
        async fn disambiguate(
            &self,
            _mention: &KeywordMention,
            _candidates: &[Candidate],
        ) -> Result<Verdict, AssistError> {
            if self.calls.increment() <= self.failures {
                return Err(AssistError::Unavailable("503".into()));
            }
            Ok(self.verdict.clone())
        }
    }

    #[tokio::test]
    async fn transient_assist_failure_is_retried() {
        let (store, _, b) = tied_store();
        let calls = CallCounter::default();
        let assist = Arc::new(FlakyAssist {
            verdict: Verdict::Existing(b.id.clone()),
            failures: 1,
            calls: calls.clone(),
        });
        let embedder = Arc::new(MockEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            failures: 0,
            calls: CallCounter::default(),
        });
        let resolver = resolver_with(store.clone(), embedder, assist);

        let res = resolver
            .resolve(&mention("EU Council", "EU Council", Some(vec![1.0, 0.0, 0.0])))
            .await
            .unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(res.keyword_id, b.id);
        assert_eq!(store.keyword_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn assist_retries_stop_at_budget_then_create() {
        let (store, _, b) = tied_store();
        let calls = CallCounter::default();
        let assist = Arc::new(FlakyAssist {
            verdict: Verdict::Existing(b.id.clone()),
            failures: usize::MAX,
            calls: calls.clone(),
        });
        let embedder = Arc::new(MockEmbedder {
            vector: vec![1.0, 0.0, 0.0],
            failures: 0,
            calls: CallCounter::default(),
        });
        let resolver = resolver_with(store.clone(), embedder, assist);

        let res = resolver
            .resolve(&mention("EU Body", "EU Body", Some(vec![1.0, 0.0, 0.0])))
            .await
            .unwrap();
        assert_eq!(calls.get(), 3);
        assert!(matches!(res.decision, Decision::AssistFallback { .. }));
        assert_eq!(store.keyword_count().unwrap(), 3);
    }

    #[tokio::test]
    async fn unambiguous_match_never_calls_assist() {
        let store = Arc::new(MemoryStore::new(2));
        seed(&store, "NATO", vec![1.0, 0.0]);
        let calls = CallCounter::default();
        let assist = Arc::new(FixedAssist {
            verdict: Ok(Verdict::New),
            calls: calls.clone(),
        });
        let embedder = Arc::new(MockEmbedder {
            vector: vec![1.0, 0.0],
            failures: 0,
            calls: CallCounter::default(),
        });
        let resolver = resolver_with(store, embedder, assist);
        resolver
            .resolve(&mention("Nato", "NATO", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn embedder_called_only_without_supplied_embedding() {
        let store = Arc::new(MemoryStore::new(2));
        let calls = CallCounter::default();
        let embedder = Arc::new(MockEmbedder {
            vector: vec![0.0, 1.0],
            failures: 0,
            calls: calls.clone(),
        });
        let resolver = resolver_with(store, embedder, Arc::new(NoAssist));

        resolver
            .resolve(&mention("A", "A", Some(vec![1.0, 0.0])))
            .await
            .unwrap();
        assert_eq!(calls.get(), 0);

        resolver.resolve(&mention("B", "B", None)).await.unwrap();
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn transient_embedding_failures_are_retried() {
        let store = Arc::new(MemoryStore::new(2));
        let calls = CallCounter::default();
        let embedder = Arc::new(MockEmbedder {
            vector: vec![0.0, 1.0],
            failures: 2,
            calls: calls.clone(),
        });
        let resolver = resolver_with(store, embedder, Arc::new(NoAssist));

        let res = resolver.resolve(&mention("B", "B", None)).await.unwrap();
        assert_eq!(res.decision, Decision::Created);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn persistent_embedding_failure_is_transient_error() {
        let store = Arc::new(MemoryStore::new(2));
        let embedder = Arc::new(MockEmbedder {
            vector: vec![0.0, 1.0],
            failures: usize::MAX,
            calls: CallCounter::default(),
        });
        let resolver = resolver_with(store.clone(), embedder, Arc::new(NoAssist));

        let err = resolver.resolve(&mention("B", "B", None)).await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(store.keyword_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn wrong_dimension_is_invalid_mention() {
        let store = Arc::new(MemoryStore::new(3));
        let resolver = simple_resolver(store);
        let err = resolver
            .resolve(&mention("A", "A", Some(vec![1.0, 0.0])))
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidMention(_)));
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let store = Arc::new(MemoryStore::new(2));
        let resolver = simple_resolver(store.clone());
        let m = mention("EU", "European Union", Some(vec![0.3, 0.7]));

        let first = resolver.resolve(&m).await.unwrap();
        let second = resolver.resolve(&m).await.unwrap();
        assert_eq!(first.keyword_id, second.keyword_id);
        assert_eq!(store.keyword_count().unwrap(), 1);
        let kw = store.get_keyword(&first.keyword_id).unwrap().unwrap();
        assert_eq!(kw.aliases, vec!["EU"]);
        assert_eq!(kw.mention_count, 2);
    }
}
