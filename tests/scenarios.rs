//! End-to-end behaviour: merge by similarity, co-occurrence from two
//! articles, concurrent first mentions, and expiry around in-flight commits.

mod common;

use chrono::{Duration, Utc};
use common::*;
use std::sync::Arc;
use wordtrace::resolve::{Decision, Verdict};
use wordtrace::storage::KeywordEdge;
use wordtrace::{
    Article, ArticleCategory, ArticleState, CanonicalKeyword, EntityResolver, GraphFilter,
    GraphStore, KeywordCategory, KeywordId, KeywordStore, KeywordType, MemoryStore, NoAssist,
    NoEmbedder, OpenStore, Orchestrator, OrchestratorConfig, ProjectionEngine, Reconciler,
    ResolverConfig, RetentionSweeper, SqliteStore, Store,
};

#[tokio::test]
async fn close_mention_merges_into_existing_keyword() {
    let store = Arc::new(MemoryStore::new(2));
    let trump = CanonicalKeyword::new(
        "Donald Trump",
        KeywordType::Entity,
        KeywordCategory::Person,
        vec![1.0, 0.0],
    )
    .with_alias("Donald Trump");
    store.upsert_keyword(&trump).unwrap();

    let resolver = resolver(store.clone(), Arc::new(NoEmbedder), Arc::new(NoAssist));
    let resolution = resolver
        .resolve(&mention(
            "President Trump",
            "Donald Trump",
            KeywordCategory::Person,
            with_similarity(0.92),
        ))
        .await
        .unwrap();

    assert_eq!(resolution.keyword_id, trump.id);
    match resolution.decision {
        Decision::Merged { similarity } => assert!((similarity - 0.92).abs() < 1e-3),
        other => panic!("expected a merge, got {other:?}"),
    }
    let stored = store.get_keyword(&trump.id).unwrap().unwrap();
    assert!(stored.has_alias("President Trump"));
    assert_eq!(stored.mention_count, 2);
    assert_eq!(store.keyword_count().unwrap(), 1);
}

#[tokio::test]
async fn distant_mention_creates_a_keyword() {
    let store = Arc::new(MemoryStore::new(2));
    let resolver = resolver(store.clone(), Arc::new(NoEmbedder), Arc::new(NoAssist));
    let first = resolver
        .resolve(&mention("Donald Trump", "Donald Trump", KeywordCategory::Person, vec![1.0, 0.0]))
        .await
        .unwrap();
    let second = resolver
        .resolve(&mention(
            "Melania Trump",
            "Melania Trump",
            KeywordCategory::Person,
            with_similarity(0.80),
        ))
        .await
        .unwrap();

    assert_eq!(second.decision, Decision::Created);
    assert_ne!(first.keyword_id, second.keyword_id);
    assert_eq!(store.keyword_count().unwrap(), 2);
}

#[tokio::test]
async fn two_articles_project_to_two_edges() {
    let store = Arc::new(MemoryStore::new(3));
    let resolver = Arc::new(resolver(store.clone(), Arc::new(NoEmbedder), Arc::new(NoAssist)));
    let orchestrator = Orchestrator::new(store.clone(), resolver, OrchestratorConfig::default());
    let now = Utc::now();

    let k1 = entity("K1", "person", vec![1.0, 0.0, 0.0]);
    let k2 = entity("K2", "person", vec![0.0, 1.0, 0.0]);
    let k3 = entity("K3", "person", vec![0.0, 0.0, 1.0]);
    orchestrator
        .process_article(&submission("https://a1", "politics", now, vec![k1, k2.clone()]))
        .await
        .unwrap();
    orchestrator
        .process_article(&submission("https://a2", "politics", now, vec![k2, k3]))
        .await
        .unwrap();

    let graph = ProjectionEngine::new(store.clone())
        .co_occurrence_graph(&GraphFilter::new(), 1)
        .unwrap();
    let name = |id: &KeywordId| {
        graph
            .nodes
            .iter()
            .find(|n| &n.id == id)
            .map(|n| n.canonical_name.clone())
            .unwrap()
    };
    let mut pairs: Vec<(String, String, usize)> = graph
        .edges
        .iter()
        .map(|e| {
            let (a, b) = (name(&e.source), name(&e.target));
            let (a, b) = if a < b { (a, b) } else { (b, a) };
            (a, b, e.weight)
        })
        .collect();
    pairs.sort();

    assert_eq!(
        pairs,
        vec![
            ("K1".to_string(), "K2".to_string(), 1),
            ("K2".to_string(), "K3".to_string(), 1),
        ]
    );
    assert_eq!(graph.nodes.len(), 3);
}

/// Eight concurrent mentions of one organisation; `guess` picks each
/// mention's canonical-name guess from its surface form
async fn concurrent_first_mentions(store: Arc<dyn Store>, guess: fn(&'static str) -> &'static str) {
    let resolver = Arc::new(resolver(store.clone(), Arc::new(NoEmbedder), Arc::new(NoAssist)));

    let mut tasks = Vec::new();
    for i in 0..8 {
        let resolver = resolver.clone();
        let (surface, embedding) = if i % 2 == 0 {
            ("EU Commission", at_angle(0.0))
        } else {
            ("European Commission", with_similarity(0.95))
        };
        tasks.push(tokio::spawn(async move {
            resolver
                .resolve(&mention(
                    surface,
                    guess(surface),
                    KeywordCategory::Organization,
                    embedding,
                ))
                .await
                .map(|r| r.keyword_id)
        }));
    }

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 1, "every mention must land on one keyword");

    let keywords = store.list_keywords(Some(KeywordType::Entity)).unwrap();
    assert_eq!(keywords.len(), 1);
    assert!(keywords[0].has_alias("EU Commission"));
    assert!(keywords[0].has_alias("European Commission"));
    assert_eq!(keywords[0].mention_count, 8);
}

fn shared_guess(_surface: &'static str) -> &'static str {
    "European Commission"
}

fn own_guess(surface: &'static str) -> &'static str {
    surface
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_mentions_create_one_keyword_in_memory() {
    concurrent_first_mentions(Arc::new(MemoryStore::new(2)), shared_guess).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_mentions_create_one_keyword_in_sqlite() {
    concurrent_first_mentions(Arc::new(SqliteStore::open_in_memory(2).unwrap()), shared_guess).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mentions_with_different_names_share_a_keyword_in_memory() {
    concurrent_first_mentions(Arc::new(MemoryStore::new(2)), own_guess).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_mentions_with_different_names_share_a_keyword_in_sqlite() {
    concurrent_first_mentions(Arc::new(SqliteStore::open_in_memory(2).unwrap()), own_guess).await;
}

#[tokio::test]
async fn expiry_waits_for_in_flight_commit() {
    let store = Arc::new(MemoryStore::new(2));
    let keyword = CanonicalKeyword::new(
        "Inflation",
        KeywordType::Concept,
        KeywordCategory::EconomicCrisis,
        vec![1.0, 0.0],
    );
    store.upsert_keyword(&keyword).unwrap();

    let now = Utc::now();
    let mut article = Article::new(
        "https://expiring",
        "Prices rise",
        ArticleCategory::Business,
        now - Duration::days(40),
        "wire",
    )
    .with_expiry(now - Duration::days(10));
    article.state = ArticleState::Extracting;
    store.begin_article(&article).unwrap();

    let sweeper = RetentionSweeper::new(store.clone());
    let first = sweeper.sweep_once(now).unwrap();
    assert_eq!(first.deferred, vec![article.id.clone()]);
    assert!(first.removed.is_empty());

    article.state = ArticleState::Stored;
    store
        .commit_article(&article, &[KeywordEdge::new(article.id.clone(), keyword.id.clone(), 0.7)])
        .unwrap();
    assert_eq!(store.edges_for_article(&article.id).unwrap().len(), 1);

    let second = sweeper.sweep_once(now).unwrap();
    assert_eq!(second.removed, vec![article.id.clone()]);
    assert_eq!(second.edges_removed, 1);
    assert!(store.get_article(&article.id).unwrap().is_none());
    assert!(store.edges_for_article(&article.id).unwrap().is_empty());
    assert!(store.get_keyword(&keyword.id).unwrap().is_some(), "keywords outlive articles");
}

fn tie_store() -> (Arc<MemoryStore>, CanonicalKeyword, CanonicalKeyword) {
    let store = Arc::new(MemoryStore::new(2));
    let left = CanonicalKeyword::new("Georgia (country)", KeywordType::Entity, KeywordCategory::Place, at_angle(12.0));
    let right = CanonicalKeyword::new("Georgia (US state)", KeywordType::Entity, KeywordCategory::Place, at_angle(-12.0));
    store.upsert_keyword(&left).unwrap();
    store.upsert_keyword(&right).unwrap();
    (store, left, right)
}

fn strict_config() -> ResolverConfig {
    ResolverConfig {
        similarity_threshold: 0.97,
        ..resolver_config()
    }
}

#[tokio::test]
async fn tie_is_settled_by_the_assist() {
    let (store, _left, right) = tie_store();
    let assist = Arc::new(ScriptedAssist::answering(Verdict::Existing(right.id.clone())));
    let resolver = EntityResolver::new(
        store.clone(),
        Arc::new(NoEmbedder),
        assist.clone(),
        strict_config(),
    );

    let resolution = resolver
        .resolve(&mention("Georgia", "Georgia", KeywordCategory::Place, vec![1.0, 0.0]))
        .await
        .unwrap();

    assert_eq!(assist.calls.get(), 1);
    assert_eq!(resolution.keyword_id, right.id);
    assert!(matches!(resolution.decision, Decision::Assisted { .. }));
    assert_eq!(resolver.assisted_decisions().len(), 1);
    assert!(store.get_keyword(&right.id).unwrap().unwrap().has_alias("Georgia"));
}

#[tokio::test]
async fn failed_assist_creates_then_reconcile_converges() {
    let (store, left, right) = tie_store();
    let resolver = EntityResolver::new(
        store.clone(),
        Arc::new(NoEmbedder),
        Arc::new(ScriptedAssist::failing()),
        strict_config(),
    );

    let resolution = resolver
        .resolve(&mention("Georgia", "Georgia", KeywordCategory::Place, vec![1.0, 0.0]))
        .await
        .unwrap();
    assert!(matches!(resolution.decision, Decision::AssistFallback { .. }));
    assert_eq!(store.keyword_count().unwrap(), 3);

    let reconciler = Reconciler::new(store.clone(), resolver.locks().clone(), 0.97, 5);
    let report = reconciler.run_once().await.unwrap();
    assert_eq!(report.merges.len(), 1);
    assert!([left.id.clone(), right.id.clone()].contains(&report.merges[0].survivor));
    assert_eq!(report.merges[0].absorbed, resolution.keyword_id);
    assert_eq!(store.keyword_count().unwrap(), 2);
}

#[tokio::test]
async fn concept_and_entity_never_merge() {
    let store = Arc::new(MemoryStore::new(2));
    let resolver = resolver(store.clone(), Arc::new(NoEmbedder), Arc::new(NoAssist));
    let entity = resolver
        .resolve(&mention("Apple", "Apple", KeywordCategory::Organization, vec![1.0, 0.0]))
        .await
        .unwrap();
    let concept = resolver
        .resolve(&mention("Apple", "Apple", KeywordCategory::Innovation, vec![1.0, 0.0]))
        .await
        .unwrap();
    assert_ne!(entity.keyword_id, concept.keyword_id);
    assert_eq!(store.list_keywords(Some(KeywordType::Concept)).unwrap().len(), 1);
}

#[tokio::test]
async fn assist_saying_new_is_honoured_despite_a_taken_name() {
    let store = Arc::new(MemoryStore::new(2));
    let left = CanonicalKeyword::new("Georgia", KeywordType::Entity, KeywordCategory::Place, at_angle(12.0));
    let right = CanonicalKeyword::new("Georgia (US state)", KeywordType::Entity, KeywordCategory::Place, at_angle(-12.0));
    store.upsert_keyword(&left).unwrap();
    store.upsert_keyword(&right).unwrap();

    let assist = Arc::new(ScriptedAssist::answering(Verdict::New));
    let resolver = EntityResolver::new(store.clone(), Arc::new(NoEmbedder), assist.clone(), strict_config());

    let resolution = resolver
        .resolve(&mention("Georgia", "Georgia", KeywordCategory::Place, vec![1.0, 0.0]))
        .await
        .unwrap();

    assert_eq!(assist.calls.get(), 1);
    assert_eq!(resolution.decision, Decision::Assisted { verdict: Verdict::New });
    assert_ne!(resolution.keyword_id, left.id);
    assert_eq!(store.keyword_count().unwrap(), 3);
    assert_eq!(store.get_keyword(&left.id).unwrap().unwrap().mention_count, 1);
    let created = store.get_keyword(&resolution.keyword_id).unwrap().unwrap();
    assert_eq!(created.canonical_name, "Georgia (2)");
}
