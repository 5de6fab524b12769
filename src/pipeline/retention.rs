//! Periodic removal of articles past their retention deadline

use super::CancellationToken;
use crate::storage::{ExpiryReport, StorageResult, Store};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct RetentionSweeper {
    store: Arc<dyn Store>,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Expire every terminal article whose deadline is before `now`.
    ///
    /// Keywords are never removed here, even when no article mentions them
    /// any more.
    pub fn sweep_once(&self, now: DateTime<Utc>) -> StorageResult<ExpiryReport> {
        let report = self.store.expire_articles_before(now)?;
        if report.removed.is_empty() && report.deferred.is_empty() {
            debug!(cutoff = %now, "retention sweep: nothing expired");
        } else {
            info!(
                cutoff = %now,
                removed = report.removed.len(),
                deferred = report.deferred.len(),
                edges_removed = report.edges_removed,
                "retention sweep"
            );
        }
        Ok(report)
    }

    /// Sweep every `interval` until cancelled
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once(Utc::now()) {
                            warn!(error = %e, "retention sweep failed");
                        }
                    }
                }
            }
            debug!("retention sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Article, ArticleCategory, ArticleState, CanonicalKeyword, KeywordCategory, KeywordType,
    };
    use crate::storage::{GraphFilter, GraphStore, KeywordEdge, KeywordStore, MemoryStore};
    use chrono::Duration as ChronoDuration;

    fn article(url: &str, expires_at: DateTime<Utc>, state: ArticleState) -> Article {
        let mut a = Article::new(url, url, ArticleCategory::Business, Utc::now(), "wire")
            .with_expiry(expires_at);
        a.state = state;
        a
    }

    #[test]
    fn expired_articles_and_edges_go_keywords_stay() {
        let store = Arc::new(MemoryStore::new(2));
        let kw = CanonicalKeyword::new("ACME", KeywordType::Entity, KeywordCategory::Organization, vec![1.0, 0.0]);
        store.upsert_keyword(&kw).unwrap();

        let now = Utc::now();
        let old = article("https://old", now - ChronoDuration::days(1), ArticleState::Stored);
        let fresh = article("https://fresh", now + ChronoDuration::days(1), ArticleState::Stored);
        for a in [&old, &fresh] {
            store
                .commit_article(a, &[KeywordEdge::new(a.id.clone(), kw.id.clone(), 1.0)])
                .unwrap();
        }

        let report = RetentionSweeper::new(store.clone()).sweep_once(now).unwrap();
        assert_eq!(report.removed, vec![old.id.clone()]);
        assert_eq!(report.edges_removed, 1);

        assert!(store.get_article(&old.id).unwrap().is_none());
        assert!(store.get_article(&fresh.id).unwrap().is_some());
        assert!(store.get_keyword(&kw.id).unwrap().is_some());
        assert_eq!(
            store.articles_for_keyword(&kw.id, &GraphFilter::new()).unwrap(),
            vec![fresh.id]
        );
    }

    #[test]
    fn in_flight_articles_are_deferred() {
        let store = Arc::new(MemoryStore::new(2));
        let now = Utc::now();
        let busy = article("https://busy", now - ChronoDuration::days(1), ArticleState::Resolving);
        store.begin_article(&busy).unwrap();

        let report = RetentionSweeper::new(store.clone()).sweep_once(now).unwrap();
        assert!(report.removed.is_empty());
        assert_eq!(report.deferred, vec![busy.id.clone()]);
        assert!(store.get_article(&busy.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_and_stops() {
        let store = Arc::new(MemoryStore::new(2));
        let old = article("https://old", Utc::now() - ChronoDuration::days(1), ArticleState::Stored);
        store.commit_article(&old, &[]).unwrap();

        let cancel = CancellationToken::new();
        let handle = Arc::new(RetentionSweeper::new(store.clone()))
            .spawn(Duration::from_millis(5), cancel.clone());
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should stop")
            .unwrap();

        assert!(store.get_article(&old.id).unwrap().is_none());
    }
}
