//! Per-article state machine and the batch worker pool

use super::{CancellationToken, PipelineError};
use crate::model::{
    Article, ArticleId, ArticleState, ArticleSubmission, KeywordId, KeywordMention,
};
use crate::resolve::{Decision, EntityResolver, ResolveError, RetryPolicy};
use crate::storage::{KeywordEdge, Store};
use chrono::Duration;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Articles processed concurrently in a batch
    pub workers: usize,
    /// Attempts per article, including the first
    pub max_article_attempts: u32,
    /// How long a committed article stays in the graph
    pub retention: Duration,
    /// Backoff between attempts at the same article
    pub article_backoff: RetryPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_article_attempts: 3,
            retention: Duration::days(30),
            article_backoff: RetryPolicy::default(),
        }
    }
}

/// A mention that was skipped
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MentionFailure {
    pub surface_form: String,
    pub reason: String,
}

/// Outcome of one committed article
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleReport {
    pub article_id: ArticleId,
    pub url: String,
    pub state: ArticleState,
    /// Distinct keywords linked to the article
    pub keyword_ids: Vec<KeywordId>,
    pub keywords_created: usize,
    pub assisted: usize,
    pub skipped: Vec<MentionFailure>,
    pub flagged: bool,
}

/// An article that ended in `Failed`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedArticle {
    pub article_id: Option<ArticleId>,
    pub url: String,
    pub attempts: u32,
    pub retryable: bool,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub completed: Vec<ArticleReport>,
    pub failed: Vec<FailedArticle>,
    /// Submissions never started because the run was cancelled or halted
    pub not_started: Vec<String>,
    pub cancelled: bool,
}

impl BatchReport {
    pub fn count_in_state(&self, state: ArticleState) -> usize {
        self.completed.iter().filter(|r| r.state == state).count()
    }
}

/// Drives articles through extraction validation, resolution and commit
pub struct Orchestrator {
    store: Arc<dyn Store>,
    resolver: Arc<EntityResolver>,
    config: OrchestratorConfig,
    in_flight: DashMap<ArticleId, ()>,
}

/// Removes the in-flight marker when an article run ends
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<ArticleId, ()>,
    id: ArticleId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.id);
    }
}

impl Orchestrator {
    pub fn new(store: Arc<dyn Store>, resolver: Arc<EntityResolver>, config: OrchestratorConfig) -> Self {
        Self {
            store,
            resolver,
            config,
            in_flight: DashMap::new(),
        }
    }

    pub fn resolver(&self) -> &Arc<EntityResolver> {
        &self.resolver
    }

    /// Run one article through the state machine and commit it.
    ///
    /// Failed mentions are skipped (`PartialSuccess`). Store failures and
    /// integrity violations fail the article and are returned as errors
    /// after the `Failed` state has been recorded.
    pub async fn process_article(
        &self,
        submission: &ArticleSubmission,
    ) -> Result<ArticleReport, PipelineError> {
        let article_id = submission.article_id();
        let category = submission
            .extraction
            .category()
            .map_err(|e| PipelineError::InvalidArticle {
                article_id: article_id.clone(),
                reason: e.to_string(),
            })?;

        if self.in_flight.insert(article_id.clone(), ()).is_some() {
            return Err(PipelineError::ArticleInFlight(article_id));
        }
        let _guard = InFlightGuard {
            in_flight: &self.in_flight,
            id: article_id.clone(),
        };

        let mut article = Article::new(
            submission.url.clone(),
            submission.title.clone(),
            category,
            submission.published_at,
            submission.source.clone(),
        )
        .with_retention(self.config.retention);

        self.advance(&mut article, ArticleState::Extracting)?;
        self.store
            .begin_article(&article)
            .map_err(|e| PipelineError::storage(&article_id, e))?;

        // Validate raw extraction output at the boundary
        let mut skipped = Vec::new();
        let mut mentions: Vec<KeywordMention> = Vec::new();
        for raw in &submission.extraction.keywords {
            let surface = raw.name.clone();
            match raw.clone().into_mention(&article_id) {
                Ok(mention) => mentions.push(mention),
                Err(e) => {
                    warn!(article_id = %article_id, surface = %surface, error = %e, "mention rejected");
                    skipped.push(MentionFailure {
                        surface_form: surface,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if let Err(e) = self.advance(&mut article, ArticleState::Resolving) {
            self.mark_failed(&mut article, false);
            return Err(e);
        }
        if let Err(e) = self.store.set_article_state(&article_id, article.state) {
            self.mark_failed(&mut article, true);
            return Err(PipelineError::storage(&article_id, e));
        }

        let mut linked: BTreeMap<KeywordId, f32> = BTreeMap::new();
        let mut keywords_created = 0;
        let mut assisted = 0;
        for mention in &mentions {
            match self.resolver.resolve(mention).await {
                Ok(resolution) => {
                    if resolution.decision.created_keyword() {
                        keywords_created += 1;
                    }
                    if matches!(resolution.decision, Decision::Assisted { .. }) {
                        assisted += 1;
                    }
                    let relevance = linked.entry(resolution.keyword_id).or_insert(mention.relevance);
                    if mention.relevance > *relevance {
                        *relevance = mention.relevance;
                    }
                }
                Err(ResolveError::DataIntegrity(reason)) => {
                    error!(article_id = %article_id, surface = %mention.surface_form, %reason, "integrity violation while resolving");
                    self.mark_failed(&mut article, false);
                    return Err(PipelineError::DataIntegrity { article_id, reason });
                }
                Err(ResolveError::Storage(e)) => {
                    warn!(article_id = %article_id, error = %e, "store failure while resolving");
                    self.mark_failed(&mut article, true);
                    return Err(PipelineError::storage(&article_id, e));
                }
                Err(e) => {
                    warn!(article_id = %article_id, surface = %mention.surface_form, error = %e, "mention skipped");
                    skipped.push(MentionFailure {
                        surface_form: mention.surface_form.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let final_state = if skipped.is_empty() {
            ArticleState::Stored
        } else {
            ArticleState::PartialSuccess
        };
        self.advance(&mut article, final_state)?;
        article.flagged = linked.is_empty() && !submission.extraction.keywords.is_empty();
        if article.flagged {
            warn!(article_id = %article_id, "no mention resolved; storing empty keyword set");
        }

        let edges: Vec<KeywordEdge> = linked
            .iter()
            .map(|(keyword_id, relevance)| {
                KeywordEdge::new(article_id.clone(), keyword_id.clone(), *relevance)
            })
            .collect();
        if let Err(e) = self.store.commit_article(&article, &edges) {
            let failure = PipelineError::storage(&article_id, e);
            if let PipelineError::DataIntegrity { reason, .. } = &failure {
                error!(article_id = %article_id, %reason, "commit rejected");
            }
            // The commit never happened, so the stored state is still Resolving
            article.state = ArticleState::Resolving;
            self.mark_failed(&mut article, failure.is_retryable());
            return Err(failure);
        }

        info!(
            article_id = %article_id,
            state = %article.state,
            keywords = edges.len(),
            created = keywords_created,
            skipped = skipped.len(),
            "article committed"
        );
        Ok(ArticleReport {
            article_id,
            url: article.url,
            state: article.state,
            keyword_ids: linked.into_keys().collect(),
            keywords_created,
            assisted,
            skipped,
            flagged: article.flagged,
        })
    }

    fn advance(&self, article: &mut Article, next: ArticleState) -> Result<(), PipelineError> {
        if !article.state.can_transition_to(next) {
            return Err(PipelineError::InvalidTransition {
                article_id: article.id.clone(),
                from: article.state,
                to: next,
            });
        }
        debug!(article_id = %article.id, from = %article.state, to = %next, "article state");
        article.state = next;
        Ok(())
    }

    /// Record `Failed` in the store; failures to do so are only logged
    fn mark_failed(&self, article: &mut Article, retryable: bool) {
        let failed = ArticleState::Failed { retryable };
        if self.advance(article, failed).is_err() {
            article.state = failed;
        }
        if let Err(e) = self.store.set_article_state(&article.id, failed) {
            warn!(article_id = %article.id, error = %e, "could not record failed state");
        }
    }

    /// Process a batch over the bounded worker pool.
    ///
    /// Retryable failures are re-queued with backoff up to
    /// `max_article_attempts`. Cancellation stops scheduling and lets
    /// in-flight articles finish. A failing store health check halts the
    /// run with `PipelineError::Halted` carrying the partial report.
    pub async fn run_batch(
        self: &Arc<Self>,
        submissions: Vec<ArticleSubmission>,
        cancel: CancellationToken,
    ) -> Result<BatchReport, PipelineError> {
        let workers = self.config.workers.max(1);
        let max_attempts = self.config.max_article_attempts.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let mut queue: VecDeque<(ArticleSubmission, u32)> =
            submissions.into_iter().map(|s| (s, 1)).collect();
        let mut tasks = JoinSet::new();
        let mut report = BatchReport::default();
        let mut halted: Option<String> = None;

        info!(articles = queue.len(), workers, "batch started");

        loop {
            while !queue.is_empty() && halted.is_none() && !cancel.is_cancelled() {
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                let Some((submission, attempt)) = queue.pop_front() else {
                    break;
                };
                let this = Arc::clone(self);
                tasks.spawn(async move {
                    let _permit = permit;
                    if attempt > 1 {
                        tokio::time::sleep(this.config.article_backoff.delay_for(attempt - 1)).await;
                    }
                    let result = this.process_article(&submission).await;
                    (submission, attempt, result)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (submission, attempt, result) = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "article task panicked");
                    report.failed.push(FailedArticle {
                        article_id: None,
                        url: String::new(),
                        attempts: 0,
                        retryable: false,
                        error: e.to_string(),
                    });
                    continue;
                }
            };

            match result {
                Ok(article) => report.completed.push(article),
                Err(e) => {
                    if matches!(e, PipelineError::Storage { .. }) {
                        if let Err(health) = self.store.health_check() {
                            error!(error = %health, "store health check failed; halting batch");
                            halted = Some(format!("store unavailable: {health}"));
                        }
                    }
                    if e.is_retryable() && attempt < max_attempts && halted.is_none() {
                        warn!(url = %submission.url, attempt, error = %e, "article failed; will retry");
                        queue.push_back((submission, attempt + 1));
                    } else {
                        if matches!(e, PipelineError::DataIntegrity { .. }) {
                            error!(url = %submission.url, error = %e, "article failed");
                        } else {
                            warn!(url = %submission.url, attempts = attempt, error = %e, "article failed");
                        }
                        report.failed.push(FailedArticle {
                            article_id: e.article_id().cloned(),
                            url: submission.url,
                            attempts: attempt,
                            retryable: e.is_retryable(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        report.not_started = queue.into_iter().map(|(s, _)| s.url).collect();
        report.cancelled = cancel.is_cancelled();

        if let Some(reason) = halted {
            return Err(PipelineError::Halted {
                reason,
                report: Box::new(report),
            });
        }
        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            not_started = report.not_started.len(),
            cancelled = report.cancelled,
            "batch finished"
        );
        Ok(report)
    }
}
