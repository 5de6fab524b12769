//! MCP server for wordtrace: exposes the co-occurrence graph, keyword
//! lookups, ingestion and maintenance via the Model Context Protocol.

pub mod params;

use params::*;
use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::model::{ArticleSubmission, KeywordId, KeywordSummary, KeywordType};
use crate::pipeline::{CancellationToken, PipelineError};
use crate::projection::parse_filter;
use crate::storage::{GraphFilter, GraphStore, KeywordStore};
use chrono::{DateTime, Utc};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler, ServiceExt,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

const DEFAULT_LIST_LIMIT: usize = 100;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ok_text(text: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn err_text(msg: String) -> Result<CallToolResult, McpError> {
    Ok(CallToolResult::error(vec![Content::text(msg)]))
}

fn ok_json<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    match serde_json::to_string_pretty(value) {
        Ok(text) => ok_text(text),
        Err(e) => err_text(format!("failed to serialize result: {e}")),
    }
}

// ---------------------------------------------------------------------------
// WordtraceMcpServer
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct WordtraceMcpServer {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl WordtraceMcpServer {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            tool_router: Self::tool_router(),
        }
    }

    // ── Query tools ─────────────────────────────────────────────────────

    #[tool(
        description = "Keyword co-occurrence graph for a time range, article categories and keyword types. Returns {nodes, edges}; edge weight is the number of articles sharing both keywords."
    )]
    fn co_occurrence_graph(
        &self,
        Parameters(p): Parameters<GraphParams>,
    ) -> Result<CallToolResult, McpError> {
        let filter = match parse_filter(
            p.from.as_deref(),
            p.to.as_deref(),
            p.categories.as_deref().unwrap_or_default(),
            p.keyword_types.as_deref().unwrap_or_default(),
        ) {
            Ok(f) => f,
            Err(e) => return err_text(e),
        };
        match self
            .engine
            .projection()
            .co_occurrence_graph(&filter, p.min_weight.unwrap_or(1))
        {
            Ok(graph) => ok_json(&graph),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Get a canonical keyword with its aliases and the articles that mention it")]
    fn get_keyword(
        &self,
        Parameters(p): Parameters<KeywordIdParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = KeywordId::from_string(p.keyword_id);
        let store = self.engine.store();
        let keyword = match store.get_keyword(&id) {
            Ok(Some(kw)) => kw,
            Ok(None) => return err_text(format!("keyword not found: {id}")),
            Err(e) => return err_text(e.to_string()),
        };
        match store.articles_for_keyword(&id, &GraphFilter::new()) {
            Ok(articles) => ok_json(&serde_json::json!({
                "keyword": KeywordSummary::from(&keyword),
                "article_ids": articles,
            })),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "List canonical keywords, optionally by type or name substring")]
    fn list_keywords(
        &self,
        Parameters(p): Parameters<ListKeywordsParams>,
    ) -> Result<CallToolResult, McpError> {
        let keyword_type = match p.keyword_type.as_deref().map(str::parse::<KeywordType>) {
            Some(Ok(t)) => Some(t),
            Some(Err(e)) => return err_text(e.to_string()),
            None => None,
        };
        let keywords = match self.engine.store().list_keywords(keyword_type) {
            Ok(k) => k,
            Err(e) => return err_text(e.to_string()),
        };
        let summaries: Vec<KeywordSummary> = keywords
            .iter()
            .map(KeywordSummary::from)
            .filter(|s| p.name_contains.as_deref().map_or(true, |n| s.matches_name(n)))
            .take(p.limit.unwrap_or(DEFAULT_LIST_LIMIT))
            .collect();
        ok_json(&summaries)
    }

    // ── Ingestion and maintenance tools ─────────────────────────────────

    #[tool(description = "Resolve and store a batch of articles with their extracted keywords")]
    async fn ingest_articles(
        &self,
        Parameters(p): Parameters<IngestParams>,
    ) -> Result<CallToolResult, McpError> {
        let mut submissions = Vec::with_capacity(p.articles.len());
        for (i, raw) in p.articles.into_iter().enumerate() {
            match serde_json::from_value::<ArticleSubmission>(raw) {
                Ok(s) => submissions.push(s),
                Err(e) => return err_text(format!("article {i}: {e}")),
            }
        }
        match self
            .engine
            .orchestrator()
            .run_batch(submissions, CancellationToken::new())
            .await
        {
            Ok(report) => ok_json(&report),
            Err(PipelineError::Halted { reason, report }) => err_text(format!(
                "batch halted: {reason}; {} articles committed before the halt",
                report.completed.len()
            )),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Remove articles past their retention deadline (keywords are kept)")]
    fn expire_articles(
        &self,
        Parameters(p): Parameters<ExpireParams>,
    ) -> Result<CallToolResult, McpError> {
        let cutoff = match p.before.as_deref() {
            Some(text) => match DateTime::parse_from_rfc3339(text) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => return err_text(format!("invalid timestamp {text:?}: {e}")),
            },
            None => Utc::now(),
        };
        match self.engine.sweeper().sweep_once(cutoff) {
            Ok(report) => ok_json(&report),
            Err(e) => err_text(e.to_string()),
        }
    }

    #[tool(description = "Merge canonical keywords whose embeddings are within the similarity threshold")]
    async fn reconcile_keywords(&self) -> Result<CallToolResult, McpError> {
        match self.engine.reconciler().run_once().await {
            Ok(report) => ok_json(&report),
            Err(e) => err_text(e.to_string()),
        }
    }
}

#[tool_handler]
impl ServerHandler for WordtraceMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "wordtrace MCP server: keyword co-occurrence graph over news articles, canonical keyword lookup, ingestion and maintenance"
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run_mcp_server(config: EngineConfig) -> i32 {
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };

    rt.block_on(async {
        let engine = match Engine::open(config) {
            Ok(engine) => Arc::new(engine),
            Err(e) => {
                error!(error = %e, "failed to open store");
                return 1;
            }
        };

        let cancel = CancellationToken::new();
        let background = engine.start_background(&cancel);
        let server = WordtraceMcpServer::new(engine);

        info!("wordtrace mcp server starting on stdio");

        let service = match server.serve(rmcp::transport::stdio()).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to start MCP server");
                cancel.cancel();
                return 1;
            }
        };

        let code = match service.waiting().await {
            Ok(_) => 0,
            Err(e) => {
                error!(error = %e, "MCP server error");
                1
            }
        };

        cancel.cancel();
        for handle in background {
            let _ = handle.await;
        }
        code
    })
}
