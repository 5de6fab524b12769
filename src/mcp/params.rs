//! MCP tool parameter structs with schemars-derived JSON schemas.

use schemars::JsonSchema;
use serde::Deserialize;

// ── Query params ────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct GraphParams {
    #[schemars(description = "Earliest publication time, inclusive (RFC 3339 or YYYY-MM-DD)")]
    pub from: Option<String>,
    #[schemars(description = "Latest publication time, exclusive (RFC 3339 or YYYY-MM-DD)")]
    pub to: Option<String>,
    #[schemars(
        description = "Article categories to include: politics, business, sports, entertainment, technology, health_science, world"
    )]
    pub categories: Option<Vec<String>>,
    #[schemars(description = "Keyword types to include: entity, concept")]
    pub keyword_types: Option<Vec<String>>,
    #[schemars(description = "Minimum co-occurrence weight for an edge (default 1)")]
    pub min_weight: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct KeywordIdParams {
    #[schemars(description = "The canonical keyword ID")]
    pub keyword_id: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListKeywordsParams {
    #[schemars(description = "Restrict to one keyword type: entity or concept")]
    pub keyword_type: Option<String>,
    #[schemars(description = "Case-insensitive substring of the canonical name or an alias")]
    pub name_contains: Option<String>,
    #[schemars(description = "Maximum number of keywords to return (default 100)")]
    pub limit: Option<usize>,
}

// ── Ingestion and maintenance params ────────────────────────────────────

#[derive(Debug, Deserialize, JsonSchema)]
pub struct IngestParams {
    #[schemars(
        description = "Article submissions: {url, title, publishedAt, source, extraction: {articleCategory, keywords: [{name, canonicalNameGuess, type, category, embedding?}]}}"
    )]
    pub articles: Vec<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ExpireParams {
    #[schemars(description = "Expire articles whose deadline is before this time (default now)")]
    pub before: Option<String>,
}
