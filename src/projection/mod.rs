//! Projection: derived keyword co-occurrence views
//!
//! Co-occurrence is never persisted. It is recomputed from the committed
//! article/keyword join for a filter and cached until the store changes.

mod engine;

pub use engine::ProjectionEngine;

use crate::model::{ArticleCategory, ArticleId, KeywordCategory, KeywordId, KeywordType};
use crate::storage::GraphFilter;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Filter over the co-occurrence projection (same shape as the store filter)
pub type ProjectionFilter = GraphFilter;

/// Two keywords that appear together, `a < b`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoOccurrence {
    pub a: KeywordId,
    pub b: KeywordId,
    /// Number of distinct qualifying articles containing both
    pub weight: usize,
    /// Supporting articles, sorted
    pub article_ids: Vec<ArticleId>,
}

/// Node of the exposed co-occurrence document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: KeywordId,
    pub canonical_name: String,
    #[serde(rename = "type")]
    pub keyword_type: KeywordType,
    pub category: KeywordCategory,
    /// Qualifying articles carrying this keyword
    pub article_count: usize,
}

/// Edge of the exposed co-occurrence document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: KeywordId,
    pub target: KeywordId,
    pub weight: usize,
    pub article_ids: Vec<ArticleId>,
}

impl From<CoOccurrence> for GraphEdge {
    fn from(pair: CoOccurrence) -> Self {
        Self {
            source: pair.a,
            target: pair.b,
            weight: pair.weight,
            article_ids: pair.article_ids,
        }
    }
}

/// `{nodes, edges}` document served to visualization clients
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoOccurrenceGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl CoOccurrenceGraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Build a filter from textual query parameters.
///
/// Dates are RFC 3339 timestamps or `YYYY-MM-DD` (midnight UTC).
pub fn parse_filter(
    from: Option<&str>,
    to: Option<&str>,
    categories: &[String],
    keyword_types: &[String],
) -> Result<ProjectionFilter, String> {
    let mut filter = ProjectionFilter::new();
    filter.published_from = from.map(parse_instant).transpose()?;
    filter.published_to = to.map(parse_instant).transpose()?;
    for category in categories {
        let category: ArticleCategory = category.parse().map_err(|e| format!("{e}"))?;
        filter = filter.with_category(category);
    }
    for keyword_type in keyword_types {
        let keyword_type: KeywordType = keyword_type.parse().map_err(|e| format!("{e}"))?;
        filter = filter.with_keyword_type(keyword_type);
    }
    Ok(filter)
}

fn parse_instant(text: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("invalid date {text:?}: expected RFC 3339 or YYYY-MM-DD"))
}
