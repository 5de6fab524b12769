//! wordtrace: keyword entity resolution and co-occurrence graph engine
//!
//! News articles arrive with keywords already extracted. Each keyword
//! mention is resolved to a canonical keyword by embedding similarity, the
//! article/keyword relation is stored as a bipartite graph, and keyword
//! co-occurrence is projected on demand for visualization.
//!
//! # Core Concepts
//!
//! - **Canonical keywords**: deduplicated entities and concepts with aliases
//!   and a representative embedding
//! - **Articles**: time-bounded carriers of keyword edges, expired after the
//!   retention window
//! - **Co-occurrence**: keyword pairs weighted by the number of articles
//!   they share, never persisted
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use wordtrace::{EngineConfig, Engine, MemoryStore, NoAssist, NoEmbedder};
//!
//! let engine = Engine::new(
//!     Arc::new(MemoryStore::new(768)),
//!     Arc::new(NoEmbedder),
//!     Arc::new(NoAssist),
//!     EngineConfig::default(),
//! );
//! // Engine is ready for use
//! ```

pub mod config;
mod engine;
pub mod index;
pub mod mcp;
pub mod model;
pub mod pipeline;
pub mod projection;
pub mod resolve;
pub mod storage;

pub use config::{ConfigError, EngineConfig};
pub use engine::{default_embedder, Engine};
pub use model::{
    Article, ArticleCategory, ArticleId, ArticleState, ArticleSubmission, CanonicalKeyword,
    ExtractedKeyword, ExtractionResult, KeywordCategory, KeywordId, KeywordMention,
    KeywordSummary, KeywordType, ValidationError,
};
pub use pipeline::{
    BatchReport, CancellationToken, Orchestrator, OrchestratorConfig, PipelineError,
    RetentionSweeper,
};
pub use projection::{parse_filter, CoOccurrence, CoOccurrenceGraph, ProjectionEngine, ProjectionFilter};
pub use resolve::{
    CanonicalizationAssist, Embedder, EntityResolver, NoAssist, NoEmbedder, Reconciler,
    ResolveError, ResolverConfig, RetryPolicy,
};
pub use storage::{
    GraphFilter, GraphStore, KeywordStore, MemoryStore, OpenStore, SqliteStore, StorageError,
    StorageResult, Store,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
