//! SQLite storage backend
//!
//! One database file holds canonical keywords, articles and the
//! `has_keyword` edge table. Nearest-neighbour search is delegated to a
//! `VectorIndex` that is rebuilt from the keyword rows when the store opens.

use super::traits::{
    ExpiryReport, GraphFilter, GraphStore, KeywordEdge, KeywordStore, OpenStore, StorageError,
    StorageResult,
};
use crate::index::{BruteForceIndex, VectorIndex};
use crate::model::{
    Article, ArticleCategory, ArticleId, ArticleState, CanonicalKeyword, KeywordCategory,
    KeywordId, KeywordType,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

const KEYWORD_COLUMNS: &str = "id, canonical_name, keyword_type, category, embedding_json, \
     aliases_json, mention_count, created_at, last_seen_at";

const ARTICLE_COLUMNS: &str = "id, url, title, category, published_at, source, expires_at, \
     state, flagged, committed_at";

/// SQLite-backed keyword and graph store
///
/// Thread-safe via internal mutex on the connection. Every multi-row write
/// runs inside a transaction, so an article's keyword set is either fully
/// visible or not at all.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    index: Box<dyn VectorIndex>,
    generation: AtomicU64,
}

/// Fixed-width UTC timestamps so that SQL string comparison orders correctly
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::DateParse(e.to_string()))
}

fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Raw keyword columns, decoded outside the rusqlite row closure
struct KeywordRow {
    id: String,
    canonical_name: String,
    keyword_type: String,
    category: String,
    embedding_json: String,
    aliases_json: String,
    mention_count: i64,
    created_at: String,
    last_seen_at: String,
}

impl KeywordRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            canonical_name: row.get(1)?,
            keyword_type: row.get(2)?,
            category: row.get(3)?,
            embedding_json: row.get(4)?,
            aliases_json: row.get(5)?,
            mention_count: row.get(6)?,
            created_at: row.get(7)?,
            last_seen_at: row.get(8)?,
        })
    }

    fn decode(self) -> StorageResult<CanonicalKeyword> {
        let keyword_type: KeywordType = self
            .keyword_type
            .parse()
            .map_err(|_| StorageError::DataIntegrity(format!("bad keyword type '{}'", self.keyword_type)))?;
        let category: KeywordCategory = self
            .category
            .parse()
            .map_err(|_| StorageError::DataIntegrity(format!("bad keyword category '{}'", self.category)))?;
        Ok(CanonicalKeyword {
            id: KeywordId::from_string(self.id),
            canonical_name: self.canonical_name,
            keyword_type,
            category,
            embedding: serde_json::from_str(&self.embedding_json)?,
            aliases: serde_json::from_str(&self.aliases_json)?,
            mention_count: self.mention_count.max(0) as u64,
            created_at: parse_ts(&self.created_at)?,
            last_seen_at: parse_ts(&self.last_seen_at)?,
        })
    }
}

struct ArticleRow {
    id: String,
    url: String,
    title: String,
    category: String,
    published_at: String,
    source: String,
    expires_at: String,
    state: String,
    flagged: bool,
    committed_at: Option<String>,
}

impl ArticleRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            category: row.get(3)?,
            published_at: row.get(4)?,
            source: row.get(5)?,
            expires_at: row.get(6)?,
            state: row.get(7)?,
            flagged: row.get(8)?,
            committed_at: row.get(9)?,
        })
    }

    fn decode(self) -> StorageResult<Article> {
        let category: ArticleCategory = self
            .category
            .parse()
            .map_err(|_| StorageError::DataIntegrity(format!("bad article category '{}'", self.category)))?;
        let state = ArticleState::parse(&self.state)
            .ok_or_else(|| StorageError::DataIntegrity(format!("bad article state '{}'", self.state)))?;
        Ok(Article {
            id: ArticleId::from_string(self.id),
            url: self.url,
            title: self.title,
            category,
            published_at: parse_ts(&self.published_at)?,
            source: self.source,
            expires_at: parse_ts(&self.expires_at)?,
            state,
            flagged: self.flagged,
            committed_at: self.committed_at.as_deref().map(parse_ts).transpose()?,
        })
    }
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS keywords (
                id TEXT PRIMARY KEY,
                canonical_name TEXT NOT NULL,
                name_key TEXT NOT NULL,
                keyword_type TEXT NOT NULL,
                category TEXT NOT NULL,
                embedding_json TEXT NOT NULL,
                aliases_json TEXT NOT NULL,
                mention_count INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                UNIQUE (keyword_type, name_key)
            );

            CREATE TABLE IF NOT EXISTS articles (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                category TEXT NOT NULL,
                published_at TEXT NOT NULL,
                source TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                state TEXT NOT NULL,
                flagged INTEGER NOT NULL DEFAULT 0,
                committed_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_articles_published ON articles(published_at);
            CREATE INDEX IF NOT EXISTS idx_articles_category ON articles(category);
            CREATE INDEX IF NOT EXISTS idx_articles_expires ON articles(expires_at);

            CREATE TABLE IF NOT EXISTS has_keyword (
                article_id TEXT NOT NULL,
                keyword_id TEXT NOT NULL,
                relevance REAL NOT NULL,
                extracted_at TEXT NOT NULL,
                PRIMARY KEY (article_id, keyword_id),
                FOREIGN KEY (article_id) REFERENCES articles(id) ON DELETE CASCADE,
                FOREIGN KEY (keyword_id) REFERENCES keywords(id)
            );

            CREATE INDEX IF NOT EXISTS idx_has_keyword_keyword ON has_keyword(keyword_id);

            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Open a store whose nearest-neighbour search goes through `index`.
    ///
    /// The index is filled from the persisted keyword rows before returning.
    pub fn open_with_index(path: impl AsRef<Path>, index: Box<dyn VectorIndex>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, index)
    }

    fn from_connection(conn: Connection, index: Box<dyn VectorIndex>) -> StorageResult<Self> {
        Self::init_schema(&conn)?;
        let store = Self {
            conn: Mutex::new(conn),
            index,
            generation: AtomicU64::new(0),
        };
        store.rebuild_index()?;
        Ok(store)
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StorageError::LockPoisoned("sqlite connection"))
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    fn rebuild_index(&self) -> StorageResult<()> {
        let keywords = self.list_keywords(None)?;
        for keyword in &keywords {
            self.index
                .insert(&keyword.id, keyword.keyword_type, &keyword.embedding)?;
        }
        tracing::debug!(keywords = keywords.len(), "vector index rebuilt");
        Ok(())
    }

    fn read_keyword(conn: &Connection, id: &KeywordId) -> StorageResult<Option<CanonicalKeyword>> {
        conn.query_row(
            &format!("SELECT {KEYWORD_COLUMNS} FROM keywords WHERE id = ?1"),
            params![id.as_str()],
            KeywordRow::read,
        )
        .optional()?
        .map(KeywordRow::decode)
        .transpose()
    }

    /// Upsert one keyword row, unioning aliases with whatever is stored
    fn write_keyword(conn: &Connection, keyword: &CanonicalKeyword) -> StorageResult<CanonicalKeyword> {
        let key = name_key(&keyword.canonical_name);
        let owner: Option<String> = conn
            .query_row(
                "SELECT id FROM keywords WHERE keyword_type = ?1 AND name_key = ?2",
                params![keyword.keyword_type.as_str(), key],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(owner) = owner {
            if owner != keyword.id.as_str() {
                return Err(StorageError::DataIntegrity(format!(
                    "{} '{}' already exists as {}",
                    keyword.keyword_type, keyword.canonical_name, owner
                )));
            }
        }

        let mut stored = keyword.clone();
        if let Some(existing) = Self::read_keyword(conn, &keyword.id)? {
            stored.aliases = existing.aliases;
            for alias in &keyword.aliases {
                stored.add_alias(alias.clone());
            }
        }

        conn.execute(
            "INSERT INTO keywords (id, canonical_name, name_key, keyword_type, category, \
                 embedding_json, aliases_json, mention_count, created_at, last_seen_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
                 canonical_name = excluded.canonical_name, \
                 name_key = excluded.name_key, \
                 keyword_type = excluded.keyword_type, \
                 category = excluded.category, \
                 embedding_json = excluded.embedding_json, \
                 aliases_json = excluded.aliases_json, \
                 mention_count = excluded.mention_count, \
                 created_at = excluded.created_at, \
                 last_seen_at = excluded.last_seen_at",
            params![
                stored.id.as_str(),
                stored.canonical_name,
                key,
                stored.keyword_type.as_str(),
                stored.category.as_str(),
                serde_json::to_string(&stored.embedding)?,
                serde_json::to_string(&stored.aliases)?,
                stored.mention_count as i64,
                fmt_ts(&stored.created_at),
                fmt_ts(&stored.last_seen_at),
            ],
        )?;
        Ok(stored)
    }

    fn write_article(conn: &Connection, article: &Article) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO articles (id, url, title, category, published_at, source, expires_at, \
                 state, flagged, committed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             ON CONFLICT(id) DO UPDATE SET \
                 url = excluded.url, \
                 title = excluded.title, \
                 category = excluded.category, \
                 published_at = excluded.published_at, \
                 source = excluded.source, \
                 expires_at = excluded.expires_at, \
                 state = excluded.state, \
                 flagged = excluded.flagged, \
                 committed_at = COALESCE(excluded.committed_at, articles.committed_at)",
            params![
                article.id.as_str(),
                article.url,
                article.title,
                article.category.as_str(),
                fmt_ts(&article.published_at),
                article.source,
                fmt_ts(&article.expires_at),
                article.state.as_str(),
                article.flagged,
                article.committed_at.as_ref().map(fmt_ts),
            ],
        )?;
        Ok(())
    }

    fn write_edge(conn: &Connection, edge: &KeywordEdge) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO has_keyword (article_id, keyword_id, relevance, extracted_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(article_id, keyword_id) DO UPDATE SET \
                 relevance = excluded.relevance, \
                 extracted_at = excluded.extracted_at",
            params![
                edge.article_id.as_str(),
                edge.keyword_id.as_str(),
                edge.relevance as f64,
                fmt_ts(&edge.extracted_at),
            ],
        )?;
        Ok(())
    }

    fn keyword_exists(conn: &Connection, id: &KeywordId) -> StorageResult<bool> {
        Ok(conn
            .query_row(
                "SELECT 1 FROM keywords WHERE id = ?1",
                params![id.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    fn check_dimensions(&self, keyword: &CanonicalKeyword) -> StorageResult<()> {
        let expected = self.index.dimensions();
        if keyword.embedding.len() != expected {
            return Err(StorageError::DimensionMismatch {
                expected,
                actual: keyword.embedding.len(),
            });
        }
        Ok(())
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>, dimensions: usize) -> StorageResult<Self> {
        Self::open_with_index(path, Box::new(BruteForceIndex::new(dimensions)))
    }

    fn open_in_memory(dimensions: usize) -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, Box::new(BruteForceIndex::new(dimensions)))
    }
}

impl KeywordStore for SqliteStore {
    fn upsert_keyword(&self, keyword: &CanonicalKeyword) -> StorageResult<()> {
        self.check_dimensions(keyword)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let stored = Self::write_keyword(&tx, keyword)?;
        tx.commit()?;
        drop(conn);
        self.index
            .insert(&stored.id, stored.keyword_type, &stored.embedding)
    }

    fn get_keyword(&self, id: &KeywordId) -> StorageResult<Option<CanonicalKeyword>> {
        let conn = self.lock()?;
        Self::read_keyword(&conn, id)
    }

    fn get_keywords(&self, ids: &[KeywordId]) -> StorageResult<Vec<CanonicalKeyword>> {
        let conn = self.lock()?;
        let mut keywords = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(keyword) = Self::read_keyword(&conn, id)? {
                keywords.push(keyword);
            }
        }
        Ok(keywords)
    }

    fn find_by_name(
        &self,
        keyword_type: KeywordType,
        canonical_name: &str,
    ) -> StorageResult<Option<CanonicalKeyword>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {KEYWORD_COLUMNS} FROM keywords WHERE keyword_type = ?1 AND name_key = ?2"),
            params![keyword_type.as_str(), name_key(canonical_name)],
            KeywordRow::read,
        )
        .optional()?
        .map(KeywordRow::decode)
        .transpose()
    }

    fn list_keywords(&self, keyword_type: Option<KeywordType>) -> StorageResult<Vec<CanonicalKeyword>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {KEYWORD_COLUMNS} FROM keywords \
             WHERE ?1 IS NULL OR keyword_type = ?1 \
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![keyword_type.map(|t| t.as_str())], KeywordRow::read)?;
        let mut keywords = Vec::new();
        for row in rows {
            keywords.push(row?.decode()?);
        }
        Ok(keywords)
    }

    fn keyword_count(&self) -> StorageResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM keywords", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn nearest_neighbors(
        &self,
        embedding: &[f32],
        keyword_type: KeywordType,
        k: usize,
    ) -> StorageResult<Vec<(CanonicalKeyword, f32)>> {
        let hits = self.index.nearest(embedding, keyword_type, k)?;
        let conn = self.lock()?;
        let mut results = Vec::with_capacity(hits.len());
        for (id, similarity) in hits {
            // The index may briefly hold a vector whose row a merge just removed
            if let Some(keyword) = Self::read_keyword(&conn, &id)? {
                results.push((keyword, similarity));
            }
        }
        Ok(results)
    }

    fn merge_into(&self, survivor: &CanonicalKeyword, absorbed: &KeywordId) -> StorageResult<()> {
        self.check_dimensions(survivor)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let edges: i64 = tx.query_row(
            "SELECT COUNT(*) FROM has_keyword WHERE keyword_id = ?1",
            params![absorbed.as_str()],
            |row| row.get(0),
        )?;
        if edges > 0 {
            return Err(StorageError::DataIntegrity(format!(
                "keyword {} still has {} edges; reassign them before merging",
                absorbed, edges
            )));
        }
        let deleted = tx.execute("DELETE FROM keywords WHERE id = ?1", params![absorbed.as_str()])?;
        if deleted == 0 {
            return Err(StorageError::KeywordNotFound(absorbed.clone()));
        }
        let stored = Self::write_keyword(&tx, survivor)?;
        tx.commit()?;
        drop(conn);

        self.index.remove(absorbed)?;
        self.index
            .insert(&stored.id, stored.keyword_type, &stored.embedding)?;
        self.bump();
        Ok(())
    }

    fn embedding_dimensions(&self) -> usize {
        self.index.dimensions()
    }
}

impl GraphStore for SqliteStore {
    fn begin_article(&self, article: &Article) -> StorageResult<()> {
        let conn = self.lock()?;
        let mut in_flight = article.clone();
        // COALESCE keeps the stored commit timestamp
        in_flight.committed_at = None;
        Self::write_article(&conn, &in_flight)
    }

    fn commit_article(&self, article: &Article, edges: &[KeywordEdge]) -> StorageResult<()> {
        let mut committed = article.clone();
        if committed.committed_at.is_none() {
            committed.committed_at = Some(Utc::now());
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        Self::write_article(&tx, &committed)?;
        for edge in edges {
            if edge.article_id != article.id {
                return Err(StorageError::DataIntegrity(format!(
                    "edge for article {} committed under {}",
                    edge.article_id, article.id
                )));
            }
            if !Self::keyword_exists(&tx, &edge.keyword_id)? {
                return Err(StorageError::KeywordNotFound(edge.keyword_id.clone()));
            }
            Self::write_edge(&tx, edge)?;
        }
        tx.commit()?;
        drop(conn);
        self.bump();
        Ok(())
    }

    fn set_article_state(&self, id: &ArticleId, state: ArticleState) -> StorageResult<()> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE articles SET state = ?1 WHERE id = ?2",
            params![state.as_str(), id.as_str()],
        )?;
        if updated == 0 {
            return Err(StorageError::ArticleNotFound(id.clone()));
        }
        Ok(())
    }

    fn get_article(&self, id: &ArticleId) -> StorageResult<Option<Article>> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"),
            params![id.as_str()],
            ArticleRow::read,
        )
        .optional()?
        .map(ArticleRow::decode)
        .transpose()
    }

    fn add_edge(&self, edge: &KeywordEdge) -> StorageResult<()> {
        let conn = self.lock()?;
        let article_known = conn
            .query_row(
                "SELECT 1 FROM articles WHERE id = ?1",
                params![edge.article_id.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !article_known {
            return Err(StorageError::ArticleNotFound(edge.article_id.clone()));
        }
        if !Self::keyword_exists(&conn, &edge.keyword_id)? {
            return Err(StorageError::KeywordNotFound(edge.keyword_id.clone()));
        }
        Self::write_edge(&conn, edge)?;
        drop(conn);
        self.bump();
        Ok(())
    }

    fn edges_for_article(&self, id: &ArticleId) -> StorageResult<Vec<KeywordEdge>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT keyword_id, relevance, extracted_at FROM has_keyword \
             WHERE article_id = ?1 ORDER BY keyword_id",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut edges = Vec::new();
        for row in rows {
            let (keyword_id, relevance, extracted_at) = row?;
            edges.push(KeywordEdge {
                article_id: id.clone(),
                keyword_id: KeywordId::from_string(keyword_id),
                relevance: relevance as f32,
                extracted_at: parse_ts(&extracted_at)?,
            });
        }
        Ok(edges)
    }

    fn articles_for_keyword(
        &self,
        keyword_id: &KeywordId,
        filter: &GraphFilter,
    ) -> StorageResult<Vec<ArticleId>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.category FROM articles a \
             JOIN has_keyword h ON h.article_id = a.id \
             WHERE h.keyword_id = ?1 \
               AND a.committed_at IS NOT NULL \
               AND (?2 IS NULL OR a.published_at >= ?2) \
               AND (?3 IS NULL OR a.published_at < ?3) \
             ORDER BY a.id",
        )?;
        let rows = stmt.query_map(
            params![
                keyword_id.as_str(),
                filter.published_from.as_ref().map(fmt_ts),
                filter.published_to.as_ref().map(fmt_ts),
            ],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        let mut ids = Vec::new();
        for row in rows {
            let (id, category) = row?;
            if category_allowed(filter, &category) {
                ids.push(ArticleId::from_string(id));
            }
        }
        Ok(ids)
    }

    fn keyword_sets(&self, filter: &GraphFilter) -> StorageResult<Vec<(ArticleId, Vec<KeywordId>)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT a.id, a.category, h.keyword_id, k.keyword_type FROM articles a \
             JOIN has_keyword h ON h.article_id = a.id \
             JOIN keywords k ON k.id = h.keyword_id \
             WHERE a.committed_at IS NOT NULL \
               AND (?1 IS NULL OR a.published_at >= ?1) \
               AND (?2 IS NULL OR a.published_at < ?2) \
             ORDER BY a.id, h.keyword_id",
        )?;
        let rows = stmt.query_map(
            params![
                filter.published_from.as_ref().map(fmt_ts),
                filter.published_to.as_ref().map(fmt_ts),
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )?;

        let mut sets: Vec<(ArticleId, Vec<KeywordId>)> = Vec::new();
        for row in rows {
            let (article_id, category, keyword_id, keyword_type) = row?;
            if !category_allowed(filter, &category) {
                continue;
            }
            let type_allowed = keyword_type
                .parse::<KeywordType>()
                .map(|t| filter.allows_type(t))
                .unwrap_or(false);
            if !type_allowed {
                continue;
            }
            let keyword_id = KeywordId::from_string(keyword_id);
            match sets.last_mut() {
                Some((last, keywords)) if last.as_str() == article_id => keywords.push(keyword_id),
                _ => sets.push((ArticleId::from_string(article_id), vec![keyword_id])),
            }
        }
        Ok(sets)
    }

    fn expire_articles_before(&self, cutoff: DateTime<Utc>) -> StorageResult<ExpiryReport> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let expired: Vec<(String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, state FROM articles WHERE expires_at < ?1 ORDER BY id",
            )?;
            let rows = stmt.query_map(params![fmt_ts(&cutoff)], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        let mut report = ExpiryReport::default();
        for (id, state) in expired {
            let terminal = ArticleState::parse(&state).map_or(false, |s| s.is_terminal());
            if !terminal {
                report.deferred.push(ArticleId::from_string(id));
                continue;
            }
            let edges = tx.execute("DELETE FROM has_keyword WHERE article_id = ?1", params![id])?;
            tx.execute("DELETE FROM articles WHERE id = ?1", params![id])?;
            report.edges_removed += edges;
            report.removed.push(ArticleId::from_string(id));
        }
        tx.commit()?;
        drop(conn);

        if !report.removed.is_empty() {
            self.bump();
        }
        Ok(report)
    }

    fn reassign_keyword(&self, from: &KeywordId, to: &KeywordId) -> StorageResult<usize> {
        if from == to {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let moved: i64 = tx.query_row(
            "SELECT COUNT(*) FROM has_keyword WHERE keyword_id = ?1",
            params![from.as_str()],
            |row| row.get(0),
        )?;
        // Articles carrying both keywords keep one edge with the higher relevance
        tx.execute(
            "UPDATE has_keyword SET relevance = MAX(relevance, \
                 (SELECT f.relevance FROM has_keyword f \
                  WHERE f.article_id = has_keyword.article_id AND f.keyword_id = ?1)) \
             WHERE keyword_id = ?2 \
               AND article_id IN (SELECT article_id FROM has_keyword WHERE keyword_id = ?1)",
            params![from.as_str(), to.as_str()],
        )?;
        tx.execute(
            "DELETE FROM has_keyword WHERE keyword_id = ?1 \
               AND article_id IN (SELECT article_id FROM has_keyword WHERE keyword_id = ?2)",
            params![from.as_str(), to.as_str()],
        )?;
        tx.execute(
            "UPDATE has_keyword SET keyword_id = ?2 WHERE keyword_id = ?1",
            params![from.as_str(), to.as_str()],
        )?;
        tx.commit()?;
        drop(conn);

        if moved > 0 {
            self.bump();
        }
        Ok(moved as usize)
    }

    /// Local write counter plus SQLite's `data_version`, which moves when
    /// another connection commits to the same file
    fn generation(&self) -> u64 {
        let local = self.generation.load(Ordering::SeqCst);
        let external = self
            .conn
            .lock()
            .ok()
            .and_then(|conn| {
                conn.query_row("PRAGMA data_version", [], |row| row.get::<_, i64>(0))
                    .ok()
            })
            .unwrap_or(0);
        local + external.max(0) as u64
    }

    fn health_check(&self) -> StorageResult<()> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

fn category_allowed(filter: &GraphFilter, category: &str) -> bool {
    filter.categories.is_empty()
        || filter
            .categories
            .iter()
            .any(|c| c.as_str() == category)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open_in_memory(2).unwrap()
    }

    fn keyword(name: &str, keyword_type: KeywordType, embedding: Vec<f32>) -> CanonicalKeyword {
        let category = match keyword_type {
            KeywordType::Entity => KeywordCategory::Person,
            KeywordType::Concept => KeywordCategory::Innovation,
        };
        CanonicalKeyword::new(name, keyword_type, category, embedding).with_alias(name)
    }

    fn stored_article(url: &str, category: ArticleCategory, published_at: DateTime<Utc>) -> Article {
        let mut article = Article::new(url, url, category, published_at, "wire");
        article.state = ArticleState::Stored;
        article
    }

    fn commit(store: &SqliteStore, article: &Article, keywords: &[&CanonicalKeyword]) {
        let edges: Vec<KeywordEdge> = keywords
            .iter()
            .map(|k| KeywordEdge::new(article.id.clone(), k.id.clone(), 1.0))
            .collect();
        store.commit_article(article, &edges).unwrap();
    }

    #[test]
    fn test_keyword_round_trip() {
        let store = create_test_store();
        let kw = keyword("Donald Trump", KeywordType::Entity, vec![0.6, 0.8]).with_alias("Trump");
        store.upsert_keyword(&kw).unwrap();

        let loaded = store.get_keyword(&kw.id).unwrap().unwrap();
        assert_eq!(loaded.canonical_name, "Donald Trump");
        assert_eq!(loaded.aliases, vec!["Donald Trump", "Trump"]);
        assert_eq!(loaded.embedding, vec![0.6, 0.8]);
        assert_eq!(loaded.mention_count, 1);

        let by_name = store.find_by_name(KeywordType::Entity, "DONALD TRUMP").unwrap();
        assert_eq!(by_name.map(|k| k.id), Some(kw.id));
    }

    #[test]
    fn test_aliases_are_append_only() {
        let store = create_test_store();
        let mut kw = keyword("NATO", KeywordType::Entity, vec![1.0, 0.0]);
        store.upsert_keyword(&kw).unwrap();

        kw.aliases = vec!["North Atlantic Treaty Organization".to_string()];
        store.upsert_keyword(&kw).unwrap();

        let loaded = store.get_keyword(&kw.id).unwrap().unwrap();
        assert!(loaded.has_alias("NATO"));
        assert!(loaded.has_alias("North Atlantic Treaty Organization"));
    }

    #[test]
    fn test_name_collision_is_integrity_error() {
        let store = create_test_store();
        store
            .upsert_keyword(&keyword("Paris", KeywordType::Entity, vec![1.0, 0.0]))
            .unwrap();
        let err = store
            .upsert_keyword(&keyword("paris", KeywordType::Entity, vec![0.0, 1.0]))
            .unwrap_err();
        assert!(err.is_integrity());
        // Same name under the other type is a different keyword
        store
            .upsert_keyword(&keyword("Paris", KeywordType::Concept, vec![0.0, 1.0]))
            .unwrap();
        assert_eq!(store.keyword_count().unwrap(), 2);
    }

    #[test]
    fn test_nearest_neighbors_filters_by_type() {
        let store = create_test_store();
        let entity = keyword("A", KeywordType::Entity, vec![1.0, 0.0]);
        let concept = keyword("B", KeywordType::Concept, vec![1.0, 0.0]);
        store.upsert_keyword(&entity).unwrap();
        store.upsert_keyword(&concept).unwrap();

        let hits = store.nearest_neighbors(&[1.0, 0.0], KeywordType::Entity, 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, entity.id);
    }

    #[test]
    fn test_commit_is_all_or_nothing() {
        let store = create_test_store();
        let kw = keyword("A", KeywordType::Entity, vec![1.0, 0.0]);
        store.upsert_keyword(&kw).unwrap();

        let article = stored_article("https://a", ArticleCategory::World, Utc::now());
        let edges = vec![
            KeywordEdge::new(article.id.clone(), kw.id.clone(), 1.0),
            KeywordEdge::new(article.id.clone(), KeywordId::from("ghost"), 1.0),
        ];
        assert!(matches!(
            store.commit_article(&article, &edges),
            Err(StorageError::KeywordNotFound(_))
        ));
        assert!(store.get_article(&article.id).unwrap().is_none());
        assert!(store.edges_for_article(&article.id).unwrap().is_empty());
    }

    #[test]
    fn test_keyword_sets_respect_filter() {
        let store = create_test_store();
        let person = keyword("Person", KeywordType::Entity, vec![1.0, 0.0]);
        let idea = keyword("Idea", KeywordType::Concept, vec![0.0, 1.0]);
        store.upsert_keyword(&person).unwrap();
        store.upsert_keyword(&idea).unwrap();

        let now = Utc::now();
        let old = stored_article("https://old", ArticleCategory::Politics, now - Duration::days(10));
        let new = stored_article("https://new", ArticleCategory::Business, now - Duration::hours(1));
        commit(&store, &old, &[&person, &idea]);
        commit(&store, &new, &[&person, &idea]);

        let all = store.keyword_sets(&GraphFilter::new()).unwrap();
        assert_eq!(all.len(), 2);

        let recent = GraphFilter::new().between(now - Duration::days(1), now);
        let sets = store.keyword_sets(&recent).unwrap();
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].0, new.id);

        let politics = GraphFilter::new().with_category(ArticleCategory::Politics);
        assert_eq!(store.keyword_sets(&politics).unwrap()[0].0, old.id);

        let entities = GraphFilter::new().with_keyword_type(KeywordType::Entity);
        for (_, keywords) in store.keyword_sets(&entities).unwrap() {
            assert_eq!(keywords, vec![person.id.clone()]);
        }

        assert_eq!(
            store.articles_for_keyword(&idea.id, &recent).unwrap(),
            vec![new.id.clone()]
        );
    }

    #[test]
    fn test_begin_keeps_previous_commit_visible() {
        let store = create_test_store();
        let kw = keyword("A", KeywordType::Entity, vec![1.0, 0.0]);
        store.upsert_keyword(&kw).unwrap();

        let mut article = stored_article("https://a", ArticleCategory::World, Utc::now());
        commit(&store, &article, &[&kw]);

        article.state = ArticleState::Resolving;
        article.committed_at = None;
        store.begin_article(&article).unwrap();

        let loaded = store.get_article(&article.id).unwrap().unwrap();
        assert_eq!(loaded.state, ArticleState::Resolving);
        assert!(loaded.committed_at.is_some());
        assert_eq!(store.keyword_sets(&GraphFilter::new()).unwrap().len(), 1);
    }

    #[test]
    fn test_expiry_removes_terminal_and_defers_in_flight() {
        let store = create_test_store();
        let kw = keyword("A", KeywordType::Entity, vec![1.0, 0.0]);
        store.upsert_keyword(&kw).unwrap();

        let past = Utc::now() - Duration::days(1);
        let done = stored_article("https://done", ArticleCategory::World, past).with_expiry(past);
        commit(&store, &done, &[&kw]);

        let mut busy = Article::new("https://busy", "busy", ArticleCategory::World, past, "wire")
            .with_expiry(past);
        busy.state = ArticleState::Extracting;
        store.begin_article(&busy).unwrap();

        let fresh = stored_article("https://fresh", ArticleCategory::World, Utc::now());
        commit(&store, &fresh, &[&kw]);

        let report = store.expire_articles_before(Utc::now()).unwrap();
        assert_eq!(report.removed, vec![done.id.clone()]);
        assert_eq!(report.deferred, vec![busy.id.clone()]);
        assert_eq!(report.edges_removed, 1);
        assert!(store.get_article(&done.id).unwrap().is_none());
        assert!(store.get_article(&fresh.id).unwrap().is_some());
        assert!(store.get_keyword(&kw.id).unwrap().is_some());
    }

    #[test]
    fn test_reassign_and_merge() {
        let store = create_test_store();
        let mut survivor = keyword("Donald Trump", KeywordType::Entity, vec![1.0, 0.0]);
        let absorbed = keyword("Trump", KeywordType::Entity, vec![0.99, 0.1]);
        store.upsert_keyword(&survivor).unwrap();
        store.upsert_keyword(&absorbed).unwrap();

        let both = stored_article("https://both", ArticleCategory::Politics, Utc::now());
        store
            .commit_article(
                &both,
                &[
                    KeywordEdge::new(both.id.clone(), survivor.id.clone(), 0.2),
                    KeywordEdge::new(both.id.clone(), absorbed.id.clone(), 0.7),
                ],
            )
            .unwrap();
        let only = stored_article("https://only", ArticleCategory::Politics, Utc::now());
        commit(&store, &only, &[&absorbed]);

        assert_eq!(store.reassign_keyword(&absorbed.id, &survivor.id).unwrap(), 2);
        let edges = store.edges_for_article(&both.id).unwrap();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].relevance - 0.7).abs() < 1e-6);
        assert_eq!(store.edges_for_article(&only.id).unwrap()[0].keyword_id, survivor.id);

        survivor.absorb_keyword(&absorbed);
        store.merge_into(&survivor, &absorbed.id).unwrap();
        assert!(store.get_keyword(&absorbed.id).unwrap().is_none());
        let merged = store.get_keyword(&survivor.id).unwrap().unwrap();
        assert!(merged.has_alias("Trump"));
        assert_eq!(merged.mention_count, 2);
        assert_eq!(
            store.nearest_neighbors(&[1.0, 0.0], KeywordType::Entity, 5).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_wal_mode_enabled_at_connection() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test-wal.db");
        let store = SqliteStore::open(&db_path, 2).unwrap();

        let journal_mode: String = store
            .conn
            .lock()
            .unwrap()
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal_mode, "wal");
    }

    #[test]
    fn test_reopen_rebuilds_vector_index() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("wordtrace.db");
        let kw = keyword("Paris", KeywordType::Entity, vec![0.8, 0.6]);
        {
            let store = SqliteStore::open(&db_path, 2).unwrap();
            store.upsert_keyword(&kw).unwrap();
        }

        let reopened = SqliteStore::open(&db_path, 2).unwrap();
        let hits = reopened
            .nearest_neighbors(&[0.8, 0.6], KeywordType::Entity, 1)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, kw.id);
        assert!(hits[0].1 > 0.99);
    }

    #[test]
    fn test_generation_sees_other_connection_writes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("shared.db");
        let reader = SqliteStore::open(&db_path, 2).unwrap();
        let writer = SqliteStore::open(&db_path, 2).unwrap();

        let before = reader.generation();
        let article = stored_article("https://x", ArticleCategory::World, Utc::now());
        writer.commit_article(&article, &[]).unwrap();
        assert!(reader.generation() > before);
    }
}
