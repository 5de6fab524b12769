//! SqliteVecIndex: persistent vector search via sqlite-vec
//!
//! Implements `VectorIndex` on a vec0 virtual table partitioned by keyword
//! type (`keyword_type TEXT PARTITION KEY`), so entity and concept vectors
//! never mix.
//!
//! Vectors are L2-normalized on insert so that L2 distance from vec0 can be
//! converted to cosine similarity: `sim = 1 - dist² / 2`.
//!
//! Uses its own database connection (WAL mode) to avoid contention with the
//! main `SqliteStore` connection.

#[cfg(feature = "embeddings")]
mod inner {
    use crate::index::VectorIndex;
    use crate::model::{KeywordId, KeywordType};
    use crate::storage::{StorageError, StorageResult};
    use rusqlite::{params, Connection, OptionalExtension};
    use sqlite_vec::sqlite3_vec_init;
    use std::path::Path;
    use std::sync::Mutex;

    /// Persistent vector index backed by sqlite-vec.
    pub struct SqliteVecIndex {
        conn: Mutex<Connection>,
        dimensions: usize,
    }

    /// Register the sqlite-vec extension globally (safe under parallel test execution).
    fn register_vec_extension() {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            unsafe {
                rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                    sqlite3_vec_init as *const (),
                )));
            }
        });
    }

    impl SqliteVecIndex {
        pub fn open(path: &Path, dimensions: usize) -> StorageResult<Self> {
            register_vec_extension();
            let conn = Connection::open(path)?;
            Self::init_connection(conn, dimensions)
        }

        pub fn open_in_memory(dimensions: usize) -> StorageResult<Self> {
            register_vec_extension();
            let conn = Connection::open_in_memory()?;
            Self::init_connection(conn, dimensions)
        }

        fn init_connection(conn: Connection, dimensions: usize) -> StorageResult<Self> {
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(&format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS vec_keywords USING vec0(\
                     keyword_type TEXT PARTITION KEY,\
                     embedding float[{}]\
                 );\
                 CREATE TABLE IF NOT EXISTS vec_keyword_ids (\
                     rowid INTEGER PRIMARY KEY AUTOINCREMENT,\
                     keyword_id TEXT NOT NULL UNIQUE\
                 );",
                dimensions
            ))?;
            Ok(Self {
                conn: Mutex::new(conn),
                dimensions,
            })
        }

        fn check_dimensions(&self, actual: usize) -> StorageResult<()> {
            if actual != self.dimensions {
                return Err(StorageError::DimensionMismatch {
                    expected: self.dimensions,
                    actual,
                });
            }
            Ok(())
        }
    }

    /// Reinterpret a `&[f32]` slice as raw bytes for sqlite-vec blob parameters.
    ///
    /// # Safety
    /// f32 has no padding and a fixed layout; this is a trivial reinterpretation.
    fn f32_slice_as_bytes(slice: &[f32]) -> &[u8] {
        unsafe { std::slice::from_raw_parts(slice.as_ptr() as *const u8, slice.len() * 4) }
    }

    fn l2_normalize(v: &mut [f32]) {
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
    }

    impl VectorIndex for SqliteVecIndex {
        fn dimensions(&self) -> usize {
            self.dimensions
        }

        fn insert(
            &self,
            id: &KeywordId,
            keyword_type: KeywordType,
            vector: &[f32],
        ) -> StorageResult<()> {
            self.check_dimensions(vector.len())?;
            let mut normalized = vector.to_vec();
            l2_normalize(&mut normalized);

            let mut conn = self
                .conn
                .lock()
                .map_err(|_| StorageError::LockPoisoned("sqlite-vec connection"))?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT OR IGNORE INTO vec_keyword_ids(keyword_id) VALUES (?1)",
                params![id.as_str()],
            )?;
            let rowid: i64 = tx.query_row(
                "SELECT rowid FROM vec_keyword_ids WHERE keyword_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )?;
            tx.execute("DELETE FROM vec_keywords WHERE rowid = ?1", params![rowid])?;
            tx.execute(
                "INSERT INTO vec_keywords(rowid, keyword_type, embedding) VALUES (?1, ?2, ?3)",
                params![rowid, keyword_type.as_str(), f32_slice_as_bytes(&normalized)],
            )?;
            tx.commit()?;
            Ok(())
        }

        fn remove(&self, id: &KeywordId) -> StorageResult<()> {
            let mut conn = self
                .conn
                .lock()
                .map_err(|_| StorageError::LockPoisoned("sqlite-vec connection"))?;
            let tx = conn.transaction()?;
            let rowid: Option<i64> = tx
                .query_row(
                    "SELECT rowid FROM vec_keyword_ids WHERE keyword_id = ?1",
                    params![id.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(rowid) = rowid {
                tx.execute("DELETE FROM vec_keywords WHERE rowid = ?1", params![rowid])?;
                tx.execute("DELETE FROM vec_keyword_ids WHERE rowid = ?1", params![rowid])?;
            }
            tx.commit()?;
            Ok(())
        }

        fn nearest(
            &self,
            query: &[f32],
            keyword_type: KeywordType,
            k: usize,
        ) -> StorageResult<Vec<(KeywordId, f32)>> {
            self.check_dimensions(query.len())?;
            if k == 0 {
                return Ok(Vec::new());
            }
            let mut normalized = query.to_vec();
            l2_normalize(&mut normalized);

            let conn = self
                .conn
                .lock()
                .map_err(|_| StorageError::LockPoisoned("sqlite-vec connection"))?;
            let mut stmt = conn.prepare(
                "SELECT m.keyword_id, knn.distance \
                 FROM (SELECT rowid, distance FROM vec_keywords \
                       WHERE embedding MATCH ?1 AND keyword_type = ?2 AND k = ?3) knn \
                 JOIN vec_keyword_ids m ON m.rowid = knn.rowid \
                 ORDER BY knn.distance",
            )?;
            let rows = stmt.query_map(
                params![f32_slice_as_bytes(&normalized), keyword_type.as_str(), k as i64],
                |row| {
                    let id: String = row.get(0)?;
                    let distance: f32 = row.get(1)?;
                    Ok((id, distance))
                },
            )?;

            let mut results = Vec::new();
            for row in rows {
                let (id, distance) = row?;
                // L2 distance on unit vectors -> cosine similarity
                results.push((KeywordId::from_string(id), 1.0 - (distance * distance) / 2.0));
            }
            Ok(results)
        }

        fn len(&self) -> usize {
            self.conn
                .lock()
                .ok()
                .and_then(|conn| {
                    conn.query_row("SELECT COUNT(*) FROM vec_keyword_ids", [], |row| {
                        row.get::<_, i64>(0)
                    })
                    .ok()
                })
                .unwrap_or(0) as usize
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn nearest_above_and_below() {
            let index = SqliteVecIndex::open_in_memory(3).expect("should open in-memory index");
            let travel = KeywordId::from_string("travel");
            let journey = KeywordId::from_string("journey");
            let democracy = KeywordId::from_string("democracy");
            index.insert(&travel, KeywordType::Concept, &[0.9, 0.3, 0.1]).unwrap();
            index.insert(&journey, KeywordType::Concept, &[0.85, 0.35, 0.15]).unwrap();
            index.insert(&democracy, KeywordType::Concept, &[0.1, 0.2, 0.95]).unwrap();

            let results = index.nearest(&[0.9, 0.3, 0.1], KeywordType::Concept, 3).unwrap();
            assert_eq!(results[0].0, travel);
            assert!(results[0].1 > 0.99);
            assert_eq!(results[1].0, journey);
            assert_eq!(results[2].0, democracy);
        }

        #[test]
        fn type_partitions_are_isolated() {
            let index = SqliteVecIndex::open_in_memory(3).expect("should open in-memory index");
            index
                .insert(&KeywordId::from_string("paris"), KeywordType::Entity, &[0.9, 0.3, 0.1])
                .unwrap();
            let results = index.nearest(&[0.9, 0.3, 0.1], KeywordType::Concept, 5).unwrap();
            assert!(results.is_empty());
        }

        #[test]
        fn remove_drops_vector() {
            let index = SqliteVecIndex::open_in_memory(3).expect("should open in-memory index");
            let id = KeywordId::from_string("paris");
            index.insert(&id, KeywordType::Entity, &[0.9, 0.3, 0.1]).unwrap();
            assert_eq!(index.len(), 1);
            index.remove(&id).unwrap();
            assert_eq!(index.len(), 0);
        }
    }
}

#[cfg(feature = "embeddings")]
pub use inner::SqliteVecIndex;
