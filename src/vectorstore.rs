//! Vector store (spec §2): nearest-neighbour search over embedded context
//! chunks. Out-of-scope schema/ingestion; this is the default read-path
//! adapter, backed by SQLite + the `sqlite-vec` extension.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::Mutex;

/// A single retrieved chunk and its distance from the query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Chunk text.
    pub text: String,
    /// Distance from the query vector (lower is closer).
    pub distance: f64,
}

/// Nearest-neighbour search over an agent's knowledge base.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Return the `k` nearest chunks to `vector` for the given agent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable or the query is
    /// malformed. Per spec §4.8, callers treat an error as zero hits rather
    /// than propagating it.
    async fn query(&self, agent_id: &str, vector: &[f32], k: usize) -> Result<Vec<Hit>>;
}

/// Default [`VectorStore`] adapter: a `sqlite-vec` `vec0` virtual table,
/// grounded on the same bundled-SQLite connection pattern used for the
/// history store.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
}

impl SqliteVectorStore {
    /// Open (or create) the vector store at `path`, loading the `sqlite-vec`
    /// extension and ensuring the `chunks` virtual table exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| CoreError::VectorStore(format!("open failed: {e}")))?;
        unsafe {
            conn.load_extension_enable()
                .map_err(|e| CoreError::VectorStore(format!("extension load failed: {e}")))?;
            sqlite_vec::sqlite3_vec_init as usize;
            conn.load_extension("vec0", None)
                .map_err(|e| CoreError::VectorStore(format!("vec0 load failed: {e}")))?;
            conn.load_extension_disable()
                .map_err(|e| CoreError::VectorStore(format!("extension disable failed: {e}")))?;
        }
        conn.execute_batch(
            "CREATE VIRTUAL TABLE IF NOT EXISTS chunks USING vec0(
                agent_id TEXT,
                embedding FLOAT[1536],
                +text TEXT
            );",
        )
        .map_err(|e| CoreError::VectorStore(format!("migration failed: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a chunk, for use by the (out-of-scope) ingestion path and by
    /// tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub fn insert(&self, agent_id: &str, text: &str, embedding: &[f32]) -> Result<()> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let blob = embedding_to_blob(embedding);
        conn.execute(
            "INSERT INTO chunks (agent_id, embedding, text) VALUES (?1, ?2, ?3)",
            rusqlite::params![agent_id, blob, text],
        )
        .map_err(|e| CoreError::VectorStore(format!("insert failed: {e}")))?;
        Ok(())
    }
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn query(&self, agent_id: &str, vector: &[f32], k: usize) -> Result<Vec<Hit>> {
        let conn = self.conn.lock().expect("vector store mutex poisoned");
        let blob = embedding_to_blob(vector);
        let mut stmt = conn
            .prepare(
                "SELECT text, distance FROM chunks
                 WHERE agent_id = ?1 AND embedding MATCH ?2
                 ORDER BY distance
                 LIMIT ?3",
            )
            .map_err(|e| CoreError::VectorStore(format!("query prepare failed: {e}")))?;

        let rows = stmt
            .query_map(rusqlite::params![agent_id, blob, k as i64], |row| {
                Ok(Hit {
                    text: row.get(0)?,
                    distance: row.get(1)?,
                })
            })
            .map_err(|e| CoreError::VectorStore(format!("query failed: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| CoreError::VectorStore(format!("row decode failed: {e}")))
    }
}
