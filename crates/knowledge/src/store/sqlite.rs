//! SQLite-backed vector store.
//!
//! Metadata constraints are pushed into SQL with `json_extract` on sanitized
//! keys and bound values; cosine similarity is computed in process.

use super::{cosine_similarity, rank_scored, VectorSearchStore};
use crate::search::{FilterValue, MetadataFilter};
use crate::types::{ChunkRecord, VectorSearchResult};
use parking_lot::Mutex;
use relay_core::{AppError, AppResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT NOT NULL,
    collection_id TEXT NOT NULL,
    document_id TEXT NOT NULL,
    title TEXT,
    content TEXT NOT NULL,
    tags TEXT NOT NULL DEFAULT '[]',
    user_id TEXT,
    metadata TEXT NOT NULL DEFAULT '{}',
    embedding BLOB NOT NULL,
    PRIMARY KEY (collection_id, id)
);

CREATE INDEX IF NOT EXISTS idx_chunks_collection ON chunks(collection_id);
CREATE INDEX IF NOT EXISTS idx_chunks_user ON chunks(collection_id, user_id);
"#;

/// Vector store persisted in a single SQLite file.
#[derive(Clone)]
pub struct SqliteVectorStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore").finish_non_exhaustive()
    }
}

impl SqliteVectorStore {
    /// Open (or create) the store at `db_path`.
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| storage_error("Failed to open vector store", e))?;
        tracing::debug!("Opened SQLite vector store at {:?}", db_path);
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| storage_error("Failed to open vector store", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| storage_error("Failed to create chunk tables", e))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace a chunk.
    pub fn upsert(&self, record: &ChunkRecord) -> AppResult<()> {
        let tags = serde_json::to_string(&record.tags)?;
        let metadata = serde_json::to_string(&record.metadata)?;

        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO chunks
                 (id, collection_id, document_id, title, content, tags, user_id, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.chunk_id,
                    record.collection_id,
                    record.document_id,
                    record.document_title,
                    record.content,
                    tags,
                    record.user_id,
                    metadata,
                    embedding_to_bytes(&record.embedding),
                ],
            )
            .map_err(|e| storage_error("Failed to insert chunk", e))?;
        Ok(())
    }

    /// Remove every chunk of a collection, returning how many were deleted.
    pub fn clear_collection(&self, collection_id: &str) -> AppResult<usize> {
        self.conn
            .lock()
            .execute(
                "DELETE FROM chunks WHERE collection_id = ?1",
                params![collection_id],
            )
            .map_err(|e| storage_error("Failed to delete chunks", e))
    }

    /// Number of chunks stored for a collection.
    pub fn count(&self, collection_id: &str) -> AppResult<usize> {
        self.conn
            .lock()
            .query_row(
                "SELECT COUNT(*) FROM chunks WHERE collection_id = ?1",
                params![collection_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(|e| storage_error("Failed to count chunks", e))
    }

    fn search_blocking(
        conn: &Connection,
        collection_id: &str,
        query_vector: &[f32],
        filter: &MetadataFilter,
    ) -> AppResult<Vec<VectorSearchResult>> {
        let (sql, values) = build_query(collection_id, filter);

        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| AppError::search(collection_id, e.to_string()))?;

        let rows = stmt
            .query_map(params_from_iter(values.iter()), |row| {
                Ok(RawChunk {
                    chunk_id: row.get(0)?,
                    document_id: row.get(1)?,
                    document_title: row.get(2)?,
                    content: row.get(3)?,
                    tags: row.get(4)?,
                    user_id: row.get(5)?,
                    metadata: row.get(6)?,
                    embedding: row.get(7)?,
                })
            })
            .map_err(|e| AppError::search(collection_id, e.to_string()))?;

        let mut scored = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| AppError::search(collection_id, e.to_string()))?;
            let record = raw.into_record(collection_id)?;
            let similarity = cosine_similarity(query_vector, &record.embedding);
            scored.push(record.to_result(similarity));
        }

        Ok(scored)
    }
}

#[async_trait::async_trait]
impl VectorSearchStore for SqliteVectorStore {
    async fn search(
        &self,
        collection_id: &str,
        query_vector: &[f32],
        filter: &MetadataFilter,
        limit: usize,
        threshold: f32,
    ) -> AppResult<Vec<VectorSearchResult>> {
        let conn = Arc::clone(&self.conn);
        let collection = collection_id.to_string();
        let query = query_vector.to_vec();
        let filter = filter.clone();

        let scored = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            Self::search_blocking(&conn, &collection, &query, &filter)
        })
        .await
        .map_err(|e| AppError::search(collection_id, format!("search task failed: {}", e)))??;

        Ok(rank_scored(scored, limit, threshold))
    }
}

struct RawChunk {
    chunk_id: String,
    document_id: String,
    document_title: Option<String>,
    content: String,
    tags: String,
    user_id: Option<String>,
    metadata: String,
    embedding: Vec<u8>,
}

impl RawChunk {
    fn into_record(self, collection_id: &str) -> AppResult<ChunkRecord> {
        let corrupt = |what: &str, detail: String| {
            AppError::search(
                collection_id,
                format!("chunk '{}' has corrupt {}: {}", self.chunk_id, what, detail),
            )
        };

        let tags: Vec<String> =
            serde_json::from_str(&self.tags).map_err(|e| corrupt("tags", e.to_string()))?;
        let metadata: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&self.metadata).map_err(|e| corrupt("metadata", e.to_string()))?;
        let embedding = bytes_to_embedding(&self.embedding)
            .ok_or_else(|| corrupt("embedding", format!("{} bytes", self.embedding.len())))?;

        Ok(ChunkRecord {
            chunk_id: self.chunk_id,
            document_id: self.document_id,
            collection_id: collection_id.to_string(),
            document_title: self.document_title,
            content: self.content,
            tags,
            user_id: self.user_id,
            metadata,
            embedding,
        })
    }
}

/// Build the filtered scan for one collection. Keys are already sanitized by
/// [`crate::search::FilterKey`]; every value is bound.
fn build_query(collection_id: &str, filter: &MetadataFilter) -> (String, Vec<Value>) {
    let mut sql = String::from(
        "SELECT id, document_id, title, content, tags, user_id, metadata, embedding
         FROM chunks WHERE collection_id = ?",
    );
    let mut values = vec![Value::Text(collection_id.to_string())];

    if let Some(user_id) = &filter.user_id {
        sql.push_str(" AND (user_id IS NULL OR user_id = ?)");
        values.push(Value::Text(user_id.clone()));
    }

    for tag in &filter.tags {
        sql.push_str(
            " AND EXISTS (SELECT 1 FROM json_each(chunks.tags) WHERE lower(json_each.value) = lower(?))",
        );
        values.push(Value::Text(tag.clone()));
    }

    for (key, value) in &filter.metadata {
        let path = format!("'$.{}'", key.as_str());
        match value {
            FilterValue::Bool(b) => {
                sql.push_str(&format!(" AND json_type(metadata, {}) = ?", path));
                values.push(Value::Text(if *b { "true" } else { "false" }.to_string()));
            }
            FilterValue::Integer(i) => {
                sql.push_str(&format!(" AND json_extract(metadata, {}) = ?", path));
                values.push(Value::Integer(*i));
            }
            FilterValue::Float(f) => {
                sql.push_str(&format!(" AND json_extract(metadata, {}) = ?", path));
                values.push(Value::Real(*f));
            }
            FilterValue::Text(t) => {
                sql.push_str(&format!(
                    " AND json_type(metadata, {0}) = 'text' AND json_extract(metadata, {0}) = ?",
                    path
                ));
                values.push(Value::Text(t.clone()));
            }
        }
    }

    (sql, values)
}

fn storage_error(context: &str, e: rusqlite::Error) -> AppError {
    AppError::Storage(format!("{}: {}", context, e))
}

/// Convert embedding vector to bytes for storage.
fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Convert bytes back to embedding vector.
fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }

    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
