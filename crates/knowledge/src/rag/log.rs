//! Retrieval log sinks.
//!
//! The orchestrator records one entry per retrieval. Recording is
//! fire-and-forget: sink errors are logged and never reach the caller.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use relay_core::{AppError, AppResult};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// One recorded retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetrievalLogEntry {
    pub chatbot_id: String,
    pub conversation_id: Option<String>,
    pub user_id: Option<String>,
    pub query: String,
    pub chunk_ids: Vec<String>,
    pub similarities: Vec<f32>,
    pub duration_ms: u64,
    pub embedding_model: String,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Destination for retrieval log entries.
#[async_trait::async_trait]
pub trait RetrievalLogSink: Send + Sync {
    async fn record(&self, entry: RetrievalLogEntry) -> AppResult<()>;
}

/// Emits each entry as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

#[async_trait::async_trait]
impl RetrievalLogSink for TracingLogSink {
    async fn record(&self, entry: RetrievalLogEntry) -> AppResult<()> {
        tracing::info!(
            chatbot = %entry.chatbot_id,
            conversation = ?entry.conversation_id,
            trace_id = ?entry.trace_id,
            chunks = entry.chunk_ids.len(),
            top_similarity = entry.similarities.first().copied().unwrap_or(0.0),
            duration_ms = entry.duration_ms,
            model = %entry.embedding_model,
            "Retrieval recorded"
        );
        Ok(())
    }
}

/// Append-only retrieval log in SQLite.
#[derive(Clone)]
pub struct SqliteRetrievalLog {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteRetrievalLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRetrievalLog").finish_non_exhaustive()
    }
}

impl SqliteRetrievalLog {
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| AppError::Storage(format!("Failed to open retrieval log: {}", e)))?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Storage(format!("Failed to open retrieval log: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS retrieval_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chatbot_id TEXT NOT NULL,
                conversation_id TEXT,
                user_id TEXT,
                query TEXT NOT NULL,
                chunk_ids TEXT NOT NULL,
                similarities TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                embedding_model TEXT NOT NULL,
                trace_id TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_retrieval_log_chatbot ON retrieval_log(chatbot_id);
            "#,
        )
        .map_err(|e| AppError::Storage(format!("Failed to create retrieval log table: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Most recent entries for a chatbot, newest first.
    pub fn recent(&self, chatbot_id: &str, limit: usize) -> AppResult<Vec<RetrievalLogEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT chatbot_id, conversation_id, user_id, query, chunk_ids, similarities,
                        duration_ms, embedding_model, trace_id, created_at
                 FROM retrieval_log WHERE chatbot_id = ?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| AppError::Storage(format!("Failed to query retrieval log: {}", e)))?;

        let rows = stmt
            .query_map(params![chatbot_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                    row.get::<_, String>(7)?,
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, String>(9)?,
                ))
            })
            .map_err(|e| AppError::Storage(format!("Failed to query retrieval log: {}", e)))?;

        let mut entries = Vec::new();
        for row in rows {
            let (
                chatbot_id,
                conversation_id,
                user_id,
                query,
                chunk_ids,
                similarities,
                duration_ms,
                embedding_model,
                trace_id,
                created_at,
            ) = row.map_err(|e| AppError::Storage(format!("Failed to read log row: {}", e)))?;

            let created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| AppError::Storage(format!("Invalid log timestamp: {}", e)))?
                .with_timezone(&Utc);

            entries.push(RetrievalLogEntry {
                chatbot_id,
                conversation_id,
                user_id,
                query,
                chunk_ids: serde_json::from_str(&chunk_ids)?,
                similarities: serde_json::from_str(&similarities)?,
                duration_ms: duration_ms as u64,
                embedding_model,
                trace_id,
                created_at,
            });
        }

        Ok(entries)
    }
}

#[async_trait::async_trait]
impl RetrievalLogSink for SqliteRetrievalLog {
    async fn record(&self, entry: RetrievalLogEntry) -> AppResult<()> {
        let conn = Arc::clone(&self.conn);
        let chunk_ids = serde_json::to_string(&entry.chunk_ids)?;
        let similarities = serde_json::to_string(&entry.similarities)?;

        tokio::task::spawn_blocking(move || {
            conn.lock()
                .execute(
                    "INSERT INTO retrieval_log
                     (chatbot_id, conversation_id, user_id, query, chunk_ids, similarities,
                      duration_ms, embedding_model, trace_id, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        entry.chatbot_id,
                        entry.conversation_id,
                        entry.user_id,
                        entry.query,
                        chunk_ids,
                        similarities,
                        entry.duration_ms as i64,
                        entry.embedding_model,
                        entry.trace_id,
                        entry.created_at.to_rfc3339(),
                    ],
                )
                .map(|_| ())
                .map_err(|e| AppError::Storage(format!("Failed to record retrieval: {}", e)))
        })
        .await
        .map_err(|e| AppError::Storage(format!("Retrieval log task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(query: &str) -> RetrievalLogEntry {
        RetrievalLogEntry {
            chatbot_id: "bot".to_string(),
            conversation_id: Some("conv-1".to_string()),
            user_id: None,
            query: query.to_string(),
            chunk_ids: vec!["c1".to_string(), "c2".to_string()],
            similarities: vec![0.9, 0.75],
            duration_ms: 12,
            embedding_model: "trigram-v1".to_string(),
            trace_id: Some("trace".to_string()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_log_records_and_reads_back() {
        let log = SqliteRetrievalLog::open_in_memory().unwrap();
        log.record(entry("first")).await.unwrap();
        log.record(entry("second")).await.unwrap();

        let recent = log.recent("bot", 10).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query, "second");
        assert_eq!(recent[1].chunk_ids, vec!["c1", "c2"]);
        assert_eq!(recent[1].similarities, vec![0.9, 0.75]);
        assert!(log.recent("other", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tracing_sink_never_fails() {
        assert!(TracingLogSink.record(entry("q")).await.is_ok());
    }
}
