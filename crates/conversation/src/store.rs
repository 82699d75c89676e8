//! Durable conversation stores.

use crate::types::ConversationState;
use parking_lot::Mutex;
use relay_core::{AppError, AppResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Durable home of conversations that outlive the in-memory cache.
#[async_trait::async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a conversation; `None` when it was never saved.
    async fn load(&self, conversation_id: &str) -> AppResult<Option<ConversationState>>;

    async fn save(&self, state: &ConversationState) -> AppResult<()>;
}

/// Map-backed store for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    states: Mutex<HashMap<String, ConversationState>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn load(&self, conversation_id: &str) -> AppResult<Option<ConversationState>> {
        Ok(self.states.lock().get(conversation_id).cloned())
    }

    async fn save(&self, state: &ConversationState) -> AppResult<()> {
        self.states
            .lock()
            .insert(state.conversation_id.clone(), state.clone());
        Ok(())
    }
}

/// Conversations stored as JSON documents in SQLite.
#[derive(Clone)]
pub struct SqliteConversationStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConversationStore").finish_non_exhaustive()
    }
}

impl SqliteConversationStore {
    pub fn open(db_path: &Path) -> AppResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path).map_err(|e| {
            AppError::Storage(format!("Failed to open conversation store at {:?}: {}", db_path, e))
        })?;
        tracing::debug!("Opened conversation store at {:?}", db_path);
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> AppResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Storage(format!("Failed to open conversation store: {}", e)))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> AppResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                chatbot_id TEXT NOT NULL,
                user_id TEXT,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_conversations_chatbot ON conversations(chatbot_id);
            "#,
        )
        .map_err(|e| AppError::Storage(format!("Failed to create conversation table: {}", e)))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait::async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn load(&self, conversation_id: &str) -> AppResult<Option<ConversationState>> {
        let conn = Arc::clone(&self.conn);
        let id = conversation_id.to_string();

        let json = tokio::task::spawn_blocking(move || {
            conn.lock()
                .query_row(
                    "SELECT state FROM conversations WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| AppError::Storage(format!("Failed to load conversation: {}", e)))
        })
        .await
        .map_err(|e| AppError::Storage(format!("Conversation load task failed: {}", e)))??;

        json.map(|json| serde_json::from_str(&json).map_err(AppError::from))
            .transpose()
    }

    async fn save(&self, state: &ConversationState) -> AppResult<()> {
        let conn = Arc::clone(&self.conn);
        let json = serde_json::to_string(state)?;
        let id = state.conversation_id.clone();
        let chatbot_id = state.chatbot_id.clone();
        let user_id = state.user_id.clone();
        let updated_at = state.last_access.to_rfc3339();

        tokio::task::spawn_blocking(move || {
            conn.lock()
                .execute(
                    "INSERT INTO conversations (id, chatbot_id, user_id, state, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT(id) DO UPDATE SET
                        state = excluded.state,
                        updated_at = excluded.updated_at",
                    params![id, chatbot_id, user_id, json, updated_at],
                )
                .map(|_| ())
                .map_err(|e| AppError::Storage(format!("Failed to save conversation: {}", e)))
        })
        .await
        .map_err(|e| AppError::Storage(format!("Conversation save task failed: {}", e)))?
    }
}
