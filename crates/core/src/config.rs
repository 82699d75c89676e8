//! Configuration management for Relay.
//!
//! This module handles loading and merging configuration from multiple sources:
//! - Built-in defaults
//! - Config files (.relay/config.yaml)
//! - Environment variables
//! - Command-line flags
//!
//! Unknown keys in the YAML file are rejected rather than ignored.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Embedding providers the workspace knows how to construct.
pub const KNOWN_EMBEDDING_PROVIDERS: [&str; 2] = ["mock", "ollama"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .relay/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Catalog file describing chatbots and collections
    pub catalog: Option<PathBuf>,

    /// Log level override
    pub log_level: Option<String>,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    /// Emit logs as JSON lines
    pub log_json: bool,

    pub embedding: EmbeddingSettings,

    pub retrieval: RetrievalSettings,

    pub conversation: ConversationSettings,
}

/// Embedding provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct EmbeddingSettings {
    /// Provider name: "mock" or "ollama"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model identifier (provider-specific)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Provider endpoint, for HTTP providers
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Embedding vector dimensions
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

/// How a retrieval treats a failing collection search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Any collection failure fails the whole retrieval.
    #[default]
    AllOrNothing,
    /// Successful collections are returned together with the failures.
    Partial,
}

/// Request-level retrieval defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct RetrievalSettings {
    /// Overall chunk budget per retrieval
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    /// Minimum similarity for a chunk to be returned
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Deadline for the search phase, in milliseconds
    #[serde(default = "default_search_deadline_ms")]
    pub search_deadline_ms: u64,

    #[serde(default)]
    pub failure_mode: FailureMode,
}

/// Conversation cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ConversationSettings {
    /// Time after last access before a conversation leaves memory
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum number of retained messages per conversation
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Period of the background eviction sweep
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// SQLite file for durable conversations, relative to .relay/
    #[serde(default = "default_conversation_db")]
    pub database: PathBuf,
}

fn default_embedding_provider() -> String {
    "mock".to_string()
}

fn default_embedding_model() -> String {
    "trigram-v1".to_string()
}

fn default_dimensions() -> usize {
    384
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_max_chunks() -> usize {
    5
}

fn default_similarity_threshold() -> f32 {
    0.3
}

fn default_search_deadline_ms() -> u64 {
    10_000
}

fn default_ttl_secs() -> u64 {
    1800
}

fn default_max_turns() -> usize {
    20
}

fn default_eviction_interval_secs() -> u64 {
    60
}

fn default_conversation_db() -> PathBuf {
    PathBuf::from("conversations.sqlite")
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            endpoint: None,
            dimensions: default_dimensions(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            max_chunks: default_max_chunks(),
            similarity_threshold: default_similarity_threshold(),
            search_deadline_ms: default_search_deadline_ms(),
            failure_mode: FailureMode::default(),
        }
    }
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_turns: default_max_turns(),
            eviction_interval_secs: default_eviction_interval_secs(),
            database: default_conversation_db(),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    workspace: Option<WorkspaceConfig>,
    #[serde(default)]
    logging: Option<LoggingConfig>,
    #[serde(default)]
    catalog: Option<String>,
    #[serde(default)]
    embedding: Option<EmbeddingSettings>,
    #[serde(default)]
    retrieval: Option<RetrievalSettings>,
    #[serde(default)]
    conversation: Option<ConversationSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkspaceConfig {
    path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoggingConfig {
    level: Option<String>,
    color: Option<bool>,
    json: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            catalog: None,
            log_level: None,
            verbose: false,
            no_color: false,
            log_json: false,
            embedding: EmbeddingSettings::default(),
            retrieval: RetrievalSettings::default(),
            conversation: ConversationSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, the YAML file and environment variables.
    ///
    /// Environment variables:
    /// - `RELAY_WORKSPACE`: Override workspace path
    /// - `RELAY_CONFIG`: Path to config file
    /// - `RELAY_CATALOG`: Path to the catalog file
    /// - `RELAY_EMBEDDING_PROVIDER`: Embedding provider
    /// - `RELAY_EMBEDDING_MODEL`: Embedding model identifier
    /// - `RUST_LOG`: Log level
    /// - `NO_COLOR`: Disable colored output
    ///
    /// # Example
    /// ```no_run
    /// use relay_core::config::AppConfig;
    ///
    /// let config = AppConfig::load().expect("Failed to load config");
    /// println!("Workspace: {:?}", config.workspace);
    /// ```
    pub fn load() -> AppResult<Self> {
        Self::load_from(None)
    }

    /// Like [`load`](Self::load), reading the YAML layer from `config_file`
    /// instead of `RELAY_CONFIG` or `.relay/config.yaml`. An explicit file
    /// that does not exist is an error.
    pub fn load_from(config_file: Option<PathBuf>) -> AppResult<Self> {
        Self::load_with(config_file, &|key| std::env::var(key).ok())
    }

    fn load_with(
        config_file: Option<PathBuf>,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> AppResult<Self> {
        let mut config = Self::default();

        if let Some(workspace) = env("RELAY_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Some(ref path) = config_file {
            if !path.exists() {
                return Err(AppError::Config(format!(
                    "Config file does not exist: {:?}",
                    path
                )));
            }
        }
        config.config_file = config_file.or_else(|| env("RELAY_CONFIG").map(PathBuf::from));

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = match config.config_file {
            Some(ref cf) => cf.clone(),
            None => config.relay_dir().join("config.yaml"),
        };

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        // Environment variables override YAML config
        if let Some(catalog) = env("RELAY_CATALOG") {
            config.catalog = Some(PathBuf::from(catalog));
        }

        if let Some(provider) = env("RELAY_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }

        if let Some(model) = env("RELAY_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }

        if let Some(level) = env("RUST_LOG") {
            config.log_level = Some(level);
        }

        if env("NO_COLOR").is_some() {
            config.no_color = true;
        }

        Ok(config)
    }

    /// Merge a YAML configuration file into this config.
    pub fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config file {:?}: {}", path, e)))
    }

    fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let config_file: ConfigFile = serde_yaml::from_str(contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {}", e)))?;

        let mut result = self.clone();

        if let Some(path) = config_file.workspace.and_then(|ws| ws.path) {
            result.workspace = PathBuf::from(path);
        }

        if let Some(logging) = config_file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
            if let Some(json) = logging.json {
                result.log_json = json;
            }
        }

        if let Some(catalog) = config_file.catalog {
            result.catalog = Some(PathBuf::from(catalog));
        }

        if let Some(embedding) = config_file.embedding {
            result.embedding = embedding;
        }

        if let Some(retrieval) = config_file.retrieval {
            result.retrieval = retrieval;
        }

        if let Some(conversation) = config_file.conversation {
            result.conversation = conversation;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI flags take precedence over environment variables and the YAML file.
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        catalog: Option<PathBuf>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(catalog) = catalog {
            self.catalog = Some(catalog);
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            // Verbose mode implies debug logging
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Get the path to the .relay directory.
    pub fn relay_dir(&self) -> PathBuf {
        self.workspace.join(".relay")
    }

    /// Ensure the .relay directory exists.
    pub fn ensure_relay_dir(&self) -> AppResult<()> {
        let relay_dir = self.relay_dir();
        if !relay_dir.exists() {
            std::fs::create_dir_all(&relay_dir).map_err(|e| {
                AppError::Config(format!("Failed to create .relay directory: {}", e))
            })?;
        }
        Ok(())
    }

    /// Absolute path of the durable conversation database.
    pub fn conversation_db_path(&self) -> PathBuf {
        if self.conversation.database.is_absolute() {
            self.conversation.database.clone()
        } else {
            self.relay_dir().join(&self.conversation.database)
        }
    }

    /// Resolve the catalog path, defaulting to `.relay/catalog.yaml`.
    pub fn catalog_path(&self) -> PathBuf {
        match self.catalog {
            Some(ref path) if path.is_absolute() => path.clone(),
            Some(ref path) => self.workspace.join(path),
            None => self.relay_dir().join("catalog.yaml"),
        }
    }

    /// Validate the loaded configuration.
    pub fn validate(&self) -> AppResult<()> {
        let provider = self.embedding.provider.as_str();
        if !KNOWN_EMBEDDING_PROVIDERS.contains(&provider) {
            return Err(AppError::Config(format!(
                "Unknown embedding provider: {}. Supported: {}",
                provider,
                KNOWN_EMBEDDING_PROVIDERS.join(", ")
            )));
        }

        if self.embedding.dimensions == 0 {
            return Err(AppError::Config(
                "Embedding dimensions must be greater than zero".to_string(),
            ));
        }

        let threshold = self.retrieval.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(AppError::Config(format!(
                "Similarity threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }

        if self.retrieval.max_chunks == 0 {
            return Err(AppError::Config(
                "Retrieval maxChunks must be greater than zero".to_string(),
            ));
        }

        if self.conversation.max_turns == 0 {
            return Err(AppError::Config(
                "Conversation maxTurns must be greater than zero".to_string(),
            ));
        }

        if self.conversation.ttl_secs == 0 || self.conversation.eviction_interval_secs == 0 {
            return Err(AppError::Config(
                "Conversation ttlSecs and evictionIntervalSecs must be greater than zero"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
