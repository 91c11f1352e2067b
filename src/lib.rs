//! Knowledge Graph RAG
//!
//! Retrieval-augmented generation over a Neo4j knowledge graph:
//! - Concurrent embedding pipeline (bounded worker pool, partial-failure
//!   aggregation, cooperative cancellation) writing a CSV artifact
//! - Neo4j record store adapter for ingestion and vector similarity search
//! - Ollama-compatible transport for embeddings and streamed generation
//! - Incremental assembler that echoes streamed fragments while rebuilding the answer

pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod rag;
pub mod store;
pub mod stream;

use anyhow::Result;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub llm: LlmYamlConfig,
    pub embeddings: EmbeddingsYamlConfig,
    pub neo4j: Neo4jYamlConfig,
    pub pipeline: PipelineYamlConfig,
    pub retrieval: RetrievalYamlConfig,
}

/// Generation model section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmYamlConfig {
    pub model: String,
    pub host: String,
    pub timeout_secs: u64,
}

impl Default for LlmYamlConfig {
    fn default() -> Self {
        Self {
            model: "llama2".into(),
            host: "http://localhost:11434".into(),
            timeout_secs: 120,
        }
    }
}

/// Embedding service section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingsYamlConfig {
    pub model: String,
    pub host: String,
    /// Signed on purpose: a negative count must surface as a config error, not a parse error
    pub workers: i64,
    pub timeout_secs: u64,
    /// Expected vector length; responses of any other length are rejected when set
    pub dimensions: Option<usize>,
}

impl Default for EmbeddingsYamlConfig {
    fn default() -> Self {
        Self {
            model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            host: "http://localhost:8000".into(),
            workers: 4,
            timeout_secs: 30,
            dimensions: None,
        }
    }
}

/// Neo4j section. Credentials have no defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jYamlConfig {
    pub uri: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub label: String,
    pub id_property: String,
    pub text_property: String,
    pub title_property: String,
    pub embedding_property: String,
}

impl Default for Neo4jYamlConfig {
    fn default() -> Self {
        let schema = store::StoreSchema::default();
        Self {
            uri: "bolt://localhost:7687".into(),
            user: None,
            password: None,
            label: schema.label,
            id_property: schema.id_property,
            text_property: schema.text_property,
            title_property: schema.title_property,
            embedding_property: schema.embedding_property,
        }
    }
}

/// Embedding pipeline section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineYamlConfig {
    pub queue_capacity: usize,
    pub artifact_path: PathBuf,
    /// Name under which the store's import directory sees the artifact
    /// (defaults to the artifact's file name)
    pub import_file_name: Option<String>,
    pub abort_in_flight: bool,
    pub persist_mode: PersistMode,
}

impl Default for PipelineYamlConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1,
            artifact_path: PathBuf::from("neo4j/import/embeddings.csv"),
            import_file_name: None,
            abort_in_flight: false,
            persist_mode: PersistMode::Import,
        }
    }
}

/// Retrieval section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalYamlConfig {
    pub limit: usize,
    pub index_name: String,
}

impl Default for RetrievalYamlConfig {
    fn default() -> Self {
        Self {
            limit: 6,
            index_name: "moviePlots".into(),
        }
    }
}

/// How computed vectors reach the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PersistMode {
    /// The store bulk-loads the artifact from its own import directory
    #[default]
    Import,
    /// The artifact is read back locally and every row is written with one call
    Direct,
}

// ============================================================================
// Errors
// ============================================================================

/// Configuration problems detected at startup. All of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} not set")]
    Missing { key: &'static str },

    #[error("invalid worker count {value:?}: must be a positive integer")]
    InvalidWorkers { value: String },

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub llm_model: String,
    pub llm_host: String,
    pub llm_timeout: Duration,
    pub embeddings_model: String,
    pub embeddings_host: String,
    pub embeddings_timeout: Duration,
    pub embeddings_workers: NonZeroUsize,
    pub embedding_dimensions: Option<usize>,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub store_schema: store::StoreSchema,
    pub queue_capacity: usize,
    pub artifact_path: PathBuf,
    pub import_file_name: String,
    pub abort_in_flight: bool,
    pub persist_mode: PersistMode,
    pub retrieval_limit: usize,
}

impl Config {
    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD and silently falls back to
    /// defaults when it does not exist. An explicitly requested file must exist and parse.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let yaml = Self::load_yaml(yaml_path)?;
        Self::from_lookup(yaml, |key| std::env::var(key).ok())
    }

    /// Build the runtime config from parsed YAML and a variable lookup.
    ///
    /// Empty variables count as unset, matching how the services treat them.
    pub fn from_lookup<F>(yaml: YamlConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let or_default = |key: &str, fallback: String| match var(key) {
            Some(value) => value,
            None => {
                tracing::info!("{key} not set, using {fallback}");
                fallback
            }
        };

        let workers = match var("EMBEDDINGS_WORKERS") {
            Some(raw) => parse_workers(&raw)?,
            None => parse_workers(&yaml.embeddings.workers.to_string())?,
        };

        let embedding_dimensions = match var("EMBEDDINGS_DIMENSIONS") {
            Some(raw) => Some(raw.parse().map_err(|e: std::num::ParseIntError| {
                ConfigError::Invalid {
                    key: "EMBEDDINGS_DIMENSIONS",
                    value: raw.clone(),
                    reason: e.to_string(),
                }
            })?),
            None => yaml.embeddings.dimensions,
        };

        let neo4j_user = var("NEO4J_USER")
            .or(yaml.neo4j.user)
            .ok_or(ConfigError::Missing { key: "NEO4J_USER" })?;
        let neo4j_password = var("NEO4J_PASSWORD")
            .or(yaml.neo4j.password)
            .ok_or(ConfigError::Missing {
                key: "NEO4J_PASSWORD",
            })?;

        let artifact_path = var("EMBEDDINGS_ARTIFACT")
            .map(PathBuf::from)
            .unwrap_or(yaml.pipeline.artifact_path);
        let import_file_name = match yaml.pipeline.import_file_name {
            Some(name) => name,
            None => artifact_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| ConfigError::Invalid {
                    key: "pipeline.artifact_path",
                    value: artifact_path.display().to_string(),
                    reason: "path has no file name".into(),
                })?,
        };

        let store_schema = store::StoreSchema {
            label: yaml.neo4j.label,
            id_property: yaml.neo4j.id_property,
            text_property: yaml.neo4j.text_property,
            title_property: yaml.neo4j.title_property,
            embedding_property: yaml.neo4j.embedding_property,
            vector_index: yaml.retrieval.index_name,
            dimensions: embedding_dimensions,
        };

        Ok(Self {
            llm_model: or_default("LLM_MODEL", yaml.llm.model),
            llm_host: or_default("LLM_HOST", yaml.llm.host),
            llm_timeout: Duration::from_secs(yaml.llm.timeout_secs),
            embeddings_model: or_default("EMBEDDINGS_MODEL", yaml.embeddings.model),
            embeddings_host: or_default("EMBEDDINGS_HOST", yaml.embeddings.host),
            embeddings_timeout: Duration::from_secs(yaml.embeddings.timeout_secs),
            embeddings_workers: workers,
            embedding_dimensions,
            neo4j_uri: or_default("NEO4J_URI", yaml.neo4j.uri),
            neo4j_user,
            neo4j_password,
            store_schema,
            queue_capacity: yaml.pipeline.queue_capacity.max(1),
            artifact_path,
            import_file_name,
            abort_in_flight: yaml.pipeline.abort_in_flight,
            persist_mode: yaml.pipeline.persist_mode,
            retrieval_limit: yaml.retrieval.limit.max(1),
        })
    }

    /// Load and parse the YAML config file.
    fn load_yaml(yaml_path: Option<&Path>) -> Result<YamlConfig, ConfigError> {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let config =
                    serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
                        path: path.to_path_buf(),
                        source,
                    })?;
                tracing::info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(_) if yaml_path.is_none() => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                Ok(YamlConfig::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

/// Worker pool size must be a positive integer.
fn parse_workers(raw: &str) -> Result<NonZeroUsize, ConfigError> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(|n| usize::try_from(n).ok())
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| ConfigError::InvalidWorkers {
            value: raw.to_string(),
        })
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn store::RecordStore>,
    pub embedder: Arc<dyn llm::LanguageModel>,
    pub llm: Arc<dyn llm::LanguageModel>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Create new application state with all services initialized
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(
            store::Neo4jClient::new(
                &config.neo4j_uri,
                &config.neo4j_user,
                &config.neo4j_password,
                config.store_schema.clone(),
            )
            .await?,
        );

        let embedder = Arc::new(
            llm::OllamaClient::new(
                &config.embeddings_host,
                &config.embeddings_model,
                config.embeddings_timeout,
            )?
            .with_dimensions(config.embedding_dimensions),
        );

        let llm = Arc::new(llm::OllamaClient::new(
            &config.llm_host,
            &config.llm_model,
            config.llm_timeout,
        )?);

        Ok(Self {
            store,
            embedder,
            llm,
            config: Arc::new(config),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
