use std::env;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the Tomekeep pipeline.
///
/// Every field has a default and can be overridden independently through the
/// environment. CLI flags may further override individual fields after load.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Ollama server used for embeddings and completions.
    pub ollama_url: String,
    /// Embedding model identifier passed to the service.
    pub embed_model: String,
    /// Completion model used by the `query` command.
    pub llm_model: String,
    /// Target chunk size in tokens.
    pub chunk_size: usize,
    /// Token overlap between consecutive chunks.
    pub chunk_overlap: usize,
    /// Number of chunks embedded per concurrent batch.
    pub batch_size: usize,
    /// Maximum attempts for a fully failed embedding batch.
    pub max_retries: u32,
    /// Pages between durable checkpoints of partial chunk output.
    pub checkpoint_interval: usize,
    /// Connection string for the processing ledger.
    pub database_url: String,
    /// Directory holding per-document chunk files.
    pub processed_dir: String,
}

impl Config {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            ollama_url: load_env_optional("OLLAMA_URL")
                .unwrap_or_else(|| "http://localhost:11434".to_string()),
            embed_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".to_string()),
            llm_model: load_env_optional("LLM_MODEL").unwrap_or_else(|| "llama3".to_string()),
            chunk_size: load_env_parsed("CHUNK_SIZE", 512)?,
            chunk_overlap: load_env_parsed("CHUNK_OVERLAP", 50)?,
            batch_size: load_env_parsed("EMBEDDING_BATCH_SIZE", 10)?,
            max_retries: load_env_parsed("MAX_RETRIES", 3)?,
            checkpoint_interval: load_env_parsed("CHECKPOINT_INTERVAL", 10)?,
            database_url: load_env_optional("DATABASE_URL")
                .unwrap_or_else(|| "sqlite://data/ledger.db?mode=rwc".to_string()),
            processed_dir: load_env_optional("PROCESSED_DIR")
                .unwrap_or_else(|| "data/processed".to_string()),
        })
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_parsed<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

/// Load the `.env` file (if present) and build a [`Config`] from the result.
pub fn init_config() -> Result<Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        ollama_url = %config.ollama_url,
        embed_model = %config.embed_model,
        chunk_size = config.chunk_size,
        chunk_overlap = config.chunk_overlap,
        batch_size = config.batch_size,
        "Loaded configuration"
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_environment() {
        let config = Config::from_env().expect("config");
        assert_eq!(config.chunk_size, 512);
        assert_eq!(config.chunk_overlap, 50);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.checkpoint_interval, 10);
        assert!(config.ollama_url.starts_with("http://"));
    }
}
