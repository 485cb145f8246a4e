use std::env;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_OLLAMA_MODEL: &str = "gemma3:4b";
pub const DEFAULT_LOCAL_MODEL: &str = "Salesforce/blip-image-captioning-large";

/// Which inference backend produces descriptions. Chosen once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionBackendKind {
    Ollama,
    Local,
}

impl FromStr for DescriptionBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ollama" | "remote" => Ok(Self::Ollama),
            "local" => Ok(Self::Local),
            other => Err(format!("Unknown description backend: {}", other)),
        }
    }
}

impl fmt::Display for DescriptionBackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Local => write!(f, "local"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DescriptionConfig {
    pub backend: DescriptionBackendKind,
    pub model: String,
    /// Compute device hint for the local backend ("cuda" or "cpu").
    pub device: String,
    pub ollama_host: String,
    pub ollama_timeout_secs: u64,
    pub model_cache_path: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_url: String,
    pub search_index_path: String,
    pub description: DescriptionConfig,
    pub scheduler_interval: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let backend: DescriptionBackendKind = env::var("CURATOR_DESCRIPTION_BACKEND")
            .unwrap_or_else(|_| "ollama".to_string())
            .parse()?;

        let default_model = match backend {
            DescriptionBackendKind::Ollama => DEFAULT_OLLAMA_MODEL,
            DescriptionBackendKind::Local => DEFAULT_LOCAL_MODEL,
        };

        Ok(Config {
            host: env::var("CURATOR_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("CURATOR_PORT")
                .unwrap_or_else(|_| "18474".to_string())
                .parse()?,
            db_url: env::var("CURATOR_DB_URL")
                .unwrap_or_else(|_| "sqlite://./data/curator.db".to_string()),
            search_index_path: env::var("CURATOR_SEARCH_INDEX_PATH")
                .unwrap_or_else(|_| "./data/curator-index.db".to_string()),
            description: DescriptionConfig {
                backend,
                model: env::var("CURATOR_DESCRIPTION_MODEL")
                    .unwrap_or_else(|_| default_model.to_string()),
                device: env::var("CURATOR_DEVICE").unwrap_or_else(|_| "cuda".to_string()),
                ollama_host: env::var("CURATOR_OLLAMA_HOST")
                    .unwrap_or_else(|_| "http://localhost:11434".to_string()),
                ollama_timeout_secs: env::var("CURATOR_OLLAMA_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()?,
                model_cache_path: env::var("CURATOR_MODEL_CACHE_PATH")
                    .unwrap_or_else(|_| "./data/models".to_string()),
            },
            scheduler_interval: env::var("CURATOR_SCHEDULER_INTERVAL")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()?,
        })
    }
}
