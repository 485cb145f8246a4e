pub mod local;
pub mod ollama;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

use crate::config::{DescriptionBackendKind, DescriptionConfig};
use crate::db::{self, CatalogEntry, DbPool};
use crate::metadata_extractor::{CameraAttributes, ExtractError, MetadataExtractor};
use crate::search_index::{IndexError, IndexMetadata, SearchIndex};

pub use local::LocalBackend;
pub use ollama::OllamaBackend;

pub const DESCRIPTION_PROMPT: &str = "You are an expert image describer. Your task is to provide a detailed description of the image. Describe the image in detail, including its content, colors, and any notable features.";

/// Attributes stored next to each description in the search index.
pub const INDEXED_ATTRIBUTES: [&str; 7] = [
    "author",
    "camera",
    "date_taken",
    "exposure_time",
    "f_number",
    "iso",
    "focal_length",
];

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Cannot reach inference service at {host}: {message}")]
    Connection { host: String, message: String },
    #[error("Inference service returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Invalid response from inference service: {0}")]
    InvalidResponse(String),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Backend task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Turns image bytes into a description.
///
/// `prompt` is an instruction for models that follow one. Captioning models without
/// instruction following (BLIP) describe the image unconditionally and do not use it.
/// Implementations may panic; the engine records that as a failed attempt.
#[async_trait]
pub trait DescriptionBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn describe(&self, image: Vec<u8>, prompt: &str) -> Result<String, BackendError>;
}

pub fn create_backend(config: &DescriptionConfig) -> Arc<dyn DescriptionBackend> {
    match config.backend {
        DescriptionBackendKind::Ollama => Arc::new(OllamaBackend::new(
            &config.ollama_host,
            &config.model,
            config.ollama_timeout_secs,
        )),
        DescriptionBackendKind::Local => Arc::new(LocalBackend::new(
            &config.model,
            &config.device,
            PathBuf::from(&config.model_cache_path),
        )),
    }
}

#[derive(Error, Debug)]
enum AttemptError {
    #[error(transparent)]
    Source(#[from] ExtractError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Indexing failed: {0}")]
    Index(#[from] IndexError),
    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

enum Attempt {
    Described(String),
    Failed(AttemptError),
    Cancelled,
}

/// Text stored as the description of an entry whose attempt failed.
pub fn error_marker(error: &dyn std::fmt::Display) -> String {
    format!("Error describing image: {}", error)
}

/// The subset of `attributes` published to the search index. Absent values are left out.
pub fn indexed_metadata(attributes: &CameraAttributes) -> IndexMetadata {
    let mut metadata = IndexMetadata::new();
    if let Ok(Value::Object(all)) = serde_json::to_value(attributes) {
        for (key, value) in all {
            if INDEXED_ATTRIBUTES.contains(&key.as_str()) && !value.is_null() {
                metadata.insert(key, value);
            }
        }
    }
    metadata
}

/// Describes undescribed catalog entries with the configured backend and publishes the
/// results to the search index.
pub struct DescriptionEngine {
    pool: DbPool,
    backend: Arc<dyn DescriptionBackend>,
    index: Arc<dyn SearchIndex>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl DescriptionEngine {
    pub fn new(
        pool: DbPool,
        backend: Arc<dyn DescriptionBackend>,
        index: Arc<dyn SearchIndex>,
    ) -> Self {
        Self {
            pool,
            backend,
            index,
            shutdown: None,
        }
    }

    /// Stops passes between entries, and abandons in-flight backend calls, once the
    /// receiver reads `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Describes every entry whose description is still null. Returns how many were
    /// described successfully. Failures are recorded on the entry, never returned.
    pub async fn describe_pending(&self) -> Result<usize, sqlx::Error> {
        let entries = db::entries::list_undescribed(&self.pool).await?;
        if entries.is_empty() {
            debug!("No entries awaiting description");
            return Ok(0);
        }
        info!(
            "Describing {} entries with the {} backend",
            entries.len(),
            self.backend.name()
        );

        let mut described = 0;
        for entry in &entries {
            if self.is_shutting_down() {
                info!("Shutdown requested, stopping description pass");
                break;
            }
            match self.describe_entry(entry).await {
                Ok(true) => described += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to store description for entry {}: {}", entry.id, e),
            }
        }

        info!("Described {} of {} entries", described, entries.len());
        Ok(described)
    }

    async fn describe_entry(&self, entry: &CatalogEntry) -> Result<bool, sqlx::Error> {
        let text = match self.attempt(entry).await {
            Attempt::Cancelled => {
                debug!("Description of entry {} abandoned", entry.id);
                return Ok(false);
            }
            Attempt::Failed(e) => return self.record_failure(entry, e).await,
            Attempt::Described(text) => text,
        };

        // Index before storing: a stored description is never picked up again
        let metadata = indexed_metadata(&entry.attributes);
        if let Err(e) = self.index.upsert(entry.id, &text, &metadata).await {
            return self.record_failure(entry, e.into()).await;
        }

        if !db::descriptions::store_automated(&self.pool, entry.id, &text).await? {
            debug!("Entry {} was described meanwhile, keeping it", entry.id);
            self.republish(entry.id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    async fn record_failure(
        &self,
        entry: &CatalogEntry,
        e: AttemptError,
    ) -> Result<bool, sqlx::Error> {
        warn!("Failed to describe {}: {}", entry.location, e);
        db::entries::mark_failed(&self.pool, entry.id, &error_marker(&e)).await?;
        Ok(false)
    }

    /// Puts the entry's current description back into the index after a discarded result
    /// overwrote it there.
    async fn republish(&self, id: i64) -> Result<(), sqlx::Error> {
        let Some(current) = db::entries::get_by_id(&self.pool, id).await? else {
            return Ok(());
        };
        if let Some(text) = &current.description {
            let metadata = indexed_metadata(&current.attributes);
            if let Err(e) = self.index.upsert(id, text, &metadata).await {
                error!("Failed to re-index entry {}: {}", id, e);
            }
        }
        Ok(())
    }

    async fn attempt(&self, entry: &CatalogEntry) -> Attempt {
        let path = PathBuf::from(&entry.location);
        let image = match tokio::task::spawn_blocking(move || {
            MetadataExtractor::displayable_bytes(&path)
        })
        .await
        {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => return Attempt::Failed(e.into()),
            Err(e) => return Attempt::Failed(e.into()),
        };

        // A panicking backend only fails this entry
        let backend = Arc::clone(&self.backend);
        let mut call =
            tokio::spawn(async move { backend.describe(image, DESCRIPTION_PROMPT).await });
        let result = match self.shutdown.clone() {
            Some(mut rx) => {
                let finished = tokio::select! {
                    result = &mut call => Some(result),
                    _ = wait_for_shutdown(&mut rx) => None,
                };
                match finished {
                    Some(result) => result,
                    None => {
                        call.abort();
                        return Attempt::Cancelled;
                    }
                }
            }
            None => call.await,
        };

        match result {
            Ok(Ok(text)) => Attempt::Described(text),
            Ok(Err(e)) => Attempt::Failed(e.into()),
            Err(e) => Attempt::Failed(e.into()),
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            // Sender gone without signalling, so shutdown never comes
            std::future::pending::<()>().await;
        }
    }
}
