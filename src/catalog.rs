use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::db::{self, CatalogEntry, DbPool, DescriptionRecord, ImportLocation};
use crate::description::{self, DescriptionEngine};
use crate::file_scanner::ScanError;
use crate::format_registry;
use crate::ingestion::{self, IngestError};
use crate::metadata_extractor::{ExtractError, MetadataExtractor};
use crate::search_index::IndexError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: i64 },
    #[error("Location already registered: {0}")]
    DuplicateLocation(String),
    #[error("Directory not found: {0}")]
    DirectoryNotFound(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Cannot read image: {0}")]
    Extraction(#[from] ExtractError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Search index error: {0}")]
    Index(#[from] IndexError),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<IngestError> for CatalogError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Scan(e) => Self::Scan(e),
            IngestError::Database(e) => Self::Database(e),
            IngestError::Task(e) => Self::Task(e),
        }
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Operations the HTTP layer and the scheduler run against the catalog.
#[derive(Clone)]
pub struct Catalog {
    pool: DbPool,
    engine: Arc<DescriptionEngine>,
}

impl Catalog {
    pub fn new(pool: DbPool, engine: Arc<DescriptionEngine>) -> Self {
        Self { pool, engine }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Registers a directory for scanning. The directory is stored in canonical form.
    pub async fn create_location(&self, directory: &str) -> CatalogResult<ImportLocation> {
        let canonical = tokio::fs::canonicalize(directory)
            .await
            .map_err(|_| CatalogError::DirectoryNotFound(directory.to_string()))?;
        let is_dir = tokio::fs::metadata(&canonical)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(CatalogError::DirectoryNotFound(directory.to_string()));
        }

        let canonical = canonical.to_string_lossy().to_string();
        let location = db::locations::create(&self.pool, &canonical)
            .await?
            .ok_or_else(|| CatalogError::DuplicateLocation(canonical.clone()))?;

        info!("Registered location {} ({})", location.id, location.directory);
        Ok(location)
    }

    /// Removes the registration. Entries already cataloged from it stay.
    pub async fn delete_location(&self, id: i64) -> CatalogResult<()> {
        if !db::locations::delete(&self.pool, id).await? {
            return Err(CatalogError::NotFound {
                kind: "Location",
                id,
            });
        }
        info!("Deleted location {}", id);
        Ok(())
    }

    pub async fn get_location(&self, id: i64) -> CatalogResult<ImportLocation> {
        db::locations::get_by_id(&self.pool, id)
            .await?
            .ok_or(CatalogError::NotFound {
                kind: "Location",
                id,
            })
    }

    pub async fn list_locations(&self) -> CatalogResult<Vec<ImportLocation>> {
        Ok(db::locations::list(&self.pool).await?)
    }

    /// Catalogs every new image under the location. Returns the number of entries added.
    pub async fn ingest(&self, location: &ImportLocation) -> CatalogResult<usize> {
        Ok(ingestion::ingest(&self.pool, location).await?)
    }

    /// Runs an ingest in the background. The outcome is only logged.
    pub fn spawn_ingest(&self, location: ImportLocation) -> JoinHandle<()> {
        let catalog = self.clone();
        tokio::spawn(async move {
            if let Err(e) = catalog.ingest(&location).await {
                error!("Background ingest of {} failed: {}", location.directory, e);
            }
        })
    }

    pub async fn list_entries(&self, limit: i64, offset: i64) -> CatalogResult<Vec<CatalogEntry>> {
        Ok(db::entries::list(&self.pool, limit.max(0), offset.max(0)).await?)
    }

    pub async fn get_entry(&self, id: i64) -> CatalogResult<CatalogEntry> {
        db::entries::get_by_id(&self.pool, id)
            .await?
            .ok_or(CatalogError::NotFound { kind: "Entry", id })
    }

    /// The entry's image in a standard format, with its content type.
    pub async fn get_displayable_bytes(&self, id: i64) -> CatalogResult<(Vec<u8>, &'static str)> {
        let entry = self.get_entry(id).await?;
        let path = PathBuf::from(&entry.location);

        let content_type = format_registry::from_path(&path)
            .map(|f| f.display_content_type())
            .unwrap_or("application/octet-stream");
        let bytes =
            tokio::task::spawn_blocking(move || MetadataExtractor::displayable_bytes(&path))
                .await??;

        Ok((bytes, content_type))
    }

    /// Sets a user-written description and publishes it to the search index.
    pub async fn set_user_description(&self, id: i64, text: &str) -> CatalogResult<CatalogEntry> {
        if !db::descriptions::store_user(&self.pool, id, text).await? {
            return Err(CatalogError::NotFound { kind: "Entry", id });
        }
        let entry = self.get_entry(id).await?;

        let metadata = description::indexed_metadata(&entry.attributes);
        self.engine.index().upsert(id, text, &metadata).await?;
        Ok(entry)
    }

    pub async fn descriptions(&self, id: i64) -> CatalogResult<Vec<DescriptionRecord>> {
        self.get_entry(id).await?;
        Ok(db::descriptions::list_for_entry(&self.pool, id).await?)
    }

    /// Entries whose descriptions best match `query`, best first.
    pub async fn search(&self, query: &str, k: usize) -> CatalogResult<Vec<CatalogEntry>> {
        let ids = self.engine.index().query(query, k).await?;

        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = db::entries::get_by_id(&self.pool, id).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    pub async fn describe_pending(&self) -> CatalogResult<usize> {
        Ok(self.engine.describe_pending().await?)
    }

    /// Makes entries whose description attempt failed eligible for the next pass.
    pub async fn retry_failed_descriptions(&self) -> CatalogResult<u64> {
        let reset = db::entries::reset_failed(&self.pool).await?;
        info!("Reset {} failed descriptions to pending", reset);
        Ok(reset)
    }
}
