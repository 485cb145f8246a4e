use log::{error, info};
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::db::{self, DbPool, ImportLocation};
use crate::file_scanner::{self, ScanError};
use crate::metadata_extractor::{ExtractedImage, MetadataExtractor};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Scans a location and catalogs every new image found. Safe to re-run: files already in
/// the catalog are neither re-extracted nor re-inserted.
pub async fn ingest(pool: &DbPool, location: &ImportLocation) -> Result<usize, IngestError> {
    let known = db::entries::locations_under(pool, &location.directory).await?;
    info!(
        "Ingesting {} ({} entries already cataloged)",
        location.directory,
        known.len()
    );

    let root = PathBuf::from(&location.directory);
    let images = tokio::task::spawn_blocking(move || scan_and_extract(&root, known)).await??;

    let added = db::entries::insert_batch(pool, &images).await?;
    info!(
        "Ingested {}: {} new entries ({} candidates)",
        location.directory,
        added,
        images.len()
    );
    Ok(added)
}

/// Walks the root and extracts each candidate in parallel. Per-file failures are logged
/// and the file is skipped.
fn scan_and_extract(
    root: &Path,
    known: HashSet<String>,
) -> Result<Vec<ExtractedImage>, ScanError> {
    let candidates: Vec<PathBuf> = file_scanner::scan(root, known)?.collect();

    Ok(candidates
        .par_iter()
        .filter_map(|path| match MetadataExtractor::extract(path) {
            Ok(image) => Some(image),
            Err(e) => {
                error!("Skipping {}: {}", path.display(), e);
                None
            }
        })
        .collect())
}
