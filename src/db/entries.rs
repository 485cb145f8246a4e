use chrono::Utc;
use log::debug;
use sqlx::SqliteConnection;
use std::collections::HashSet;
use std::path::MAIN_SEPARATOR;

use super::models::{CatalogEntry, DescriptionStatus};
use super::pool::DbPool;
use crate::metadata_extractor::ExtractedImage;

/// `directory` with exactly one trailing separator, so `/photos` does not match `/photos2`.
pub fn directory_prefix(directory: &str) -> String {
    format!("{}{}", directory.trim_end_matches(MAIN_SEPARATOR), MAIN_SEPARATOR)
}

/// Locations of all entries stored underneath `directory`.
pub async fn locations_under(
    pool: &DbPool,
    directory: &str,
) -> Result<HashSet<String>, sqlx::Error> {
    let prefix = directory_prefix(directory);
    let locations: Vec<String> = sqlx::query_scalar(
        "SELECT location FROM catalog_entries WHERE substr(location, 1, length(?)) = ?",
    )
    .bind(&prefix)
    .bind(&prefix)
    .fetch_all(pool)
    .await?;

    Ok(locations.into_iter().collect())
}

/// Inserts the entry unless its location is already cataloged. Returns whether a row was
/// added. A concurrent insert of the same location is not an error.
pub async fn insert_if_absent(
    conn: &mut SqliteConnection,
    image: &ExtractedImage,
) -> Result<bool, sqlx::Error> {
    let attrs = &image.attributes;
    let result = sqlx::query(
        r#"
        INSERT INTO catalog_entries (
            location, content_fingerprint, format, description_status,
            author, camera, orientation, x_resolution, y_resolution, date_taken,
            exposure_time, f_number, iso, focal_length, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(location) DO NOTHING
        "#,
    )
    .bind(&image.location)
    .bind(&image.content_fingerprint)
    .bind(&image.format)
    .bind(DescriptionStatus::Pending)
    .bind(&attrs.author)
    .bind(&attrs.camera)
    .bind(attrs.orientation)
    .bind(attrs.x_resolution)
    .bind(attrs.y_resolution)
    .bind(attrs.date_taken)
    .bind(attrs.exposure_time)
    .bind(attrs.f_number)
    .bind(attrs.iso)
    .bind(attrs.focal_length)
    .bind(Utc::now())
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        debug!("Skipping already cataloged location: {}", image.location);
        return Ok(false);
    }
    Ok(true)
}

/// Writes a batch of new entries in one transaction. Returns the number actually added.
pub async fn insert_batch(pool: &DbPool, images: &[ExtractedImage]) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut added = 0;

    for image in images {
        if insert_if_absent(&mut tx, image).await? {
            added += 1;
        }
    }

    tx.commit().await?;
    Ok(added)
}

pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<CatalogEntry>, sqlx::Error> {
    sqlx::query_as::<_, CatalogEntry>("SELECT * FROM catalog_entries WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list(pool: &DbPool, limit: i64, offset: i64) -> Result<Vec<CatalogEntry>, sqlx::Error> {
    sqlx::query_as::<_, CatalogEntry>(
        "SELECT * FROM catalog_entries ORDER BY id LIMIT ? OFFSET ?",
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(pool)
    .await
}

pub async fn count(pool: &DbPool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM catalog_entries")
        .fetch_one(pool)
        .await
}

/// Entries that have never received a description, successful or not.
pub async fn list_undescribed(pool: &DbPool) -> Result<Vec<CatalogEntry>, sqlx::Error> {
    sqlx::query_as::<_, CatalogEntry>(
        "SELECT * FROM catalog_entries WHERE description IS NULL ORDER BY id",
    )
    .fetch_all(pool)
    .await
}

/// Stores an error marker as the description so the entry is not picked up again.
/// Leaves entries that were described in the meantime alone.
pub async fn mark_failed(pool: &DbPool, id: i64, marker: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE catalog_entries SET description = ?, description_status = ?
         WHERE id = ? AND description IS NULL",
    )
    .bind(marker)
    .bind(DescriptionStatus::Failed)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Returns failed entries to the pending state. Returns how many were reset.
pub async fn reset_failed(pool: &DbPool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE catalog_entries SET description = NULL, description_status = ?
         WHERE description_status = ?",
    )
    .bind(DescriptionStatus::Pending)
    .bind(DescriptionStatus::Failed)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
