use chrono::Utc;

use super::models::ImportLocation;
use super::pool::DbPool;

/// Registers `directory`. Returns `None` if it is already registered.
pub async fn create(pool: &DbPool, directory: &str) -> Result<Option<ImportLocation>, sqlx::Error> {
    sqlx::query_as::<_, ImportLocation>(
        "INSERT INTO import_locations (directory, created_at) VALUES (?, ?)
         ON CONFLICT(directory) DO NOTHING
         RETURNING id, directory, created_at",
    )
    .bind(directory)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
}

/// Returns whether a row was deleted.
pub async fn delete(pool: &DbPool, id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM import_locations WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn get_by_id(pool: &DbPool, id: i64) -> Result<Option<ImportLocation>, sqlx::Error> {
    sqlx::query_as::<_, ImportLocation>("SELECT * FROM import_locations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn list(pool: &DbPool) -> Result<Vec<ImportLocation>, sqlx::Error> {
    sqlx::query_as::<_, ImportLocation>("SELECT * FROM import_locations ORDER BY id")
        .fetch_all(pool)
        .await
}
