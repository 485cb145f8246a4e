use chrono::Utc;
use sqlx::SqliteConnection;

use super::models::{DescriptionRecord, DescriptionStatus, AUTOMATED_AUTHOR, USER_AUTHOR};
use super::pool::DbPool;

async fn upsert_record(
    conn: &mut SqliteConnection,
    entry_id: i64,
    author: &str,
    text: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO descriptions (entry_id, author, text, updated_at) VALUES (?, ?, ?, ?)
         ON CONFLICT(entry_id, author) DO UPDATE SET text = excluded.text,
                                                     updated_at = excluded.updated_at",
    )
    .bind(entry_id)
    .bind(author)
    .bind(text)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

/// Stores a generated description. Only applies while the entry is still undescribed, so a
/// description set by a user in the meantime wins. Returns whether it was applied.
pub async fn store_automated(pool: &DbPool, entry_id: i64, text: &str) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE catalog_entries SET description = ?, description_status = ?
         WHERE id = ? AND description IS NULL",
    )
    .bind(text)
    .bind(DescriptionStatus::Described)
    .bind(entry_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    upsert_record(&mut tx, entry_id, AUTOMATED_AUTHOR, text).await?;
    tx.commit().await?;
    Ok(true)
}

/// Stores a user-written description, replacing the entry's current one.
/// Returns false if the entry does not exist.
pub async fn store_user(pool: &DbPool, entry_id: i64, text: &str) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE catalog_entries SET description = ?, description_status = ? WHERE id = ?",
    )
    .bind(text)
    .bind(DescriptionStatus::Described)
    .bind(entry_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    upsert_record(&mut tx, entry_id, USER_AUTHOR, text).await?;
    tx.commit().await?;
    Ok(true)
}

pub async fn list_for_entry(
    pool: &DbPool,
    entry_id: i64,
) -> Result<Vec<DescriptionRecord>, sqlx::Error> {
    sqlx::query_as::<_, DescriptionRecord>(
        "SELECT * FROM descriptions WHERE entry_id = ? ORDER BY author",
    )
    .bind(entry_id)
    .fetch_all(pool)
    .await
}
