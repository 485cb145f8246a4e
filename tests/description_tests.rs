mod common;

use common::{
    jpeg_bytes, tagged_raw_bytes, test_catalog, write_file, Behaviour, BrokenEmbedder,
    FakeBackend,
};
use curator::db::{self, DescriptionStatus, AUTOMATED_AUTHOR, USER_AUTHOR};
use curator::description::{DescriptionEngine, OllamaBackend};
use curator::search_index::{SearchIndex, VectorIndex};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

async fn ingest_photos(t: &common::TestCatalog, photos: &TempDir) {
    let location = t
        .catalog
        .create_location(photos.path().to_str().unwrap())
        .await
        .unwrap();
    t.catalog.ingest(&location).await.unwrap();
}

#[tokio::test]
async fn test_successful_pass_describes_and_indexes() {
    let backend = FakeBackend::new(Behaviour::Reply("A cat asleep on a sofa".to_string()));
    let t = test_catalog(backend.clone()).await;
    let photos = TempDir::new().unwrap();
    // TIFF is passed to the backend verbatim
    write_file(&photos.path().join("b.tif"), &tagged_raw_bytes(200));
    ingest_photos(&t, &photos).await;

    let described = t.catalog.describe_pending().await.unwrap();
    assert_eq!(described, 1);
    assert_eq!(backend.calls(), 1);

    let entry = &t.catalog.list_entries(10, 0).await.unwrap()[0];
    assert_eq!(entry.description.as_deref(), Some("A cat asleep on a sofa"));
    assert_eq!(entry.description_status, DescriptionStatus::Described);

    let records = t.catalog.descriptions(entry.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].author, AUTOMATED_AUTHOR);

    let (text, metadata) = t.index.document(entry.id).await.unwrap().unwrap();
    assert_eq!(text, "A cat asleep on a sofa");
    assert_eq!(metadata.get("iso"), Some(&json!(200)));
    assert_eq!(metadata.get("camera"), Some(&json!("NIKON D750")));
    assert!(!metadata.contains_key("orientation"));

    // Nothing left to describe
    assert_eq!(t.catalog.describe_pending().await.unwrap(), 0);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_failed_backend_records_marker_and_is_not_retried() {
    let backend = FakeBackend::new(Behaviour::Fail);
    let t = test_catalog(backend.clone()).await;
    let photos = TempDir::new().unwrap();
    write_file(&photos.path().join("a.jpg"), &jpeg_bytes());
    ingest_photos(&t, &photos).await;

    assert_eq!(t.catalog.describe_pending().await.unwrap(), 0);
    assert_eq!(backend.calls(), 1);

    let entry = &t.catalog.list_entries(10, 0).await.unwrap()[0];
    let description = entry.description.clone().unwrap();
    assert!(description.starts_with("Error describing image:"));
    assert_eq!(entry.description_status, DescriptionStatus::Failed);
    assert!(t.index.is_empty().await.unwrap());

    assert_eq!(t.catalog.describe_pending().await.unwrap(), 0);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test]
async fn test_unreachable_ollama_records_marker() {
    let backend = Arc::new(OllamaBackend::new("http://127.0.0.1:9", "gemma3:4b", 5));
    let t = test_catalog(backend).await;
    let photos = TempDir::new().unwrap();
    write_file(&photos.path().join("a.jpg"), &jpeg_bytes());
    ingest_photos(&t, &photos).await;

    assert_eq!(t.catalog.describe_pending().await.unwrap(), 0);
    let entry = &t.catalog.list_entries(10, 0).await.unwrap()[0];
    assert!(entry
        .description
        .as_deref()
        .unwrap()
        .starts_with("Error describing image:"));

    let undescribed = db::entries::list_undescribed(&t.pool).await.unwrap();
    assert!(undescribed.is_empty());
}

#[tokio::test]
async fn test_undecodable_raw_is_a_per_entry_failure() {
    let backend = FakeBackend::new(Behaviour::Reply("A description".to_string()));
    let t = test_catalog(backend.clone()).await;
    let photos = TempDir::new().unwrap();
    write_file(&photos.path().join("a.jpg"), &jpeg_bytes());
    write_file(&photos.path().join("b.nef"), &tagged_raw_bytes(200));
    ingest_photos(&t, &photos).await;

    // The tagged TIFF has no sensor data, so development fails for b.nef only
    assert_eq!(t.catalog.describe_pending().await.unwrap(), 1);
    assert_eq!(backend.calls(), 1);

    let entries = t.catalog.list_entries(10, 0).await.unwrap();
    let a = entries.iter().find(|e| e.location.ends_with("a.jpg")).unwrap();
    let b = entries.iter().find(|e| e.location.ends_with("b.nef")).unwrap();
    assert_eq!(a.description_status, DescriptionStatus::Described);
    assert_eq!(b.description_status, DescriptionStatus::Failed);
}

#[tokio::test]
async fn test_retry_failed_descriptions() {
    let t = test_catalog(FakeBackend::new(Behaviour::Fail)).await;
    let photos = TempDir::new().unwrap();
    write_file(&photos.path().join("a.jpg"), &jpeg_bytes());
    ingest_photos(&t, &photos).await;
    t.catalog.describe_pending().await.unwrap();

    assert_eq!(t.catalog.retry_failed_descriptions().await.unwrap(), 1);
    let entry = &t.catalog.list_entries(10, 0).await.unwrap()[0];
    assert_eq!(entry.description, None);
    assert_eq!(entry.description_status, DescriptionStatus::Pending);

    let backend = FakeBackend::new(Behaviour::Reply("Snow on the mountain".to_string()));
    let engine = DescriptionEngine::new(
        t.pool.clone(),
        backend.clone(),
        t.index.clone() as Arc<dyn SearchIndex>,
    );
    assert_eq!(engine.describe_pending().await.unwrap(), 1);
    assert_eq!(backend.calls(), 1);

    assert_eq!(t.catalog.retry_failed_descriptions().await.unwrap(), 0);
}

#[tokio::test]
async fn test_user_description_is_kept_and_searchable() {
    let backend = FakeBackend::new(Behaviour::Reply("Sunset over the beach".to_string()));
    let t = test_catalog(backend.clone()).await;
    let photos = TempDir::new().unwrap();
    write_file(&photos.path().join("a.jpg"), &jpeg_bytes());
    write_file(&photos.path().join("b.jpg"), &jpeg_bytes());
    ingest_photos(&t, &photos).await;

    let entries = t.catalog.list_entries(10, 0).await.unwrap();
    let a = entries.iter().find(|e| e.location.ends_with("a.jpg")).unwrap();
    let updated = t
        .catalog
        .set_user_description(a.id, "My cat on the sofa")
        .await
        .unwrap();
    assert_eq!(updated.description.as_deref(), Some("My cat on the sofa"));

    // Only b.jpg is still undescribed
    assert_eq!(t.catalog.describe_pending().await.unwrap(), 1);
    assert_eq!(backend.calls(), 1);

    let a = t.catalog.get_entry(a.id).await.unwrap();
    assert_eq!(a.description.as_deref(), Some("My cat on the sofa"));
    let records = t.catalog.descriptions(a.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].author, USER_AUTHOR);

    let results = t.catalog.search("cat", 1).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, a.id);

    let results = t.catalog.search("beach sunset", 2).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].location.ends_with("b.jpg"));
}

#[tokio::test]
async fn test_user_description_for_missing_entry() {
    let t = test_catalog(FakeBackend::new(Behaviour::Fail)).await;
    let result = t.catalog.set_user_description(42, "Nothing here").await;
    assert!(matches!(
        result,
        Err(curator::catalog::CatalogError::NotFound { id: 42, .. })
    ));
}

#[tokio::test]
async fn test_shutdown_abandons_pass() {
    let backend = FakeBackend::new(Behaviour::Slow(Duration::from_secs(30)));
    let t = test_catalog(backend.clone()).await;
    let photos = TempDir::new().unwrap();
    write_file(&photos.path().join("a.jpg"), &jpeg_bytes());
    write_file(&photos.path().join("b.jpg"), &jpeg_bytes());
    ingest_photos(&t, &photos).await;

    let (tx, rx) = watch::channel(false);
    let engine = DescriptionEngine::new(
        t.pool.clone(),
        backend.clone(),
        t.index.clone() as Arc<dyn SearchIndex>,
    )
    .with_shutdown(rx);

    let pass = tokio::spawn(async move { engine.describe_pending().await });
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(true).unwrap();

    let described = tokio::time::timeout(Duration::from_secs(5), pass)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(described, 0);
    assert_eq!(backend.calls(), 1);

    // Abandoned entries stay pending
    let undescribed = db::entries::list_undescribed(&t.pool).await.unwrap();
    assert_eq!(undescribed.len(), 2);
}

#[tokio::test]
async fn test_panicking_backend_fails_only_that_entry() {
    let poison = tagged_raw_bytes(100);
    let backend = FakeBackend::new(Behaviour::PanicOn(poison.clone()));
    let t = test_catalog(backend.clone()).await;
    let photos = TempDir::new().unwrap();
    // a.tif sorts first and gets the lower id
    write_file(&photos.path().join("a.tif"), &poison);
    write_file(&photos.path().join("b.jpg"), &jpeg_bytes());
    ingest_photos(&t, &photos).await;

    assert_eq!(t.catalog.describe_pending().await.unwrap(), 1);
    assert_eq!(backend.calls(), 2);

    let entries = t.catalog.list_entries(10, 0).await.unwrap();
    let a = entries.iter().find(|e| e.location.ends_with("a.tif")).unwrap();
    let b = entries.iter().find(|e| e.location.ends_with("b.jpg")).unwrap();
    assert_eq!(a.description_status, DescriptionStatus::Failed);
    assert!(a
        .description
        .as_deref()
        .unwrap()
        .starts_with("Error describing image:"));
    assert_eq!(b.description_status, DescriptionStatus::Described);
    assert_eq!(b.description.as_deref(), Some("A cat on a sofa"));

    // The failure is terminal, the next pass has nothing to do
    assert_eq!(t.catalog.describe_pending().await.unwrap(), 0);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn test_index_failure_marks_entry_failed_and_retry_indexes_it() {
    let backend = FakeBackend::new(Behaviour::Reply("Snow on the mountain".to_string()));
    let t = test_catalog(backend.clone()).await;
    let photos = TempDir::new().unwrap();
    write_file(&photos.path().join("a.jpg"), &jpeg_bytes());
    ingest_photos(&t, &photos).await;

    let broken = VectorIndex::open(&t.dir.path().join("broken.db"), Arc::new(BrokenEmbedder))
        .await
        .unwrap();
    let engine = DescriptionEngine::new(
        t.pool.clone(),
        backend.clone(),
        Arc::new(broken) as Arc<dyn SearchIndex>,
    );
    assert_eq!(engine.describe_pending().await.unwrap(), 0);

    let entry = &t.catalog.list_entries(10, 0).await.unwrap()[0];
    assert_eq!(entry.description_status, DescriptionStatus::Failed);
    assert!(entry
        .description
        .as_deref()
        .unwrap()
        .starts_with("Error describing image:"));
    assert!(t.catalog.descriptions(entry.id).await.unwrap().is_empty());

    // Once the index works again, a retry gets the entry described and searchable
    assert_eq!(t.catalog.retry_failed_descriptions().await.unwrap(), 1);
    assert_eq!(t.catalog.describe_pending().await.unwrap(), 1);

    let entry = t.catalog.get_entry(entry.id).await.unwrap();
    assert_eq!(entry.description_status, DescriptionStatus::Described);
    let (text, _) = t.index.document(entry.id).await.unwrap().unwrap();
    assert_eq!(text, "Snow on the mountain");
    let results = t.catalog.search("mountain snow", 1).await.unwrap();
    assert_eq!(results[0].id, entry.id);
}
