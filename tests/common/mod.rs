#![allow(dead_code)]

use async_trait::async_trait;
use exif::experimental::Writer;
use exif::{Field, In, Tag, Value};
use image::{ImageBuffer, Rgb, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use curator::catalog::Catalog;
use curator::db::{self, DbPool};
use curator::description::{BackendError, DescriptionBackend, DescriptionEngine};
use curator::search_index::{IndexError, SearchIndex, TextEmbedder, VectorIndex};

pub fn jpeg_bytes() -> Vec<u8> {
    let img: RgbImage = ImageBuffer::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 128]));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .unwrap();
    bytes
}

/// A TIFF container carrying only EXIF tags. Good enough to stand in for a RAW file when
/// only metadata is read.
pub fn tagged_raw_bytes(iso: u16) -> Vec<u8> {
    let fields = [
        Field {
            tag: Tag::Model,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![b"NIKON D750".to_vec()]),
        },
        Field {
            tag: Tag::PhotographicSensitivity,
            ifd_num: In::PRIMARY,
            value: Value::Short(vec![iso]),
        },
    ];
    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut buf = Cursor::new(Vec::new());
    writer.write(&mut buf, false).unwrap();
    buf.into_inner()
}

pub fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

pub async fn test_pool(dir: &TempDir) -> DbPool {
    let path = dir.path().join("catalog.db");
    db::create_db_pool(path.to_str().unwrap()).await.unwrap()
}

const VOCABULARY: [&str; 6] = ["sunset", "beach", "cat", "sofa", "mountain", "snow"];

/// One dimension per known word plus a constant bias dimension.
pub struct KeywordEmbedder;

impl TextEmbedder for KeywordEmbedder {
    fn dimensions(&self) -> usize {
        VOCABULARY.len() + 1
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let lower = text.to_lowercase();
        let mut vector: Vec<f32> = VOCABULARY
            .iter()
            .map(|word| if lower.contains(word) { 1.0 } else { 0.0 })
            .collect();
        vector.push(0.1);
        Ok(vector)
    }
}

/// Right dimensions, but every embedding fails.
pub struct BrokenEmbedder;

impl TextEmbedder for BrokenEmbedder {
    fn dimensions(&self) -> usize {
        VOCABULARY.len() + 1
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>, IndexError> {
        Err(IndexError::Embedding("model weights missing".to_string()))
    }
}

pub async fn test_index(dir: &TempDir) -> Arc<VectorIndex> {
    Arc::new(
        VectorIndex::open(&dir.path().join("index.db"), Arc::new(KeywordEmbedder))
            .await
            .unwrap(),
    )
}

pub enum Behaviour {
    Reply(String),
    Fail,
    Slow(Duration),
    Panic,
    /// Panics on these exact image bytes, replies otherwise.
    PanicOn(Vec<u8>),
}

/// Backend double that counts calls.
pub struct FakeBackend {
    pub behaviour: Behaviour,
    pub calls: AtomicUsize,
}

impl FakeBackend {
    pub fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DescriptionBackend for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn describe(&self, image: Vec<u8>, _prompt: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(!image.is_empty());
        match &self.behaviour {
            Behaviour::Reply(text) => Ok(text.clone()),
            Behaviour::Fail => Err(BackendError::Connection {
                host: "http://127.0.0.1:9".to_string(),
                message: "connection refused".to_string(),
            }),
            Behaviour::Slow(delay) => {
                tokio::time::sleep(*delay).await;
                Ok("A slow description".to_string())
            }
            Behaviour::Panic => panic!("backend exploded"),
            Behaviour::PanicOn(bytes) if *bytes == image => panic!("backend exploded"),
            Behaviour::PanicOn(_) => Ok("A cat on a sofa".to_string()),
        }
    }
}

pub struct TestCatalog {
    pub dir: TempDir,
    pub pool: DbPool,
    pub index: Arc<VectorIndex>,
    pub catalog: Catalog,
}

pub async fn test_catalog(backend: Arc<dyn DescriptionBackend>) -> TestCatalog {
    let dir = TempDir::new().unwrap();
    let pool = test_pool(&dir).await;
    let index = test_index(&dir).await;
    let engine = DescriptionEngine::new(
        pool.clone(),
        backend,
        index.clone() as Arc<dyn SearchIndex>,
    );
    let catalog = Catalog::new(pool.clone(), Arc::new(engine));
    TestCatalog {
        dir,
        pool,
        index,
        catalog,
    }
}
