use anyhow::{Context, Error as E, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip;
use log::info;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

use super::{IndexError, TextEmbedder};

// Model configuration
const CLIP_MODEL: &str = "openai/clip-vit-base-patch32";
const MODEL_REVISION: &str = "d15b5f29721ca72dac15f8526b284be910de18be";
const EMBEDDING_DIMENSIONS: usize = 512;

// Text encoding parameters
const CONTEXT_LENGTH: usize = 77;
const EOT_TOKEN: u32 = 49407;

struct LoadedClip {
    model: clip::ClipModel,
    tokenizer: Tokenizer,
}

/// CLIP ViT-B/32 text tower. Weights are fetched and loaded on the first call to `embed`.
pub struct ClipTextEmbedder {
    cache_dir: PathBuf,
    device: Device,
    loaded: Mutex<Option<Arc<LoadedClip>>>,
}

impl ClipTextEmbedder {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            device: Device::Cpu,
            loaded: Mutex::new(None),
        }
    }

    fn model(&self) -> Result<Arc<LoadedClip>> {
        let mut slot = self
            .loaded
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire model lock: {}", e))?;

        if let Some(loaded) = slot.as_ref() {
            return Ok(Arc::clone(loaded));
        }

        info!("Loading CLIP text model...");
        let loaded = Arc::new(load_clip_model(&self.device, &self.cache_dir)?);
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }
}

impl TextEmbedder for ClipTextEmbedder {
    fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        let embed = || -> Result<Vec<f32>> {
            let loaded = self.model()?;
            let features = encode_text(&loaded.model, &loaded.tokenizer, text, &self.device)?;
            Ok(features.flatten_all()?.to_vec1()?)
        };
        embed().map_err(|e| IndexError::Embedding(format!("{:#}", e)))
    }
}

fn load_clip_model(device: &Device, cache_dir: &Path) -> Result<LoadedClip> {
    let model_repo = hf_hub::api::sync::ApiBuilder::new()
        .with_cache_dir(cache_dir.to_path_buf())
        .build()
        .context("Failed to build HuggingFace API")?
        .repo(hf_hub::Repo::with_revision(
            CLIP_MODEL.into(),
            hf_hub::RepoType::Model,
            MODEL_REVISION.into(),
        ));

    let weights_filename = model_repo
        .get("model.safetensors")
        .context("Failed to download model weights")?;
    let tokenizer_filename = model_repo
        .get("tokenizer.json")
        .context("Failed to download tokenizer")?;

    let config = clip::ClipConfig::vit_base_patch32();
    let vb = unsafe {
        VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, device)
            .context("Failed to load safetensors")?
    };

    let model = clip::ClipModel::new(vb, &config)?;
    let tokenizer = Tokenizer::from_file(tokenizer_filename)
        .map_err(E::msg)
        .context("Failed to load tokenizer")?;

    Ok(LoadedClip { model, tokenizer })
}

fn encode_text(
    model: &clip::ClipModel,
    tokenizer: &Tokenizer,
    text: &str,
    device: &Device,
) -> Result<Tensor> {
    let mut tokens = tokenizer
        .encode(text, true)
        .map_err(E::msg)?
        .get_ids()
        .to_vec();

    if tokens.len() < CONTEXT_LENGTH {
        tokens.resize(CONTEXT_LENGTH, EOT_TOKEN);
    } else {
        tokens.truncate(CONTEXT_LENGTH);
    }

    let token_ids = Tensor::new(&tokens[..], device)?.unsqueeze(0)?;
    let features = model.get_text_features(&token_ids)?;
    normalize_vector(&features)
}

fn normalize_vector(vector: &Tensor) -> Result<Tensor> {
    let dim = match vector.rank() {
        1 => 0,
        2 => 1,
        r => {
            return Err(anyhow::anyhow!(
                "Unexpected tensor rank for normalization: {}",
                r
            ))
        }
    };
    let norm = vector.sqr()?.sum_keepdim(dim)?.sqrt()?;
    Ok(vector.broadcast_div(&norm)?)
}
