use anyhow::{Context, Error as E, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::blip;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokenizers::Tokenizer;

use super::{BackendError, DescriptionBackend};
use crate::config::DEFAULT_LOCAL_MODEL;

// BLIP preprocessing uses the CLIP normalization constants
const IMAGE_SIZE: u32 = 384;
const IMAGE_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const IMAGE_STD: [f32; 3] = [0.26862954, 0.261_302_6, 0.275_777_1];

// The safetensors weights of the default model live on this revision
const DEFAULT_MODEL_REVISION: &str = "refs/pr/18";

const BOS_TOKEN_ID: u32 = 30522;
const SEP_TOKEN_ID: u32 = 102;
const MAX_CAPTION_TOKENS: usize = 128;
const SAMPLING_SEED: u64 = 299792458;

struct LoadedBlip {
    model: blip::BlipForConditionalGeneration,
    tokenizer: Tokenizer,
}

struct LocalModel {
    model_name: String,
    device: Device,
    cache_dir: PathBuf,
    loaded: Mutex<Option<LoadedBlip>>,
}

/// Captions images with a BLIP model run in-process through candle.
///
/// The model is loaded on first use and kept for the lifetime of the backend. BLIP produces
/// unconditional captions, so the prompt is not used.
#[derive(Clone)]
pub struct LocalBackend {
    inner: Arc<LocalModel>,
}

impl LocalBackend {
    pub fn new(model_name: &str, device_hint: &str, cache_dir: impl Into<PathBuf>) -> Self {
        let device = select_device(device_hint);
        info!(
            "Local description backend: {} on {:?}",
            model_name, device
        );

        Self {
            inner: Arc::new(LocalModel {
                model_name: model_name.to_string(),
                device,
                cache_dir: cache_dir.into(),
                loaded: Mutex::new(None),
            }),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.inner
            .loaded
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

/// CUDA when requested and available, CPU otherwise.
fn select_device(hint: &str) -> Device {
    if hint.eq_ignore_ascii_case("cuda") {
        match Device::cuda_if_available(0) {
            Ok(device) => return device,
            Err(e) => log::warn!("CUDA unavailable, falling back to CPU: {}", e),
        }
    }
    Device::Cpu
}

impl LocalModel {
    fn caption(&self, image: &[u8]) -> Result<String> {
        let mut slot = self
            .loaded
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to acquire model lock: {}", e))?;

        if slot.is_none() {
            *slot = Some(self.load()?);
        }
        let loaded = slot
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Model slot empty after loading"))?;

        let pixels = preprocess_image(image, &self.device)?;
        let image_embeds = pixels.unsqueeze(0)?.apply(loaded.model.vision_model())?;

        let token_ids = generate_tokens(&mut loaded.model, &image_embeds, &[BOS_TOKEN_ID])?;

        debug!("Generated {} caption tokens", token_ids.len());
        let caption = loaded
            .tokenizer
            .decode(&token_ids, true)
            .map_err(E::msg)?;
        Ok(caption.trim().to_string())
    }

    fn load(&self) -> Result<LoadedBlip> {
        info!("Loading description model {}...", self.model_name);

        let api = hf_hub::api::sync::ApiBuilder::new()
            .with_cache_dir(self.cache_dir.clone())
            .build()
            .context("Failed to build HuggingFace API")?;

        let weights_repo = if self.model_name == DEFAULT_LOCAL_MODEL {
            hf_hub::Repo::with_revision(
                self.model_name.clone(),
                hf_hub::RepoType::Model,
                DEFAULT_MODEL_REVISION.into(),
            )
        } else {
            hf_hub::Repo::model(self.model_name.clone())
        };

        let weights_filename = api
            .repo(weights_repo)
            .get("model.safetensors")
            .context("Failed to download model weights")?;
        let tokenizer_filename = api
            .model(self.model_name.clone())
            .get("tokenizer.json")
            .context("Failed to download tokenizer")?;

        let config = blip::Config::image_captioning_large();
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &self.device)
                .context("Failed to load safetensors")?
        };
        let model = blip::BlipForConditionalGeneration::new(&config, vb)?;
        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(E::msg)
            .context("Failed to load tokenizer")?;

        info!("Description model loaded");
        Ok(LoadedBlip { model, tokenizer })
    }
}

/// The text decoder half of a captioning model.
trait CaptionDecoder {
    /// Logits of shape (1, tokens, vocabulary) for the next positions.
    fn decode_step(
        &mut self,
        input_ids: &Tensor,
        image_embeds: &Tensor,
    ) -> candle_core::Result<Tensor>;
    fn reset(&mut self);
}

impl CaptionDecoder for blip::BlipForConditionalGeneration {
    fn decode_step(
        &mut self,
        input_ids: &Tensor,
        image_embeds: &Tensor,
    ) -> candle_core::Result<Tensor> {
        self.text_decoder().forward(input_ids, image_embeds)
    }

    fn reset(&mut self) {
        self.reset_kv_cache();
    }
}

/// Greedy decoding after `prefix` until the separator or the token limit. Returns the
/// generated tokens without the prefix. The decoder's cache is cleared before and after,
/// failed runs included.
fn generate_tokens(
    decoder: &mut impl CaptionDecoder,
    image_embeds: &Tensor,
    prefix: &[u32],
) -> Result<Vec<u32>> {
    decoder.reset();
    let result = decode_loop(decoder, image_embeds, prefix);
    decoder.reset();
    result
}

fn decode_loop(
    decoder: &mut impl CaptionDecoder,
    image_embeds: &Tensor,
    prefix: &[u32],
) -> Result<Vec<u32>> {
    let device = image_embeds.device();
    let mut logits_processor = LogitsProcessor::new(SAMPLING_SEED, None, None);
    let mut token_ids = prefix.to_vec();

    for index in 0..MAX_CAPTION_TOKENS {
        let context_size = if index > 0 { 1 } else { token_ids.len() };
        let start_pos = token_ids.len().saturating_sub(context_size);
        let input_ids = Tensor::new(&token_ids[start_pos..], device)?.unsqueeze(0)?;

        let logits = decoder.decode_step(&input_ids, image_embeds)?;
        let logits = logits.squeeze(0)?;
        let logits = logits.get(logits.dim(0)? - 1)?;

        let token = logits_processor.sample(&logits)?;
        if token == SEP_TOKEN_ID {
            break;
        }
        token_ids.push(token);
    }

    Ok(token_ids.split_off(prefix.len()))
}

/// Decodes, resizes to the model's input size and normalizes into a (3, H, W) tensor.
fn preprocess_image(bytes: &[u8], device: &Device) -> Result<Tensor> {
    let img = image::load_from_memory(bytes)
        .context("Failed to decode image")?
        .resize_to_fill(
            IMAGE_SIZE,
            IMAGE_SIZE,
            image::imageops::FilterType::Triangle,
        )
        .to_rgb8();

    let data = Tensor::from_vec(
        img.into_raw(),
        (IMAGE_SIZE as usize, IMAGE_SIZE as usize, 3),
        device,
    )?
    .permute((2, 0, 1))?;
    let mean = Tensor::new(&IMAGE_MEAN, device)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&IMAGE_STD, device)?.reshape((3, 1, 1))?;

    Ok((data.to_dtype(DType::F32)? / 255.)?
        .broadcast_sub(&mean)?
        .broadcast_div(&std)?)
}

#[async_trait]
impl DescriptionBackend for LocalBackend {
    fn name(&self) -> &str {
        "local"
    }

    async fn describe(&self, image: Vec<u8>, _prompt: &str) -> Result<String, BackendError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || inner.caption(&image))
            .await?
            .map_err(|e| BackendError::Model(format!("{:#}", e)))
    }
}
