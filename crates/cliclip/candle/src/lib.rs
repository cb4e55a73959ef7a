//! Candle-based CLIP inference for text and image embeddings.
//!
//! Wraps the ViT-B/32 CLIP model from `candle-transformers` behind the
//! [`cliclip_core::EmbeddingProvider`] trait. Text and image features are the
//! raw projections: they are not L2-normalized, so scores computed from them
//! are scaled inner products rather than cosine similarities.
//!
//! # References
//!
//! - Model: <https://huggingface.co/openai/clip-vit-base-patch32>
//! - Paper: <https://arxiv.org/abs/2103.00020>

pub mod preprocess;

use candle_transformers::models::clip;
use eyre::WrapErr as _;

/// HuggingFace repository holding the ViT-B/32 checkpoint.
pub const MODEL_REPO: &str = "openai/clip-vit-base-patch32";

/// Hub revision that carries `model.safetensors` for [`MODEL_REPO`].
pub const MODEL_REVISION: &str = "refs/pr/15";

pub const MODEL_FILE: &str = "model.safetensors";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

/// Token that terminates every CLIP text sequence. The text tower pools the
/// hidden state at this position.
const END_OF_TEXT: &str = "<|endoftext|>";

/// A CLIP encoder using Candle.
pub struct ClipEncoder {
    model: clip::ClipModel,
    tokenizer: tokenizers::Tokenizer,
    device: candle_core::Device,
    image_size: usize,
    max_text_tokens: usize,
    end_of_text_id: u32,
}

impl ClipEncoder {
    /// Load a CLIP encoder from local files on the default device.
    ///
    /// # Arguments
    /// * `model_path` - Path to the model.safetensors file
    /// * `tokenizer_path` - Path to the tokenizer.json file
    pub fn load(
        model_path: impl AsRef<std::path::Path>,
        tokenizer_path: impl AsRef<std::path::Path>,
    ) -> eyre::Result<Self> {
        Self::load_with_device(model_path, tokenizer_path, default_device(false)?)
    }

    /// Load a CLIP encoder with a specific device.
    pub fn load_with_device(
        model_path: impl AsRef<std::path::Path>,
        tokenizer_path: impl AsRef<std::path::Path>,
        device: candle_core::Device,
    ) -> eyre::Result<Self> {
        let model_path = model_path.as_ref();
        let tokenizer_path = tokenizer_path.as_ref();

        tracing::info!(?model_path, ?device, "loading CLIP model");

        let config = clip::ClipConfig::vit_base_patch32();

        let vb = unsafe {
            candle_nn::VarBuilder::from_mmaped_safetensors(
                &[model_path],
                candle_core::DType::F32,
                &device,
            )
            .wrap_err_with(|| format!("failed to load weights from {}", model_path.display()))?
        };

        let model = clip::ClipModel::new(vb, &config).wrap_err("failed to build CLIP model")?;

        tracing::info!(tokenizer_path = %tokenizer_path.display(), "loading tokenizer");
        let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path).map_err(|e| {
            eyre::eyre!("failed to load tokenizer from {}: {e}", tokenizer_path.display())
        })?;

        let end_of_text_id = tokenizer
            .token_to_id(END_OF_TEXT)
            .ok_or_else(|| eyre::eyre!("tokenizer has no {END_OF_TEXT} token"))?;

        Ok(Self {
            model,
            tokenizer,
            device,
            image_size: config.image_size,
            max_text_tokens: config.text_config.max_position_embeddings,
            end_of_text_id,
        })
    }

    /// Download (or reuse the hf-hub cache for) the checkpoint and load it.
    pub fn from_hub(device: candle_core::Device) -> eyre::Result<Self> {
        let (model_path, tokenizer_path) = download_model()?;
        Self::load_with_device(model_path, tokenizer_path, device)
    }

    /// Encode a text prompt into a single embedding.
    pub fn encode_text(&self, text: &str) -> eyre::Result<cliclip_core::Embedding> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| eyre::eyre!("tokenization failed: {e}"))?;

        let ids = clip_token_ids(encoding.get_ids(), self.max_text_tokens, self.end_of_text_id);
        if ids.is_empty() {
            eyre::bail!("tokenizer produced no tokens for {text:?}");
        }

        let input_ids = candle_core::Tensor::new(ids.as_slice(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .wrap_err("failed to create input_ids tensor")?;

        let features = self
            .model
            .get_text_features(&input_ids)
            .wrap_err("text forward pass failed")?;

        features_to_embeddings(&features)?
            .into_iter()
            .next()
            .ok_or_else(|| eyre::eyre!("empty text output"))
    }

    /// Encode a single decoded image.
    pub fn encode_image(
        &self,
        image: &image::DynamicImage,
    ) -> eyre::Result<cliclip_core::Embedding> {
        self.encode_images_batch(std::slice::from_ref(image))?
            .into_iter()
            .next()
            .ok_or_else(|| eyre::eyre!("empty image output"))
    }

    /// Encode several images in one forward pass.
    pub fn encode_images_batch(
        &self,
        images: &[image::DynamicImage],
    ) -> eyre::Result<Vec<cliclip_core::Embedding>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let pixel_values = preprocess::images_to_batch(images, self.image_size, &self.device)?;

        let features = self
            .model
            .get_image_features(&pixel_values)
            .wrap_err("vision forward pass failed")?;

        let embeddings = features_to_embeddings(&features)?;
        if embeddings.len() != images.len() {
            eyre::bail!(
                "expected {} image embeddings, model returned {}",
                images.len(),
                embeddings.len()
            );
        }

        Ok(embeddings)
    }

    /// Get the device being used.
    #[must_use]
    pub fn device(&self) -> &candle_core::Device {
        &self.device
    }
}

impl cliclip_core::EmbeddingProvider for ClipEncoder {
    fn embed_text(&mut self, text: &str) -> eyre::Result<cliclip_core::Embedding> {
        self.encode_text(text)
    }

    fn embed_image(
        &mut self,
        image: &image::DynamicImage,
    ) -> eyre::Result<cliclip_core::Embedding> {
        self.encode_image(image)
    }

    fn embed_images(
        &mut self,
        images: &[image::DynamicImage],
    ) -> eyre::Result<Vec<cliclip_core::Embedding>> {
        self.encode_images_batch(images)
    }
}

/// Fetch the model weights and tokenizer, returning their local paths.
pub fn download_model() -> eyre::Result<(std::path::PathBuf, std::path::PathBuf)> {
    use hf_hub::api::sync::Api;

    let api = Api::new().wrap_err("failed to create HuggingFace API client")?;
    let repo = api.repo(hf_hub::Repo::with_revision(
        MODEL_REPO.to_string(),
        hf_hub::RepoType::Model,
        MODEL_REVISION.to_string(),
    ));

    let model_path = repo
        .get(MODEL_FILE)
        .wrap_err_with(|| format!("failed to download {MODEL_FILE}"))?;
    let tokenizer_path = repo
        .get(TOKENIZER_FILE)
        .wrap_err_with(|| format!("failed to download {TOKENIZER_FILE}"))?;

    Ok((model_path, tokenizer_path))
}

/// Fit token ids into the text context window.
///
/// Overlong sequences are cut to `max_len - 1` tokens and re-terminated with
/// the end-of-text token, since the text tower pools at that token.
fn clip_token_ids(ids: &[u32], max_len: usize, end_of_text_id: u32) -> Vec<u32> {
    if ids.len() <= max_len {
        return ids.to_vec();
    }

    let mut truncated = Vec::with_capacity(max_len);
    truncated.extend_from_slice(&ids[..max_len.saturating_sub(1)]);
    truncated.push(end_of_text_id);
    truncated
}

/// Split a `[batch, dim]` feature tensor into one embedding per row.
fn features_to_embeddings(
    features: &candle_core::Tensor,
) -> eyre::Result<Vec<cliclip_core::Embedding>> {
    let rows = features
        .to_dtype(candle_core::DType::F32)
        .wrap_err("failed to convert output to f32")?
        .to_device(&candle_core::Device::Cpu)
        .wrap_err("failed to move output to CPU")?
        .to_vec2::<f32>()
        .wrap_err("failed to convert output to vec")?;

    Ok(rows.into_iter().map(cliclip_core::Embedding::new).collect())
}

/// Pick the compute device.
///
/// Uses Metal or CUDA when built with the matching feature and the device is
/// present; otherwise (or when `force_cpu` is set) the CPU.
pub fn default_device(force_cpu: bool) -> eyre::Result<candle_core::Device> {
    if force_cpu {
        tracing::info!("using CPU device");
        return Ok(candle_core::Device::Cpu);
    }

    #[cfg(feature = "metal")]
    {
        let device =
            candle_core::Device::metal_if_available(0).wrap_err("failed to create Metal device")?;
        tracing::info!(?device, "using Metal device if available");
        Ok(device)
    }
    #[cfg(all(feature = "cuda", not(feature = "metal")))]
    {
        let device =
            candle_core::Device::cuda_if_available(0).wrap_err("failed to create CUDA device")?;
        tracing::info!(?device, "using CUDA device if available");
        Ok(device)
    }
    #[cfg(not(any(feature = "metal", feature = "cuda")))]
    {
        tracing::info!("using CPU device");
        Ok(candle_core::Device::Cpu)
    }
}
