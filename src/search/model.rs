use crate::core::config::Config;
use crate::core::error::{Error, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel as CandleClip};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::info;

/// Default embedding model: CLIP ViT-B/32, images and text share one 512-d space.
/// https://huggingface.co/openai/clip-vit-base-patch32
const DEFAULT_MODEL: &str = "openai/clip-vit-base-patch32";

/// Revision carrying `model.safetensors`
const DEFAULT_REVISION: &str = "refs/pr/15";

/// Identifier recorded in the index metadata. If this changes, the index is rebuilt.
pub const EMBEDDING_MODEL_ID: &str = "openai/clip-vit-base-patch32@refs/pr/15";

/// CLIP context length
const MAX_TEXT_TOKENS: usize = 77;

/// Turns images and text into vectors of one shared, fixed-dimension space.
///
/// Implementations must return unit-length vectors of [`dimension`](Self::dimension)
/// elements for both inputs, so that the dot product of an image vector and a
/// text vector is their cosine similarity.
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier of the underlying model
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Embed encoded image bytes (JPEG, PNG, ...)
    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>>;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>>;
}

/// Scale a vector to unit length. Zero vectors are returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// CLIP embedding model backed by candle
pub struct ClipModel {
    model: CandleClip,
    tokenizer: Tokenizer,
    config: ClipConfig,
    device: Device,
}

impl ClipModel {
    /// Load the model from the models directory, downloading it on first use.
    pub fn init(config: &Config) -> Result<Self> {
        std::fs::create_dir_all(&config.models_dir)?;

        let model_path = config.models_dir.join("clip-vit-base-patch32.safetensors");
        let tokenizer_path = config.models_dir.join("clip-tokenizer.json");

        if !model_path.exists() || !tokenizer_path.exists() {
            Self::download_model(&model_path, &tokenizer_path)?;
        }

        Self::load_model_files(&model_path, &tokenizer_path)
    }

    /// Download model from HuggingFace Hub
    fn download_model(model_path: &Path, tokenizer_path: &Path) -> Result<()> {
        info!("Downloading embedding model {} from HuggingFace Hub", DEFAULT_MODEL);

        let api = Api::new()?;
        let repo = api.repo(Repo::with_revision(
            DEFAULT_MODEL.to_string(),
            RepoType::Model,
            DEFAULT_REVISION.to_string(),
        ));

        let weights_file = repo.get("model.safetensors")?;
        let tokenizer_file = api.model(DEFAULT_MODEL.to_string()).get("tokenizer.json")?;

        std::fs::copy(&weights_file, model_path)?;
        std::fs::copy(&tokenizer_file, tokenizer_path)?;

        info!("Model downloaded to {}", model_path.display());
        Ok(())
    }

    /// Load model files from disk
    fn load_model_files(model_path: &Path, tokenizer_path: &Path) -> Result<Self> {
        let tokenizer = Tokenizer::from_file(tokenizer_path)
            .map_err(|e| Error::Tokenizer(format!("Failed to load tokenizer: {}", e)))?;

        let device = Device::cuda_if_available(0).unwrap_or(Device::Cpu);
        let config = ClipConfig::vit_base_patch32();

        // Safetensors are memory mapped, the file must stay in place while loaded.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_path], DType::F32, &device)
                .map_err(|e| Error::Model(format!("Failed to load weights: {}", e)))?
        };
        let model = CandleClip::new(vb, &config)
            .map_err(|e| Error::Model(format!("Failed to load model: {}", e)))?;

        info!("Loaded embedding model {} on {:?}", DEFAULT_MODEL, device);

        Ok(Self {
            model,
            tokenizer,
            config,
            device,
        })
    }

    /// Decode, resize to fill the square input and scale pixels to [-1, 1].
    fn preprocess(&self, bytes: &[u8]) -> Result<Tensor> {
        let size = self.config.image_size;
        let img = image::load_from_memory(bytes)?
            .resize_to_fill(size as u32, size as u32, image::imageops::FilterType::Triangle)
            .to_rgb8()
            .into_raw();

        let tensor = Tensor::from_vec(img, (size, size, 3), &self.device)?
            .permute((2, 0, 1))?
            .to_dtype(DType::F32)?
            .affine(2. / 255., -1.)?
            .unsqueeze(0)?;
        Ok(tensor)
    }

    fn tokenize(&self, text: &str) -> Result<Tensor> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| Error::Tokenizer(format!("Tokenization failed: {}", e)))?;

        let mut ids = encoding.get_ids().to_vec();
        if ids.len() > MAX_TEXT_TOKENS {
            // Keep the end-of-text token, the text tower pools on it.
            let eot = ids[ids.len() - 1];
            ids.truncate(MAX_TEXT_TOKENS);
            ids[MAX_TEXT_TOKENS - 1] = eot;
        }

        Ok(Tensor::new(ids.as_slice(), &self.device)?.unsqueeze(0)?)
    }

    fn to_unit_vec(features: Tensor) -> Result<Vec<f32>> {
        let v: Vec<f32> = features.squeeze(0)?.to_dtype(DType::F32)?.to_vec1()?;
        Ok(l2_normalize(v))
    }
}

impl EmbeddingProvider for ClipModel {
    fn model_id(&self) -> &str {
        EMBEDDING_MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.config.text_config.projection_dim
    }

    fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let pixels = self.preprocess(bytes)?;
        let features = self.model.get_image_features(&pixels)?;
        Self::to_unit_vec(features)
    }

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let input_ids = self.tokenize(text)?;
        let features = self.model.get_text_features(&input_ids)?;
        Self::to_unit_vec(features)
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Deterministic provider for tests.
    ///
    /// Image bytes are a comma separated list of floats, text is looked up in
    /// a fixed table. Bytes that do not parse fail like a corrupt image.
    pub struct FakeProvider {
        pub dim: usize,
        pub queries: Vec<(String, Vec<f32>)>,
    }

    impl FakeProvider {
        pub fn new(dim: usize) -> Self {
            Self {
                dim,
                queries: Vec::new(),
            }
        }

        pub fn with_query(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.queries.push((text.to_string(), vector));
            self
        }
    }

    impl EmbeddingProvider for FakeProvider {
        fn model_id(&self) -> &str {
            "fake"
        }

        fn dimension(&self) -> usize {
            self.dim
        }

        fn embed_image(&self, bytes: &[u8]) -> Result<Vec<f32>> {
            let text = std::str::from_utf8(bytes)
                .map_err(|e| Error::Model(format!("not an image: {}", e)))?;
            let v = text
                .trim()
                .split(',')
                .map(|s| s.trim().parse::<f32>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Model(format!("not an image: {}", e)))?;
            if v.len() != self.dim {
                return Err(Error::Model(format!("expected {} values, got {}", self.dim, v.len())));
            }
            Ok(l2_normalize(v))
        }

        fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
            self.queries
                .iter()
                .find(|(q, _)| q == text)
                .map(|(_, v)| l2_normalize(v.clone()))
                .ok_or_else(|| Error::Model(format!("unknown query: {}", text)))
        }
    }
}
