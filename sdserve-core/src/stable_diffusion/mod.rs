use anyhow::{Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;

use crate::{
    flash_attention_support, seeded_noise, tensor_to_image, AppliedOptimizations,
    GenerationParams, ImagePipeline, LoadTarget, Loader, ModelVariant, Optimization,
};

const LATENT_CHANNELS: usize = 4;
const VAE_SCALE: f64 = 0.18215;

pub struct StableDiffusionModel {
    config: StableDiffusionConfig,
    device: Device,
    dtype: DType,
    text_device: Device,
    tokenizer: Tokenizer,
    pad_id: u32,
    text_model: ClipTextTransformer,
    vae: AutoEncoderKL,
    unet: UNet2DConditionModel,
    optimizations: AppliedOptimizations,
}

impl StableDiffusionModel {
    pub fn optimizations(&self) -> &AppliedOptimizations {
        &self.optimizations
    }

    fn encode_prompt(&self, prompt: &str) -> Result<Tensor> {
        let max_len = self.config.clip.max_position_embeddings;
        let mut tokens = self
            .tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > max_len {
            tracing::warn!(
                tokens = tokens.len(),
                max_len,
                "prompt is longer than the text encoder window, truncating"
            );
            tokens.truncate(max_len);
        }
        tokens.resize(max_len, self.pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.text_device)?.unsqueeze(0)?;
        let embeddings = self.text_model.forward(&tokens)?;
        Ok(embeddings.to_device(&self.device)?)
    }
}

impl ImagePipeline for StableDiffusionModel {
    fn run(&self, params: &GenerationParams) -> Result<DynamicImage> {
        let use_guidance = params.guidance_scale > 1.0;
        let mut scheduler = self.config.build_scheduler(params.steps)?;

        // --- Text conditioning, with the unconditional embedding first when guiding ---
        let cond = self.encode_prompt(&params.prompt)?;
        let text_embeddings = if use_guidance {
            let uncond = self.encode_prompt("")?;
            Tensor::cat(&[uncond, cond], 0)?
        } else {
            cond
        };
        let text_embeddings = text_embeddings.to_dtype(self.dtype)?;

        // --- Seeded initial latents ---
        let latents = seeded_noise(
            params.seed,
            (1, LATENT_CHANNELS, params.height / 8, params.width / 8),
            &self.device,
        )?;
        let mut latents = (latents * scheduler.init_noise_sigma())?.to_dtype(self.dtype)?;

        // --- Denoising loop ---
        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            let model_input = if use_guidance {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let model_input = scheduler.scale_model_input(model_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&model_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guidance {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * params.guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            tracing::debug!(step = index + 1, total = timesteps.len(), "denoising step done");
        }

        // --- Decode and rescale to u8 ---
        let decoded = self.vae.decode(&(latents / VAE_SCALE)?)?;
        let img = ((decoded.to_dtype(DType::F32)? / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let img = (img.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;
        tensor_to_image(&img.i(0)?)
    }

    fn release_cached_memory(&self) -> Result<()> {
        self.device.synchronize()?;
        Ok(())
    }
}

/// Hub files making up one Stable Diffusion checkpoint.
enum ModelFile {
    Tokenizer,
    Clip,
    Unet,
    Vae,
}

impl ModelFile {
    async fn get(&self, api: &Api, target: &LoadTarget) -> Result<std::path::PathBuf> {
        let fp16 = target.settings.precision == DType::F16;
        let (repo, path) = match self {
            Self::Tokenizer => (target.variant.tokenizer_repo(), "tokenizer.json"),
            Self::Clip if fp16 => (target.model_id.as_str(), "text_encoder/model.fp16.safetensors"),
            Self::Clip => (target.model_id.as_str(), "text_encoder/model.safetensors"),
            Self::Unet if fp16 => (
                target.model_id.as_str(),
                "unet/diffusion_pytorch_model.fp16.safetensors",
            ),
            Self::Unet => (target.model_id.as_str(), "unet/diffusion_pytorch_model.safetensors"),
            Self::Vae if fp16 => (
                target.model_id.as_str(),
                "vae/diffusion_pytorch_model.fp16.safetensors",
            ),
            Self::Vae => (target.model_id.as_str(), "vae/diffusion_pytorch_model.safetensors"),
        };
        api.model(repo.to_string())
            .get(path)
            .await
            .with_context(|| format!("failed to fetch {path} from {repo}"))
    }
}

pub struct StableDiffusionLoader;

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionModel;

    async fn load(api: Api, target: LoadTarget) -> Result<Self::Model> {
        let device = target.device.clone();
        let dtype = target.settings.precision;
        let memory = target.settings.memory;
        let mut optimizations = AppliedOptimizations::default();

        let config = match target.variant {
            ModelVariant::V1_5 => {
                StableDiffusionConfig::v1_5(memory.attention_slice_size, None, None)
            }
            ModelVariant::V2_1 => {
                StableDiffusionConfig::v2_1(memory.attention_slice_size, None, None)
            }
        };
        if memory.attention_slice_size.is_some() {
            optimizations.record(Optimization::AttentionSlicing);
        }

        // --- Tokenizer ---
        let tokenizer_file = ModelFile::Tokenizer.get(&api, &target).await?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;
        let pad_token = config.clip.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .with_context(|| format!("tokenizer has no padding token {pad_token}"))?;

        // --- CLIP text encoder (always f32), on the CPU when offloading ---
        let clip_file = ModelFile::Clip.get(&api, &target).await?;
        let offloaded = if memory.offload_text_encoder && !device.is_cpu() {
            optimizations.attempt(Optimization::TextEncoderOffload, || {
                Ok(stable_diffusion::build_clip_transformer(
                    &config.clip,
                    &clip_file,
                    &Device::Cpu,
                    DType::F32,
                )?)
            })
        } else {
            None
        };
        let (text_model, text_device) = match offloaded {
            Some(model) => (model, Device::Cpu),
            None => (
                stable_diffusion::build_clip_transformer(
                    &config.clip,
                    &clip_file,
                    &device,
                    DType::F32,
                )
                .context("failed to load CLIP text encoder")?,
                device.clone(),
            ),
        };

        // --- VAE ---
        let vae_file = ModelFile::Vae.get(&api, &target).await?;
        let vae = config
            .build_vae(&vae_file, &device, dtype)
            .context("failed to load VAE")?;

        // --- UNet, with flash attention when the build and device support it ---
        let unet_file = ModelFile::Unet.get(&api, &target).await?;
        let use_flash_attn = memory.flash_attention
            && optimizations
                .attempt(Optimization::FlashAttention, || {
                    flash_attention_support(&device)
                })
                .is_some();
        let unet = config
            .build_unet(&unet_file, &device, LATENT_CHANNELS, use_flash_attn, dtype)
            .context("failed to load UNet")?;

        tracing::info!(
            model = %target.model_id,
            device = ?device,
            ?dtype,
            "model loaded"
        );

        Ok(StableDiffusionModel {
            config,
            device,
            dtype,
            text_device,
            tokenizer,
            pad_id,
            text_model,
            vae,
            unet,
            optimizations,
        })
    }
}
