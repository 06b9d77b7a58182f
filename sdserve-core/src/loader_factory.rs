use std::sync::Arc;

use anyhow::{anyhow, Result};
use candle_core::Device;
use hf_hub::api::tokio::Api;

use crate::{ImagePipeline, LoadTarget, Loader, ProfileSettings, StableDiffusionLoader};

pub const DEFAULT_MODEL_ID: &str = "runwayml/stable-diffusion-v1-5";

/// Supported Stable Diffusion releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVariant {
    V1_5,
    V2_1,
}

impl ModelVariant {
    /// Detect the variant from a hub model identifier.
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name = model_name.to_lowercase().replace(['_', '.'], "-");
        if !name.contains("stable-diffusion") {
            return None;
        }
        if name.contains("v1-5") || name.contains("1-5") {
            Some(Self::V1_5)
        } else if name.contains("2-1") {
            Some(Self::V2_1)
        } else {
            None
        }
    }

    /// Repository holding the CLIP tokenizer for this release.
    pub fn tokenizer_repo(self) -> &'static str {
        match self {
            Self::V1_5 | Self::V2_1 => "openai/clip-vit-base-patch32",
        }
    }
}

/// Load a pipeline for `model_name`, detecting the variant from the name.
pub async fn load_model(
    model_name: &str,
    api: Api,
    device: Device,
    settings: ProfileSettings,
) -> Result<Arc<dyn ImagePipeline>> {
    let variant = ModelVariant::from_name(model_name)
        .ok_or_else(|| anyhow!("Unsupported model: {}", model_name))?;

    tracing::info!(
        model = model_name,
        ?variant,
        profile = %settings.profile,
        "loading model"
    );

    let target = LoadTarget {
        model_id: model_name.to_string(),
        variant,
        device,
        settings,
    };
    let model = StableDiffusionLoader::load(api, target).await?;
    let enabled: Vec<String> = model
        .optimizations()
        .enabled()
        .map(|optimization| optimization.to_string())
        .collect();
    tracing::info!(optimizations = ?enabled, "pipeline ready");
    Ok(Arc::new(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_variants() {
        assert_eq!(
            ModelVariant::from_name(DEFAULT_MODEL_ID),
            Some(ModelVariant::V1_5)
        );
        assert_eq!(
            ModelVariant::from_name("benjamin-paine/stable-diffusion-v1-5"),
            Some(ModelVariant::V1_5)
        );
        assert_eq!(
            ModelVariant::from_name("stabilityai/stable-diffusion-2-1"),
            Some(ModelVariant::V2_1)
        );
        assert_eq!(
            ModelVariant::from_name("stabilityai/stable-diffusion-2.1"),
            Some(ModelVariant::V2_1)
        );
    }

    #[test]
    fn rejects_unknown_models() {
        assert_eq!(ModelVariant::from_name("black-forest-labs/FLUX.1-schnell"), None);
        assert_eq!(ModelVariant::from_name("stabilityai/stable-diffusion-xl-base-1.0"), None);
    }
}
