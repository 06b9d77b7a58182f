use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ProfileSettings;

/// Body of a generate call. Everything is optional on the wire so that a missing
/// prompt is reported as a request error instead of a deserialization failure.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
pub struct GenerationRequest {
    pub prompt: Option<String>,
    pub steps: Option<usize>,
    pub guidance_scale: Option<f64>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub seed: Option<u64>,
}

/// Parameters a pipeline actually runs with.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub prompt: String,
    pub steps: usize,
    pub guidance_scale: f64,
    pub width: usize,
    pub height: usize,
    pub seed: u64,
}

impl GenerationParams {
    pub fn dimensions(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    #[error("Missing 'prompt' in request")]
    MissingPrompt,
    #[error("'steps' must be at least 1")]
    ZeroSteps,
    #[error("'steps' must be at most {max}, got {value}")]
    TooManySteps { value: usize, max: usize },
    #[error("'{name}' must be a positive multiple of 8, got {value}")]
    BadDimension { name: &'static str, value: usize },
    #[error("'guidance_scale' must be a finite number")]
    BadGuidance,
}

/// Fills in profile defaults and applies the profile's size cap.
///
/// The seed comes from the profile's fixed seed if one is configured, then the
/// request, then `rng`.
pub fn resolve<R: Rng + ?Sized>(
    request: GenerationRequest,
    settings: &ProfileSettings,
    rng: &mut R,
) -> Result<GenerationParams, ParamError> {
    let prompt = match request.prompt {
        Some(prompt) if !prompt.trim().is_empty() => prompt,
        _ => return Err(ParamError::MissingPrompt),
    };

    let steps = request.steps.unwrap_or(settings.default_steps);
    if steps == 0 {
        return Err(ParamError::ZeroSteps);
    }
    if steps > settings.max_steps {
        return Err(ParamError::TooManySteps {
            value: steps,
            max: settings.max_steps,
        });
    }

    let guidance_scale = request
        .guidance_scale
        .unwrap_or(settings.default_guidance_scale);
    if !guidance_scale.is_finite() {
        return Err(ParamError::BadGuidance);
    }

    let width = clamp_dimension("width", request.width, settings)?;
    let height = clamp_dimension("height", request.height, settings)?;

    let seed = settings
        .fixed_seed
        .or(request.seed)
        .unwrap_or_else(|| random_seed(rng));

    Ok(GenerationParams {
        prompt,
        steps,
        guidance_scale,
        width,
        height,
        seed,
    })
}

fn clamp_dimension(
    name: &'static str,
    value: Option<usize>,
    settings: &ProfileSettings,
) -> Result<usize, ParamError> {
    let value = value
        .unwrap_or(settings.default_dimension)
        .min(settings.max_dimension);
    // the VAE works on 8x downsampled latents
    if value == 0 || value % 8 != 0 {
        return Err(ParamError::BadDimension { name, value });
    }
    Ok(value)
}

/// A seed in the 32-bit range, which is what clients usually echo back.
pub fn random_seed<R: Rng + ?Sized>(rng: &mut R) -> u64 {
    rng.gen_range(0..=u64::from(u32::MAX))
}
