//! HTTP request handlers

use std::{sync::Arc, time::Instant};

use axum::extract::{Json, State};
use sdserve_core::{resolve, DeviceProfile, GenerationRequest, ImagePipeline};
use serde::{Deserialize, Serialize};

use crate::{
    encode::image_to_data_uri,
    error::{ApiError, JsonBody},
    state::AppState,
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub device: String,
    pub model_loaded: bool,
    pub profile: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_memory_gb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimized_for: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GenerationResponse {
    pub success: bool,
    pub image: String,
    pub prompt: String,
    pub steps: usize,
    pub guidance_scale: f64,
    pub dimensions: String,
    pub seed: u64,
    pub device: String,
}

/// Health check endpoint
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let profile = state.settings.profile;
    let optimized_for = match profile {
        DeviceProfile::ConstrainedGpu if state.device.is_gtx_1060() => Some("GTX 1060".to_string()),
        DeviceProfile::ConstrainedGpu => Some(profile.to_string()),
        DeviceProfile::Cpu | DeviceProfile::Gpu => None,
    };
    Json(HealthResponse {
        status: "healthy".to_string(),
        device: state.device.kind.to_string(),
        model_loaded: state.is_loaded(),
        profile: profile.to_string(),
        model: state.model_id.clone(),
        gpu_name: state.device.gpu_name.clone(),
        gpu_memory_gb: state.device.gpu_memory_gb,
        optimized_for,
    })
}

/// Image generation endpoint
pub async fn generate(
    State(state): State<Arc<AppState>>,
    payload: Result<JsonBody<GenerationRequest>, ApiError>,
) -> Result<Json<GenerationResponse>, ApiError> {
    let pipeline = state.pipeline().ok_or(ApiError::ModelNotLoaded)?;
    let JsonBody(request) = payload?;
    let params = resolve(request, &state.settings, &mut rand::thread_rng())?;
    let device = state.device.kind.to_string();

    tracing::info!(
        prompt = %params.prompt,
        seed = params.seed,
        steps = params.steps,
        dimensions = %params.dimensions(),
        %device,
        "generating image"
    );

    let clear_cache = state.settings.memory.clear_cache;
    let started = Instant::now();
    let worker_params = params.clone();
    let worker_pipeline = pipeline.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        if clear_cache {
            release_memory(worker_pipeline.as_ref());
        }
        let image = worker_pipeline.run(&worker_params);
        if clear_cache {
            release_memory(worker_pipeline.as_ref());
        }
        image_to_data_uri(&image?)
    })
    .await
    .map_err(anyhow::Error::from)
    .and_then(|encoded| encoded);

    let image = match outcome {
        Ok(image) => image,
        Err(err) => {
            tracing::error!("Error generating image: {err:#}");
            if state.settings.profile.is_gpu() {
                release_memory(pipeline.as_ref());
            }
            return Err(ApiError::Generation(format!("{err:#}")));
        }
    };

    tracing::info!(elapsed = ?started.elapsed(), "image generated");

    Ok(Json(GenerationResponse {
        success: true,
        image,
        dimensions: params.dimensions(),
        prompt: params.prompt,
        steps: params.steps,
        guidance_scale: params.guidance_scale,
        seed: params.seed,
        device,
    }))
}

fn release_memory(pipeline: &dyn ImagePipeline) {
    if let Err(err) = pipeline.release_cached_memory() {
        tracing::warn!("failed to release cached device memory: {err:#}");
    }
}
