use std::future::Future;

use anyhow::Result;
use candle_core::Device;
use hf_hub::api::tokio::Api;

use crate::{ImagePipeline, ModelVariant, ProfileSettings};

/// Everything a loader needs to know about where and how to place the model.
#[derive(Debug, Clone)]
pub struct LoadTarget {
    pub model_id: String,
    pub variant: ModelVariant,
    pub device: Device,
    pub settings: ProfileSettings,
}

pub trait Loader {
    type Model: ImagePipeline;

    fn load(api: Api, target: LoadTarget) -> impl Future<Output = Result<Self::Model>>
    where
        Self: Sized;
}
