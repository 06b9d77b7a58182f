use std::sync::{Arc, OnceLock};

use anyhow::{anyhow, Result};
use sdserve_core::{DeviceReport, ImagePipeline, ProfileSettings};

/// Shared application state.
///
/// The pipeline slot starts empty and is filled exactly once when loading
/// finishes; requests only ever read it.
pub struct AppState {
    pub model_id: String,
    pub device: DeviceReport,
    pub settings: ProfileSettings,
    pipeline: OnceLock<Arc<dyn ImagePipeline>>,
}

impl AppState {
    pub fn new(model_id: impl Into<String>, device: DeviceReport, settings: ProfileSettings) -> Self {
        Self {
            model_id: model_id.into(),
            device,
            settings,
            pipeline: OnceLock::new(),
        }
    }

    /// Install the loaded pipeline. Fails if one is already installed.
    pub fn install(&self, pipeline: Arc<dyn ImagePipeline>) -> Result<()> {
        self.pipeline
            .set(pipeline)
            .map_err(|_| anyhow!("a pipeline is already installed"))
    }

    pub fn pipeline(&self) -> Option<Arc<dyn ImagePipeline>> {
        self.pipeline.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.pipeline.get().is_some()
    }
}
