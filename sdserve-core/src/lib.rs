pub mod device_info;
pub mod device_map;
pub mod loader;
mod loader_factory;
pub mod optimization;
pub mod params;
pub mod profile;
mod util;

mod stable_diffusion;

pub use device_info::*;
pub use device_map::*;
use image::DynamicImage;
pub use loader::*;
pub use loader_factory::*;
pub use optimization::*;
pub use params::*;
pub use profile::*;
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionModel};
pub use util::*;

/// A loaded text-to-image model.
///
/// Implementations are shared between concurrent requests and must not rely on
/// any per-call mutable state.
pub trait ImagePipeline: Send + Sync {
    /// Produce one image. Identical `params` must produce identical images.
    fn run(&self, params: &GenerationParams) -> anyhow::Result<DynamicImage>;

    /// Hand cached allocations back to the device. A no-op where there is nothing to release.
    fn release_cached_memory(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
