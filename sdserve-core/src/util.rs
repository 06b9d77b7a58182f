use anyhow::Result;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Shape, Tensor};
use image::DynamicImage;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::DeviceMap;

pub fn select_best_device(device_map: DeviceMap) -> Result<Device> {
    match device_map {
        DeviceMap::ForceCpu => Ok(Device::Cpu),
        DeviceMap::Ordinal(ordinal) if cuda_is_available() => Ok(Device::new_cuda(ordinal)?),
        DeviceMap::Ordinal(ordinal) if metal_is_available() => Ok(Device::new_metal(ordinal)?),
        DeviceMap::Ordinal(_) => {
            #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
            {
                tracing::warn!("Running on CPU, to run on GPU(metal), build with `--features metal`");
            }
            #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
            {
                tracing::warn!("Running on CPU, to run on GPU, build with `--features cuda`");
            }
            Ok(Device::Cpu)
        }
    }
}

/// Converts a u8 tensor with shape (3, height, width) into an RGB image.
pub fn tensor_to_image(img: &Tensor) -> Result<DynamicImage> {
    let (channels, height, width) = img.dims3()?;
    if channels != 3 {
        anyhow::bail!("tensor_to_image expects an image with 3 channels");
    }
    let img = img.permute((1, 2, 0))?.flatten_all()?;
    let pixels = img.to_vec1::<u8>()?;
    let buffer = image::ImageBuffer::from_raw(width as u32, height as u32, pixels)
        .ok_or_else(|| candle_core::Error::msg("error converting tensor to image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

/// Standard-normal f32 noise drawn from a generator seeded with `seed`.
///
/// The noise is sampled on the host and then copied to `device`, so the same
/// seed yields the same tensor on every backend and no global device RNG is touched.
pub fn seeded_noise<S: Into<Shape>>(seed: u64, shape: S, device: &Device) -> Result<Tensor> {
    let shape = shape.into();
    let mut rng = StdRng::seed_from_u64(seed);
    let data: Vec<f32> = (0..shape.elem_count())
        .map(|_| rng.sample(StandardNormal))
        .collect();
    Ok(Tensor::from_vec(data, shape, &Device::Cpu)?.to_device(device)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_noise_is_reproducible() {
        let a = seeded_noise(42, (1, 4, 8, 8), &Device::Cpu).unwrap();
        let b = seeded_noise(42, (1, 4, 8, 8), &Device::Cpu).unwrap();
        let c = seeded_noise(43, (1, 4, 8, 8), &Device::Cpu).unwrap();
        let a = a.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let b = b.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let c = c.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(a.len(), 256);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn converts_chw_tensor_to_image() {
        let data: Vec<u8> = (0..3 * 2 * 4).map(|v| v as u8).collect();
        let tensor = Tensor::from_vec(data, (3, 2, 4), &Device::Cpu).unwrap();
        let image = tensor_to_image(&tensor).unwrap();
        assert_eq!((image.width(), image.height()), (4, 2));
        let rgb = image.to_rgb8();
        // channel planes are 8 values apart
        assert_eq!(rgb.get_pixel(0, 0).0, [0, 8, 16]);
        assert_eq!(rgb.get_pixel(3, 1).0, [7, 15, 23]);
    }

    #[test]
    fn rejects_non_rgb_tensors() {
        let tensor = Tensor::zeros((1, 2, 2), candle_core::DType::U8, &Device::Cpu).unwrap();
        assert!(tensor_to_image(&tensor).is_err());
    }

    #[test]
    fn forced_cpu_selects_cpu() {
        assert!(select_best_device(DeviceMap::ForceCpu).unwrap().is_cpu());
    }
}
