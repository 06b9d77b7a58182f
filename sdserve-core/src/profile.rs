//! Device profiles.
//!
//! Every hardware-dependent knob of the service (precision, image size cap,
//! default step count, memory strategies) lives in one table keyed by
//! [`DeviceProfile`]. The profile is picked once when the server starts.

use candle_core::DType;
use serde::{Deserialize, Serialize};

use crate::{DeviceKind, DeviceReport};

/// GPUs with at most this much memory get the constrained profile.
pub const CONSTRAINED_GPU_MEMORY_GB: f64 = 8.0;

pub const DEFAULT_DIMENSION: usize = 512;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceProfile {
    Cpu,
    Gpu,
    ConstrainedGpu,
}

serde_plain::derive_display_from_serialize!(DeviceProfile);
serde_plain::derive_fromstr_from_deserialize!(DeviceProfile);

/// Profile requested on the command line; `Auto` defers to [`DeviceProfile::detect`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileChoice {
    #[default]
    Auto,
    Cpu,
    Gpu,
    ConstrainedGpu,
}

serde_plain::derive_display_from_serialize!(ProfileChoice);
serde_plain::derive_fromstr_from_deserialize!(ProfileChoice);

/// Memory-saving strategies applied while loading and around inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryFlags {
    /// Slice size handed to the UNet's attention blocks.
    pub attention_slice_size: Option<usize>,
    /// Try to keep the text encoder on the CPU.
    pub offload_text_encoder: bool,
    /// Try flash-attention kernels for the UNet.
    pub flash_attention: bool,
    /// Release cached device memory around every generation.
    pub clear_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileSettings {
    pub profile: DeviceProfile,
    pub precision: DType,
    pub max_dimension: usize,
    pub default_steps: usize,
    /// Upper bound on requested steps; never above the scheduler's training timesteps.
    pub max_steps: usize,
    pub default_dimension: usize,
    pub default_guidance_scale: f64,
    /// When set, every request uses this seed regardless of what it asks for.
    pub fixed_seed: Option<u64>,
    pub memory: MemoryFlags,
}

impl DeviceProfile {
    pub fn settings(self) -> ProfileSettings {
        let (precision, max_dimension, default_steps, max_steps, memory) = match self {
            Self::Cpu => (
                DType::F32,
                512,
                20,
                150,
                MemoryFlags {
                    attention_slice_size: Some(4),
                    offload_text_encoder: false,
                    flash_attention: false,
                    clear_cache: false,
                },
            ),
            Self::Gpu => (
                DType::F16,
                768,
                30,
                250,
                MemoryFlags {
                    attention_slice_size: Some(4),
                    offload_text_encoder: true,
                    flash_attention: true,
                    clear_cache: false,
                },
            ),
            Self::ConstrainedGpu => (
                DType::F16,
                512,
                25,
                150,
                MemoryFlags {
                    attention_slice_size: Some(4),
                    offload_text_encoder: true,
                    flash_attention: true,
                    clear_cache: true,
                },
            ),
        };
        ProfileSettings {
            profile: self,
            precision,
            max_dimension,
            default_steps,
            max_steps,
            default_dimension: DEFAULT_DIMENSION,
            default_guidance_scale: DEFAULT_GUIDANCE_SCALE,
            fixed_seed: None,
            memory,
        }
    }

    /// Picks a profile from what the device probe found.
    pub fn detect(report: &DeviceReport) -> Self {
        match report.kind {
            DeviceKind::Cpu => Self::Cpu,
            DeviceKind::Cuda | DeviceKind::Metal => {
                let small = report
                    .gpu_memory_gb
                    .is_some_and(|gb| gb <= CONSTRAINED_GPU_MEMORY_GB);
                if small || report.is_gtx_1060() {
                    Self::ConstrainedGpu
                } else {
                    Self::Gpu
                }
            }
        }
    }

    pub fn is_gpu(self) -> bool {
        !matches!(self, Self::Cpu)
    }
}

impl ProfileChoice {
    /// Resolves the choice against the probed device. An explicit GPU profile on a
    /// CPU-only host is downgraded, since f16 and GPU memory strategies do not apply.
    pub fn resolve(self, report: &DeviceReport) -> DeviceProfile {
        let requested = match self {
            Self::Auto => return DeviceProfile::detect(report),
            Self::Cpu => DeviceProfile::Cpu,
            Self::Gpu => DeviceProfile::Gpu,
            Self::ConstrainedGpu => DeviceProfile::ConstrainedGpu,
        };
        if requested.is_gpu() && report.kind == DeviceKind::Cpu {
            tracing::warn!(%requested, "GPU profile requested but no GPU is in use, using cpu profile");
            DeviceProfile::Cpu
        } else {
            requested
        }
    }
}

impl ProfileSettings {
    pub fn with_fixed_seed(mut self, seed: Option<u64>) -> Self {
        self.fixed_seed = seed;
        self
    }

    pub fn without_flash_attention(mut self) -> Self {
        self.memory.flash_attention = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gpu(name: &str, memory: f64) -> DeviceReport {
        DeviceReport {
            kind: DeviceKind::Cuda,
            gpu_name: Some(name.to_string()),
            gpu_memory_gb: Some(memory),
        }
    }

    #[test]
    fn table_rows() {
        let cpu = DeviceProfile::Cpu.settings();
        assert_eq!(cpu.precision, DType::F32);
        assert_eq!(cpu.max_dimension, 512);
        assert_eq!(cpu.default_steps, 20);
        assert!(!cpu.memory.clear_cache);

        let gpu = DeviceProfile::Gpu.settings();
        assert_eq!(gpu.precision, DType::F16);
        assert_eq!(gpu.max_dimension, 768);
        assert_eq!(gpu.default_steps, 30);

        let small = DeviceProfile::ConstrainedGpu.settings();
        assert_eq!(small.max_dimension, 512);
        assert_eq!(small.default_steps, 25);
        assert!(small.memory.clear_cache);

        assert_eq!(cpu.max_steps, 150);
        assert_eq!(gpu.max_steps, 250);
        assert_eq!(small.max_steps, 150);

        for settings in [cpu, gpu, small] {
            assert!(settings.max_steps <= 1000);
            assert!(settings.memory.attention_slice_size.is_some());
            assert_eq!(settings.default_dimension, 512);
            assert_eq!(settings.default_guidance_scale, 7.5);
            assert_eq!(settings.fixed_seed, None);
        }
    }

    #[test]
    fn detects_profiles() {
        assert_eq!(DeviceProfile::detect(&DeviceReport::cpu()), DeviceProfile::Cpu);
        assert_eq!(
            DeviceProfile::detect(&gpu("NVIDIA GeForce RTX 4090", 24.0)),
            DeviceProfile::Gpu
        );
        assert_eq!(
            DeviceProfile::detect(&gpu("NVIDIA GeForce GTX 1060 6GB", 6.0)),
            DeviceProfile::ConstrainedGpu
        );
        assert_eq!(
            DeviceProfile::detect(&gpu("NVIDIA GeForce RTX 3070", 8.0)),
            DeviceProfile::ConstrainedGpu
        );
        let unknown_memory = DeviceReport {
            kind: DeviceKind::Metal,
            gpu_name: None,
            gpu_memory_gb: None,
        };
        assert_eq!(DeviceProfile::detect(&unknown_memory), DeviceProfile::Gpu);
    }

    #[test]
    fn explicit_gpu_profile_on_cpu_falls_back() {
        let report = DeviceReport::cpu();
        assert_eq!(ProfileChoice::Gpu.resolve(&report), DeviceProfile::Cpu);
        assert_eq!(
            ProfileChoice::ConstrainedGpu.resolve(&gpu("RTX 4090", 24.0)),
            DeviceProfile::ConstrainedGpu
        );
    }

    #[test]
    fn profile_names() {
        assert_eq!(DeviceProfile::ConstrainedGpu.to_string(), "constrained-gpu");
        assert_eq!("gpu".parse::<DeviceProfile>().unwrap(), DeviceProfile::Gpu);
        assert_eq!("auto".parse::<ProfileChoice>().unwrap(), ProfileChoice::Auto);
        assert!("huge".parse::<ProfileChoice>().is_err());
    }
}
