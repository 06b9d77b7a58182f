use candle_core::Device;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Cpu,
    Cuda,
    Metal,
}

serde_plain::derive_display_from_serialize!(DeviceKind);

impl DeviceKind {
    pub fn of(device: &Device) -> Self {
        match device {
            Device::Cpu => Self::Cpu,
            Device::Cuda(_) => Self::Cuda,
            Device::Metal(_) => Self::Metal,
        }
    }
}

/// What the health endpoint says about the hardware.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DeviceReport {
    pub kind: DeviceKind,
    pub gpu_name: Option<String>,
    pub gpu_memory_gb: Option<f64>,
}

impl DeviceReport {
    pub fn cpu() -> Self {
        Self {
            kind: DeviceKind::Cpu,
            gpu_name: None,
            gpu_memory_gb: None,
        }
    }

    /// Inspects `device`. GPU name and memory are best effort; a failed query
    /// leaves them empty.
    pub fn probe(device: &Device, ordinal: usize) -> Self {
        let kind = DeviceKind::of(device);
        let (gpu_name, gpu_memory_gb) = match kind {
            DeviceKind::Cpu => (None, None),
            DeviceKind::Cuda => match cuda_properties(ordinal) {
                Ok((name, bytes)) => (Some(name), Some(bytes_to_gb(bytes))),
                Err(err) => {
                    tracing::warn!(ordinal, "could not query CUDA device properties: {err:#}");
                    (None, None)
                }
            },
            DeviceKind::Metal => (Some("Apple Metal".to_string()), None),
        };
        Self {
            kind,
            gpu_name,
            gpu_memory_gb,
        }
    }

    pub fn is_gtx_1060(&self) -> bool {
        self.gpu_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains("1060"))
    }
}

/// Bytes to GiB, rounded to one decimal.
pub fn bytes_to_gb(bytes: usize) -> f64 {
    let gb = bytes as f64 / (1u64 << 30) as f64;
    (gb * 10.0).round() / 10.0
}

#[cfg(feature = "cuda")]
fn cuda_properties(ordinal: usize) -> anyhow::Result<(String, usize)> {
    use candle_core::cuda_backend::cudarc::driver::result;

    result::init()?;
    let dev = result::device::get(ordinal as i32)?;
    let name = result::device::get_name(dev)?;
    let total = unsafe { result::device::total_mem(dev)? };
    Ok((name, total))
}

#[cfg(not(feature = "cuda"))]
fn cuda_properties(_ordinal: usize) -> anyhow::Result<(String, usize)> {
    anyhow::bail!("built without the `cuda` feature")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_memory_to_one_decimal() {
        assert_eq!(bytes_to_gb(6 * (1 << 30)), 6.0);
        assert_eq!(bytes_to_gb(6_000_000_000), 5.6);
        assert_eq!(bytes_to_gb(0), 0.0);
    }

    #[test]
    fn cpu_probe_has_no_gpu_fields() {
        let report = DeviceReport::probe(&Device::Cpu, 0);
        assert_eq!(report, DeviceReport::cpu());
        assert_eq!(report.kind.to_string(), "cpu");
    }

    #[test]
    fn recognises_gtx_1060() {
        let report = DeviceReport {
            kind: DeviceKind::Cuda,
            gpu_name: Some("NVIDIA GeForce GTX 1060 6GB".to_string()),
            gpu_memory_gb: Some(5.9),
        };
        assert!(report.is_gtx_1060());
        assert!(!DeviceReport::cpu().is_gtx_1060());
    }
}
