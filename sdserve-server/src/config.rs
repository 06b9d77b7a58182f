use clap::Parser;
use sdserve_core::{DeviceMap, DeviceProfile, ProfileChoice, ProfileSettings, DEFAULT_MODEL_ID};

// Define command line arguments
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Stable Diffusion image generation server")]
pub struct Args {
    /// Hugging Face model identifier
    #[arg(long, env = "SDSERVE_MODEL", default_value = DEFAULT_MODEL_ID)]
    pub model: String,

    /// Device to run on: `cpu`, a GPU ordinal, or `cuda:N` / `metal:N`
    #[arg(long, env = "SDSERVE_DEVICE", default_value = "0")]
    pub device: DeviceMap,

    /// Hardware profile: auto, cpu, gpu or constrained-gpu
    #[arg(long, env = "SDSERVE_PROFILE", default_value = "auto")]
    pub profile: ProfileChoice,

    /// Use this seed for every request, ignoring request seeds
    #[arg(long, env = "SDSERVE_FIXED_SEED")]
    pub fixed_seed: Option<u64>,

    /// Never try flash attention kernels
    #[arg(long, env = "SDSERVE_NO_FLASH_ATTN")]
    pub no_flash_attn: bool,

    /// Host address to bind the server to
    #[arg(long, env = "SDSERVE_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the server to
    #[arg(long, env = "SDSERVE_PORT", default_value_t = 8000)]
    pub port: u16,
}

impl Args {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ordinal(&self) -> usize {
        match self.device {
            DeviceMap::ForceCpu => 0,
            DeviceMap::Ordinal(ordinal) => ordinal,
        }
    }

    /// Profile table row with the command-line overrides applied.
    pub fn settings(&self, profile: DeviceProfile) -> ProfileSettings {
        let settings = profile.settings().with_fixed_seed(self.fixed_seed);
        if self.no_flash_attn {
            settings.without_flash_attention()
        } else {
            settings
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::try_parse_from(["sdserve"]).unwrap();
        assert_eq!(args.model, DEFAULT_MODEL_ID);
        assert_eq!(args.device, DeviceMap::Ordinal(0));
        assert_eq!(args.profile, ProfileChoice::Auto);
        assert_eq!(args.addr(), "0.0.0.0:8000");
        assert_eq!(args.fixed_seed, None);
    }

    #[test]
    fn overrides() {
        let args = Args::try_parse_from([
            "sdserve",
            "--device",
            "cpu",
            "--profile",
            "constrained-gpu",
            "--fixed-seed",
            "42",
            "--no-flash-attn",
            "--port",
            "8080",
        ])
        .unwrap();
        assert_eq!(args.device, DeviceMap::ForceCpu);
        assert_eq!(args.profile, ProfileChoice::ConstrainedGpu);
        assert_eq!(args.addr(), "0.0.0.0:8080");

        let settings = args.settings(DeviceProfile::ConstrainedGpu);
        assert_eq!(settings.fixed_seed, Some(42));
        assert!(!settings.memory.flash_attention);
        assert!(settings.memory.clear_cache);
    }

    #[test]
    fn rejects_unknown_profile() {
        assert!(Args::try_parse_from(["sdserve", "--profile", "tiny"]).is_err());
    }
}
