use std::{fmt, str::FromStr};

use anyhow::{anyhow, Context};

/// Which compute device the pipeline should be placed on.
///
/// `Ordinal` asks for the GPU with that index and falls back to the CPU when
/// no accelerator backend is compiled in or available.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceMap {
    ForceCpu,
    Ordinal(usize),
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self::Ordinal(0)
    }
}

impl FromStr for DeviceMap {
    type Err = anyhow::Error;

    /// Accepts `cpu`, a bare ordinal (`1`) or a prefixed one (`cuda:1`, `gpu:0`, `metal:0`).
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let s = s.trim().to_lowercase();
        if s == "cpu" {
            return Ok(Self::ForceCpu);
        }
        let ordinal = match s.split_once(':') {
            Some(("cuda" | "gpu" | "metal", ordinal)) => ordinal,
            Some((kind, _)) => return Err(anyhow!("unknown device kind '{kind}'")),
            None if s == "cuda" || s == "gpu" || s == "metal" => "0",
            None => s.as_str(),
        };
        let ordinal = ordinal
            .parse::<usize>()
            .with_context(|| format!("invalid device ordinal '{ordinal}'"))?;
        Ok(Self::Ordinal(ordinal))
    }
}

impl fmt::Display for DeviceMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForceCpu => write!(f, "cpu"),
            Self::Ordinal(ordinal) => write!(f, "gpu:{ordinal}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_device_strings() {
        assert_eq!("cpu".parse::<DeviceMap>().unwrap(), DeviceMap::ForceCpu);
        assert_eq!("CPU".parse::<DeviceMap>().unwrap(), DeviceMap::ForceCpu);
        assert_eq!("1".parse::<DeviceMap>().unwrap(), DeviceMap::Ordinal(1));
        assert_eq!("cuda:2".parse::<DeviceMap>().unwrap(), DeviceMap::Ordinal(2));
        assert_eq!("gpu".parse::<DeviceMap>().unwrap(), DeviceMap::Ordinal(0));
    }

    #[test]
    fn rejects_unknown_devices() {
        assert!("tpu:0".parse::<DeviceMap>().is_err());
        assert!("cuda:x".parse::<DeviceMap>().is_err());
        assert!("".parse::<DeviceMap>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for map in [DeviceMap::ForceCpu, DeviceMap::Ordinal(3)] {
            assert_eq!(map.to_string().parse::<DeviceMap>().unwrap(), map);
        }
    }
}
