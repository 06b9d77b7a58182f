//! Optional speed and memory optimizations.
//!
//! Each optimization is attempted on its own. A failed attempt is logged and
//! loading continues without it; errors from anything else are not swallowed.

use std::fmt;

use anyhow::Result;
use candle_core::Device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optimization {
    AttentionSlicing,
    FlashAttention,
    TextEncoderOffload,
}

impl fmt::Display for Optimization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AttentionSlicing => "attention slicing",
            Self::FlashAttention => "flash attention",
            Self::TextEncoderOffload => "text encoder offload",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Enabled,
    Skipped(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedOptimizations(Vec<(Optimization, Outcome)>);

impl AppliedOptimizations {
    /// Runs `op`. On error the optimization is recorded as skipped and `None` is returned.
    pub fn attempt<T>(
        &mut self,
        optimization: Optimization,
        op: impl FnOnce() -> Result<T>,
    ) -> Option<T> {
        match op() {
            Ok(value) => {
                tracing::info!("{optimization} enabled");
                self.0.push((optimization, Outcome::Enabled));
                Some(value)
            }
            Err(err) => {
                tracing::info!("{optimization} not available: {err:#}");
                self.0.push((optimization, Outcome::Skipped(format!("{err:#}"))));
                None
            }
        }
    }

    pub fn record(&mut self, optimization: Optimization) {
        tracing::info!("{optimization} enabled");
        self.0.push((optimization, Outcome::Enabled));
    }

    pub fn is_enabled(&self, optimization: Optimization) -> bool {
        self.0
            .iter()
            .any(|(o, outcome)| *o == optimization && *outcome == Outcome::Enabled)
    }

    pub fn enabled(&self) -> impl Iterator<Item = Optimization> + '_ {
        self.0
            .iter()
            .filter(|(_, outcome)| *outcome == Outcome::Enabled)
            .map(|(o, _)| *o)
    }
}

/// Flash attention needs the `flash-attn` build feature and a CUDA device.
pub fn flash_attention_support(device: &Device) -> Result<()> {
    if !cfg!(feature = "flash-attn") {
        anyhow::bail!("built without the `flash-attn` feature");
    }
    if !device.is_cuda() {
        anyhow::bail!("flash attention kernels need a CUDA device");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_attempts_are_recorded_and_skipped() {
        let mut applied = AppliedOptimizations::default();
        let value = applied.attempt(Optimization::FlashAttention, || -> Result<u32> {
            anyhow::bail!("no kernels")
        });
        assert_eq!(value, None);
        assert!(!applied.is_enabled(Optimization::FlashAttention));

        let value = applied.attempt(Optimization::TextEncoderOffload, || Ok(7));
        assert_eq!(value, Some(7));
        assert!(applied.is_enabled(Optimization::TextEncoderOffload));

        applied.record(Optimization::AttentionSlicing);
        let enabled: Vec<_> = applied.enabled().collect();
        assert_eq!(
            enabled,
            vec![Optimization::TextEncoderOffload, Optimization::AttentionSlicing]
        );
    }

    #[test]
    fn flash_attention_is_unavailable_on_cpu() {
        assert!(flash_attention_support(&Device::Cpu).is_err());
    }
}
