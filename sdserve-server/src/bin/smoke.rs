//! Manual smoke tests against a running server.
//!
//! ```bash
//! sdserve-smoke basic --url http://localhost:8000
//! sdserve-smoke gpu-check
//! ```

use std::{
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use sdserve_server::{
    encode::data_uri_to_png,
    handlers::{GenerationResponse, HealthResponse},
};
use serde_json::json;

#[derive(Parser, Debug)]
#[command(author, version, about = "Smoke tests for a running sdserve instance")]
struct Cli {
    /// Base URL of the server
    #[arg(long, global = true, default_value = "http://localhost:8000")]
    url: String,

    /// Per-request timeout in seconds
    #[arg(long, global = true, default_value_t = 300)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check /health, generate one image and save it
    Basic {
        #[arg(long, default_value = "a cute cat sitting on a table")]
        prompt: String,

        #[arg(long, default_value = "generated_image.png")]
        output: PathBuf,
    },
    /// Check that the server reports a GPU and time a generation
    GpuCheck,
}

struct Client {
    http: reqwest::Client,
    url: String,
}

impl Client {
    fn new(url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.trim_end_matches('/').to_string(),
        })
    }

    async fn health(&self) -> Result<HealthResponse> {
        let response = self.http.get(format!("{}/health", self.url)).send().await?;
        let status = response.status();
        if !status.is_success() {
            bail!("health check returned {status}: {}", response.text().await?);
        }
        Ok(response.json().await?)
    }

    async fn generate(&self, payload: serde_json::Value) -> Result<GenerationResponse> {
        let response = self
            .http
            .post(format!("{}/generate", self.url))
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            bail!("generate returned {status}: {}", response.text().await?);
        }
        Ok(response.json().await?)
    }
}

async fn basic(client: &Client, prompt: &str, output: &Path) -> Result<bool> {
    let health = match client.health().await {
        Ok(health) => health,
        Err(err) => {
            println!("Health check failed: {err:#}");
            println!("✗ Health check failed - make sure the API is running");
            return Ok(false);
        }
    };
    println!("Response: {}", serde_json::to_string(&health)?);
    println!("✓ Health check passed");

    println!("Generating image for: '{prompt}'");
    let payload = json!({
        "prompt": prompt,
        "steps": 15,
        "guidance_scale": 7.5,
        "width": 512,
        "height": 512,
    });
    match client.generate(payload).await {
        Ok(result) => {
            let png = data_uri_to_png(&result.image)?;
            std::fs::write(output, png)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("Image saved as '{}'", output.display());
            println!("✓ Image generation test passed");
            Ok(true)
        }
        Err(err) => {
            println!("Image generation failed: {err:#}");
            println!("✗ Image generation test failed");
            Ok(false)
        }
    }
}

async fn gpu_check(client: &Client) -> Result<bool> {
    println!("API Health Check:");
    let gpu_detected = match client.health().await {
        Ok(health) => {
            println!("  Device: {}", health.device);
            println!("  Model loaded: {}", health.model_loaded);
            println!("  Profile: {}", health.profile);
            match (&health.gpu_name, health.gpu_memory_gb) {
                (Some(name), memory) => {
                    println!("  GPU: {name}");
                    if let Some(memory) = memory {
                        println!("  VRAM: {memory} GB");
                    }
                    health.device != "cpu"
                }
                (None, _) => {
                    println!("  No GPU information found");
                    false
                }
            }
        }
        Err(err) => {
            println!("✗ Health check error: {err:#}");
            false
        }
    };

    println!("\nTesting image generation...");
    let payload = json!({
        "prompt": "a simple test image",
        "steps": 20,
        "width": 512,
        "height": 512,
    });
    let started = Instant::now();
    let generation_success = match client.generate(payload).await {
        Ok(result) => {
            let seconds = started.elapsed().as_secs_f64();
            println!("✓ Generation successful!");
            println!("  Time taken: {seconds:.1} seconds");
            println!("  Device used: {}", result.device);
            println!("  Steps: {}", result.steps);
            println!("  Dimensions: {}", result.dimensions);
            println!("  {}", performance_hint(&result.device, seconds));
            true
        }
        Err(err) => {
            println!("✗ Generation failed: {err:#}");
            false
        }
    };

    println!("\nSummary:");
    for line in summary(gpu_detected, generation_success) {
        println!("{line}");
    }
    Ok(gpu_detected && generation_success)
}

fn summary(gpu_detected: bool, generation_success: bool) -> Vec<&'static str> {
    match (gpu_detected, generation_success) {
        (true, true) => vec!["✓ GPU appears to be working correctly"],
        (false, _) => vec![
            "✗ GPU not detected - API is running in CPU mode",
            "\nSuggestions:",
            "  1. Check that the GPU is visible to the server: nvidia-smi",
            "  2. Restart the server from a build with `--features cuda`",
            "  3. Check the server logs for device selection warnings",
        ],
        (true, false) => vec![
            "! GPU detected but performance issues",
            "\nSuggestions:",
            "  1. Check GPU memory usage: nvidia-smi",
            "  2. Verify the CUDA driver and toolkit versions are compatible",
            "  3. Rebuild the server with `--features cuda`",
        ],
    }
}

fn performance_hint(device: &str, seconds: f64) -> &'static str {
    match device {
        "cpu" => "Normal CPU performance expected to be slow",
        _ if seconds > 60.0 => {
            "WARNING: GPU generation took over 1 minute - GPU may not be working properly"
        }
        _ if seconds < 30.0 => "Good GPU performance",
        _ => "GPU performance is moderate",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = Client::new(&cli.url, Duration::from_secs(cli.timeout))?;

    let passed = match &cli.command {
        Command::Basic { prompt, output } => basic(&client, prompt, output).await?,
        Command::GpuCheck => gpu_check(&client).await?,
    };
    if !passed {
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_matches_outcome() {
        assert_eq!(
            summary(true, true),
            vec!["✓ GPU appears to be working correctly"]
        );
        assert!(summary(false, true)[0].contains("CPU mode"));
        assert!(summary(false, false)[0].contains("CPU mode"));
        let slow = summary(true, false);
        assert!(slow[0].contains("performance issues"));
        assert_eq!(slow.len(), 5);
    }

    #[tokio::test]
    async fn gpu_check_survives_unreachable_server() {
        // nothing listens on port 9 (discard) in the test environment
        let client = Client::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(!gpu_check(&client).await.unwrap());
    }

    #[test]
    fn performance_hints() {
        assert!(performance_hint("cpu", 500.0).contains("CPU"));
        assert!(performance_hint("cuda", 90.0).starts_with("WARNING"));
        assert_eq!(performance_hint("cuda", 10.0), "Good GPU performance");
    }
}
