use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use hf_hub::api::tokio::Api;
use sdserve_core::{load_model, select_best_device, DeviceReport};
use sdserve_server::{config::Args, AppState};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sdserve=info,sdserve_server=info,sdserve_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    std::env::set_var("TOKENIZERS_PARALLELISM", "false");

    let device = select_best_device(args.device).context("failed to set up device")?;
    let report = DeviceReport::probe(&device, args.ordinal());
    let profile = args.profile.resolve(&report);
    let settings = args.settings(profile);
    tracing::info!(
        device = %report.kind,
        gpu = report.gpu_name.as_deref().unwrap_or("-"),
        memory_gb = report.gpu_memory_gb.unwrap_or_default(),
        %profile,
        "device selected"
    );

    let state = Arc::new(AppState::new(args.model.clone(), report, settings));

    // --- Start serving right away; /generate answers "Model not loaded" until the load completes ---
    let listener = TcpListener::bind(args.addr())
        .await
        .with_context(|| format!("failed to bind {}", args.addr()))?;
    let server = tokio::spawn(sdserve_server::serve(listener, state.clone()));

    let pipeline = match load_model(&args.model, Api::new()?, device, settings).await {
        Ok(pipeline) => pipeline,
        Err(err) => {
            tracing::error!("Error loading model: {err:#}");
            return Err(err);
        }
    };
    state.install(pipeline)?;
    tracing::info!("Model loaded successfully");

    server.await??;
    Ok(())
}
