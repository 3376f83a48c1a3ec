//! Relay from streamed waveform latents to reconstructed images
//!

use waveform_latent_relay::api;
use waveform_latent_relay::core::config::{NormalizationStats, Settings};
use waveform_latent_relay::core::decoder::{
    self, INFERENCE_QUEUE_SIZE, InferenceWorker, LinearImageDecoder,
};
use waveform_latent_relay::core::services::relay_services;
use waveform_latent_relay::infrastructure::cache::RedisCache;

use anyhow::Context;
use di::Ref;
use di_axum::RouterServiceProviderExtensions;
use log::info;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;

fn main() -> anyhow::Result<()> {
    // initialize tracing
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env()?;
    info!(
        "Relaying latents of {} values to {}x{} images, cache at {}:{}",
        settings.latent_dim,
        settings.image_size,
        settings.image_size,
        settings.redis_host,
        settings.redis_port
    );

    let normalization = NormalizationStats::load(&settings.normalization_config)?;
    info!(
        "Loaded normalization stats for {} electrode(s).",
        normalization.channels()
    );

    let device = settings
        .device
        .resolve()
        .context("failed to open compute device")?;
    info!("Compute device: {:?}", device);

    let image_decoder = LinearImageDecoder::load(
        &settings.image_decoder_path,
        settings.image_size,
        settings.latent_dim,
        &device,
    )?;

    let runtime: Runtime = Builder::new_multi_thread().enable_all().build()?;

    // background task for the image decoder
    let (task_sender, task_receiver) = mpsc::channel(INFERENCE_QUEUE_SIZE);
    let inference_join_handle = runtime
        .spawn_blocking(move || decoder::background_task(task_receiver, Box::new(image_decoder)));
    let worker = InferenceWorker::new(task_sender, device);

    let store = Ref::new(RedisCache::from_settings(&settings)?);
    let web_task_handle = runtime.spawn(web_server_task(settings, normalization, worker, store));

    runtime.block_on(async {
        web_task_handle
            .await
            .context("failed to join web_task_handle")??;
        inference_join_handle
            .await
            .context("failed to join inference_join_handle")?;
        Ok::<(), anyhow::Error>(())
    })
}

async fn web_server_task(
    settings: Settings,
    normalization: NormalizationStats,
    worker: InferenceWorker,
    store: Ref<RedisCache>,
) -> anyhow::Result<()> {
    let listen_address = settings.listen_address();
    let provider = relay_services(settings, normalization, worker, store)
        .build_provider()
        .map_err(|e| anyhow::anyhow!("invalid service registrations: {e:?}"))?;

    let app = api::router()
        .layer(api::cors_layer())
        .with_provider(provider);

    let listener = tokio::net::TcpListener::bind(&listen_address).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    info!("Shutting down...");
    Ok(())
}
