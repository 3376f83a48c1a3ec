//! Implementations for the service the app needs.
//!

use crate::core::codec::{self, DecodedMessage};
use crate::core::config::{NormalizationStats, Settings};
use crate::core::decoder::InferenceWorker;
use crate::core::encoder;
use crate::core::error::RelayError;
use crate::core::metrics::RelayMetrics;
use crate::core::traits::{Reconstruction, ReconstructionService};
use crate::infrastructure::publisher::CachePublisher;
use crate::infrastructure::traits::CacheStore;
use async_trait::async_trait;
use di::{Injectable, Ref, ServiceCollection, injectable, singleton, singleton_as_self};
use log::debug;
use tokio::task;

#[injectable(ReconstructionService)]
pub struct MyReconstructionService {
    worker: Ref<InferenceWorker>,
    publisher: Ref<CachePublisher>,
    settings: Ref<Settings>,
}

#[async_trait]
impl ReconstructionService for MyReconstructionService {
    async fn reconstruct(&self, raw_message: &str) -> Result<Reconstruction, RelayError> {
        let raw_message = raw_message.to_owned();
        let latent_dim = self.settings.latent_dim;
        let device = self.worker.device().clone();
        let DecodedMessage {
            latent,
            skip,
            request,
        } = offload(move || codec::decode(&raw_message, latent_dim, &device)).await?;
        debug!(
            "Decoded latent of {} values with {} skip tensor(s) for session {}",
            latent.len(),
            skip.len(),
            request.session_id
        );

        let image = self.worker.infer(latent, skip).await?;
        let image_uri = offload(move || encoder::encode(&image)).await?;

        self.publisher
            .publish(&request.session_id, &image_uri)
            .await?;

        Ok(Reconstruction {
            session_id: request.session_id,
            image_uri,
        })
    }
}

/// Runs CPU-bound decoding and encoding off the async workers.
async fn offload<T, F>(f: F) -> Result<T, RelayError>
where
    F: FnOnce() -> Result<T, RelayError> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| RelayError::Inference(format!("blocking task failed: {e}")))?
}

/// Registers everything the relay needs, built from values prepared at startup.
pub fn relay_services<S>(
    settings: Settings,
    normalization: NormalizationStats,
    worker: InferenceWorker,
    store: Ref<S>,
) -> ServiceCollection
where
    S: CacheStore + 'static,
{
    let settings = Ref::new(settings);
    let normalization = Ref::new(normalization);
    let worker = Ref::new(worker);

    let mut services = ServiceCollection::new();
    services
        .add(singleton_as_self::<Settings>().from(move |_| settings.clone()))
        .add(singleton_as_self::<NormalizationStats>().from(move |_| normalization.clone()))
        .add(singleton_as_self::<InferenceWorker>().from(move |_| worker.clone()))
        .add(
            singleton::<dyn CacheStore, S>().from(move |_| -> Ref<dyn CacheStore> { store.clone() }),
        )
        .add(RelayMetrics::singleton())
        .add(CachePublisher::singleton())
        .add(MyReconstructionService::singleton());
    services
}
