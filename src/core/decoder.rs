//! Image decoder model and the background worker that runs it.
//!

use crate::core::codec::{LatentTensor, SkipConnections};
use crate::core::error::RelayError;
use anyhow::{Context, anyhow, bail};
use candle_core::{DType, Device, Tensor};
use log::{debug, info};
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

pub const WEIGHT_TENSOR: &str = "decoder.weight";
pub const BIAS_TENSOR: &str = "decoder.bias";

/// Channel capacity between connections and the inference worker.
pub const INFERENCE_QUEUE_SIZE: usize = 10;

/// Decoder output, channel-first with a leading batch dimension.
#[derive(Debug, Clone)]
pub struct ReconstructedImage(pub Tensor);

/// Opaque decoder network: latent plus skip connections in, image tensor out.
pub trait ImageDecoder: Send + Sync {
    fn decode(&self, latent: &Tensor, skip: &SkipConnections) -> candle_core::Result<Tensor>;
}

/// Single dense layer projecting the latent onto a `channels x size x size` image, with the skip
/// connections added as residuals before a sigmoid.
///
/// Weights are plain tensors, so nothing records a gradient graph.
pub struct LinearImageDecoder {
    /// `[latent_dim, channels * size * size]`, stored pre-transposed
    weight: Tensor,
    bias: Tensor,
    channels: usize,
    size: usize,
}

impl LinearImageDecoder {
    /// Loads `decoder.weight` / `decoder.bias` from a safetensors file.
    pub fn load(
        path: &Path,
        image_size: usize,
        latent_dim: usize,
        device: &Device,
    ) -> anyhow::Result<LinearImageDecoder> {
        info!("Loading image decoder: {}", path.display());
        let load_start = Instant::now();

        let file = File::open(path)
            .with_context(|| format!("failed to open decoder weights {}", path.display()))?;
        let mmap = unsafe { memmap2::Mmap::map(&file) }.context("failed to map decoder weights")?;
        let mut tensors = candle_core::safetensors::load_buffer(&mmap[..], device)?;

        let weight = tensors
            .remove(WEIGHT_TENSOR)
            .ok_or_else(|| anyhow!("`{WEIGHT_TENSOR}` missing from decoder weights"))?;
        let bias = tensors
            .remove(BIAS_TENSOR)
            .ok_or_else(|| anyhow!("`{BIAS_TENSOR}` missing from decoder weights"))?;

        let decoder = LinearImageDecoder::new(weight, bias, image_size, latent_dim)?;
        info!(
            "Image decoder loaded in {:.2} seconds ({} channel(s), {}x{}).",
            load_start.elapsed().as_secs_f32(),
            decoder.channels,
            decoder.size,
            decoder.size
        );
        Ok(decoder)
    }

    /// `weight` is `[channels * size * size, latent_dim]`, `bias` is `[channels * size * size]`.
    pub fn new(
        weight: Tensor,
        bias: Tensor,
        image_size: usize,
        latent_dim: usize,
    ) -> anyhow::Result<LinearImageDecoder> {
        let (outputs, inputs) = weight.dims2()?;
        if inputs != latent_dim {
            bail!("decoder expects latents of {inputs} values, configured for {latent_dim}");
        }

        let pixels = image_size * image_size;
        if outputs % pixels != 0 || !matches!(outputs / pixels, 1 | 3) {
            bail!("decoder output of {outputs} values is not a 1 or 3 channel {image_size}x{image_size} image");
        }
        if bias.dims() != [outputs] {
            bail!("decoder bias has shape {:?}, expected [{outputs}]", bias.dims());
        }

        Ok(LinearImageDecoder {
            weight: weight.to_dtype(DType::F32)?.t()?.contiguous()?,
            bias: bias.to_dtype(DType::F32)?,
            channels: outputs / pixels,
            size: image_size,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }
}

impl ImageDecoder for LinearImageDecoder {
    fn decode(&self, latent: &Tensor, skip: &SkipConnections) -> candle_core::Result<Tensor> {
        let batch = latent.dim(0)?;
        let mut image = latent
            .to_dtype(DType::F32)?
            .matmul(&self.weight)?
            .broadcast_add(&self.bias)?
            .reshape((batch, self.channels, self.size, self.size))?;

        let mut names: Vec<&String> = skip.keys().collect();
        names.sort();
        for name in names {
            image = image.broadcast_add(&skip[name].to_dtype(DType::F32)?)?;
        }

        // sigmoid
        image.neg()?.exp()?.affine(1.0, 1.0)?.recip()
    }
}

pub struct InferenceTask {
    latent: LatentTensor,
    skip: SkipConnections,
    return_channel: oneshot::Sender<Result<ReconstructedImage, RelayError>>,
}

impl InferenceTask {
    pub fn new(
        latent: LatentTensor,
        skip: SkipConnections,
    ) -> (
        InferenceTask,
        oneshot::Receiver<Result<ReconstructedImage, RelayError>>,
    ) {
        let (sender, receiver) = oneshot::channel();

        (
            InferenceTask {
                latent,
                skip,
                return_channel: sender,
            },
            receiver,
        )
    }
}

/// Handle connections use to submit work to the inference worker.
#[derive(Clone)]
pub struct InferenceWorker {
    task_sender: mpsc::Sender<InferenceTask>,
    device: Device,
}

impl InferenceWorker {
    pub fn new(task_sender: mpsc::Sender<InferenceTask>, device: Device) -> InferenceWorker {
        InferenceWorker {
            task_sender,
            device,
        }
    }

    /// Device the decoder lives on; inputs must be placed here.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Queues one inference call and waits for its result. Once queued the call runs to
    /// completion even if the caller goes away.
    pub async fn infer(
        &self,
        latent: LatentTensor,
        skip: SkipConnections,
    ) -> Result<ReconstructedImage, RelayError> {
        let (task, receiver) = InferenceTask::new(latent, skip);

        self.task_sender
            .send(task)
            .await
            .map_err(|_| RelayError::Inference("inference worker is not running".to_owned()))?;

        receiver
            .await
            .map_err(|_| RelayError::Inference("inference worker dropped the task".to_owned()))?
    }
}

/// Runs queued inference tasks one at a time until every sender is dropped.
///
/// Blocks the calling thread; run it with `spawn_blocking`.
pub fn background_task(mut task_queue: mpsc::Receiver<InferenceTask>, decoder: Box<dyn ImageDecoder>) {
    info!("Inference worker started.");

    while let Some(task) = task_queue.blocking_recv() {
        let inference_start = Instant::now();
        let result = decoder
            .decode(task.latent.as_tensor(), &task.skip)
            .map(ReconstructedImage)
            .map_err(|e| RelayError::Inference(e.to_string()));
        debug!("Inference done in {:?}", inference_start.elapsed());

        match task.return_channel.send(result) {
            Ok(_) => {}
            Err(_) => debug!("Inference result discarded, requester is gone"),
        }
    }

    info!("Inference worker stopped.");
}
