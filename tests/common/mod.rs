//! Shared fixtures: a tiny decoder, matching skip connections and a wired service provider.

#![allow(dead_code)]

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use candle_core::{DType, Device, Tensor};
use di::{Ref, ServiceProvider};
use serde_json::json;
use std::collections::HashMap;
use tokio::sync::mpsc;
use waveform_latent_relay::core::config::{DeviceSelector, NormalizationStats, Settings};
use waveform_latent_relay::core::decoder::{
    INFERENCE_QUEUE_SIZE, InferenceWorker, LinearImageDecoder, background_task,
};
use waveform_latent_relay::core::services::relay_services;
use waveform_latent_relay::infrastructure::traits::CacheStore;

pub const LATENT_DIM: usize = 8;
pub const IMAGE_SIZE: usize = 4;
pub const CACHE_KEY: &str = "reconstructed:latest";

pub fn settings() -> Settings {
    Settings {
        redis_host: "localhost".to_owned(),
        redis_port: 6379,
        redis_password: "secret".to_owned(),
        cache_key: "latest".to_owned(),
        device: DeviceSelector::Cpu,
        image_decoder_path: "decoder.safetensors".into(),
        image_size: IMAGE_SIZE,
        latent_dim: LATENT_DIM,
        normalization_config: "normalization.json".into(),
        bind_address: "127.0.0.1".to_owned(),
        port: 8000,
        root_path: "/relay-waveform-latent-to-image-reconstruction-api".to_owned(),
    }
}

pub fn normalization() -> NormalizationStats {
    NormalizationStats {
        means: vec![0.0; 4],
        stds: vec![1.0; 4],
    }
}

/// RGB decoder with fixed, non-trivial weights.
pub fn decoder() -> LinearImageDecoder {
    let outputs = 3 * IMAGE_SIZE * IMAGE_SIZE;
    let weight = Tensor::arange(0f32, (outputs * LATENT_DIM) as f32, &Device::Cpu)
        .unwrap()
        .affine(0.001, -0.2)
        .unwrap()
        .reshape((outputs, LATENT_DIM))
        .unwrap();
    let bias = Tensor::zeros(outputs, DType::F32, &Device::Cpu).unwrap();
    LinearImageDecoder::new(weight, bias, IMAGE_SIZE, LATENT_DIM).unwrap()
}

/// Starts the blocking inference worker; it stops once the returned handle is dropped.
pub fn spawn_worker() -> InferenceWorker {
    let (task_sender, task_receiver) = mpsc::channel(INFERENCE_QUEUE_SIZE);
    tokio::task::spawn_blocking(move || background_task(task_receiver, Box::new(decoder())));
    InferenceWorker::new(task_sender, Device::Cpu)
}

pub fn provider<S: CacheStore + 'static>(store: Ref<S>) -> ServiceProvider {
    relay_services(settings(), normalization(), spawn_worker(), store)
        .build_provider()
        .unwrap()
}

/// base64 safetensors archive with one skip tensor shaped like the decoder output.
pub fn encoded_skip() -> String {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("skip.safetensors");
    let tensors = HashMap::from([(
        "enc1".to_string(),
        Tensor::full(0.1f32, (1, 3, IMAGE_SIZE, IMAGE_SIZE), &Device::Cpu).unwrap(),
    )]);
    candle_core::safetensors::save(&tensors, &path).unwrap();
    STANDARD.encode(std::fs::read(&path).unwrap())
}

pub fn latent_message(session_id: &str, payload_len: usize) -> String {
    json!({
        "type": "waveform_latent",
        "session_id": session_id,
        "payload": vec![0.1f32; payload_len],
        "skip_connections": encoded_skip(),
    })
    .to_string()
}
