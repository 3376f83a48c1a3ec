//! Process-wide settings, loaded once at startup.

use candle_core::Device;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";
pub const DEFAULT_ROOT_PATH: &str = "/relay-waveform-latent-to-image-reconstruction-api";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("`{0}` must be set")]
    Missing(&'static str),

    #[error("`{var}` is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("cannot load normalization stats from {path}: {reason}")]
    Normalization { path: PathBuf, reason: String },
}

/// Which compute device tensors are placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    /// CUDA device 0 when available, CPU otherwise
    Auto,
    Cpu,
    Cuda(usize),
    Metal,
}

impl DeviceSelector {
    pub fn resolve(&self) -> candle_core::Result<Device> {
        match self {
            DeviceSelector::Auto => Device::cuda_if_available(0),
            DeviceSelector::Cpu => Ok(Device::Cpu),
            DeviceSelector::Cuda(ordinal) => Device::new_cuda(*ordinal),
            DeviceSelector::Metal => Device::new_metal(0),
        }
    }
}

impl FromStr for DeviceSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(DeviceSelector::Auto),
            "cpu" => Ok(DeviceSelector::Cpu),
            "cuda" => Ok(DeviceSelector::Cuda(0)),
            "metal" | "mps" => Ok(DeviceSelector::Metal),
            other => match other.strip_prefix("cuda:") {
                Some(ordinal) => ordinal
                    .parse()
                    .map(DeviceSelector::Cuda)
                    .map_err(|_| format!("bad cuda ordinal `{ordinal}`")),
                None => Err(format!("unknown device `{other}`")),
            },
        }
    }
}

/// Immutable configuration shared by every connection.
#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_password: String,
    /// Suffix of the single cache key every reconstruction is written to
    pub cache_key: String,
    pub device: DeviceSelector,
    pub image_decoder_path: PathBuf,
    pub image_size: usize,
    pub latent_dim: usize,
    pub normalization_config: PathBuf,
    pub bind_address: String,
    pub port: u16,
    /// Prefix the service is mounted under behind the proxy
    pub root_path: String,
}

impl Settings {
    /// Reads settings from the environment, honouring a `.env` file if present.
    pub fn from_env() -> Result<Settings, ConfigError> {
        dotenvy::dotenv().ok();
        Settings::from_lookup(|key| env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Settings, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |var: &'static str| -> Result<String, ConfigError> {
            lookup(var)
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::Missing(var))
        };

        let image_size: usize = parse(&required("RESIZED_IMAGE_SIZE")?, "RESIZED_IMAGE_SIZE")?;
        let latent_dim: usize = parse(&required("LATENT_DIM")?, "LATENT_DIM")?;
        for (var, value) in [("RESIZED_IMAGE_SIZE", image_size), ("LATENT_DIM", latent_dim)] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    var,
                    reason: "must be greater than zero".to_owned(),
                });
            }
        }

        Ok(Settings {
            redis_host: required("REDIS_HOST")?,
            redis_port: parse(&required("REDIS_PORT")?, "REDIS_PORT")?,
            // empty for a passwordless server
            redis_password: lookup("REDIS_PASSWORD")
                .ok_or(ConfigError::Missing("REDIS_PASSWORD"))?,
            cache_key: required("THOUGHT_TO_IMAGE_REDIS_KEY")?,
            device: match lookup("DEVICE") {
                Some(device) => parse(&device, "DEVICE")?,
                None => DeviceSelector::Auto,
            },
            image_decoder_path: required("IMAGE_DECODER_PATH")?.into(),
            image_size,
            latent_dim,
            normalization_config: required("NORMALIZATION_CONFIG")?.into(),
            bind_address: lookup("BIND_ADDRESS").unwrap_or(DEFAULT_BIND_ADDRESS.to_owned()),
            port: match lookup("PORT") {
                Some(port) => parse(&port, "PORT")?,
                None => DEFAULT_PORT,
            },
            root_path: lookup("ROOT_PATH").unwrap_or(DEFAULT_ROOT_PATH.to_owned()),
        })
    }

    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

fn parse<T>(value: &str, var: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var,
        reason: e.to_string(),
    })
}

#[derive(Deserialize)]
struct ElectrodeStats {
    mean: f32,
    std: f32,
}

/// Per-electrode standardization statistics.
///
/// Loaded and validated at startup and carried alongside the model. The relay does not apply
/// them to the latent before inference.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizationStats {
    pub means: Vec<f32>,
    pub stds: Vec<f32>,
}

impl NormalizationStats {
    pub fn load(path: &Path) -> Result<NormalizationStats, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Normalization {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        NormalizationStats::from_json(&content).map_err(|reason| ConfigError::Normalization {
            path: path.to_owned(),
            reason,
        })
    }

    /// Parses `{"0": {"mean": .., "std": ..}, "1": ...}`; indices must run from 0 without gaps.
    pub fn from_json(content: &str) -> Result<NormalizationStats, String> {
        let electrodes: HashMap<String, ElectrodeStats> =
            serde_json::from_str(content).map_err(|e| e.to_string())?;

        let mut means = Vec::with_capacity(electrodes.len());
        let mut stds = Vec::with_capacity(electrodes.len());
        for i in 0..electrodes.len() {
            let stats = electrodes
                .get(&i.to_string())
                .ok_or_else(|| format!("missing electrode {i}"))?;
            means.push(stats.mean);
            stds.push(stats.std);
        }

        Ok(NormalizationStats { means, stds })
    }

    pub fn channels(&self) -> usize {
        self.means.len()
    }
}
