//! Prometheus counters for the relay

use di::inject;
use di::injectable;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

pub struct RelayMetrics {
    registry: Registry,
    pub health_requests: IntCounter,
    pub visual_thoughts_rendered: IntCounter,
    pub websocket_errors: IntCounter,
    /// Wall time of one message, parse through cache write
    pub reconstruction_duration: Histogram,
}

#[injectable]
impl RelayMetrics {
    #[inject]
    pub fn create() -> RelayMetrics {
        RelayMetrics::new().expect("relay metrics should register on a fresh registry")
    }
}

impl RelayMetrics {
    pub fn new() -> prometheus::Result<RelayMetrics> {
        let registry = Registry::new();

        let health_requests =
            IntCounter::new("health_requests_total", "Health check requests served")?;
        let visual_thoughts_rendered = IntCounter::new(
            "visual_thoughts_rendered_total",
            "Reconstructed images published to the cache",
        )?;
        let websocket_errors = IntCounter::new(
            "websocket_errors_total",
            "Connections closed because of an error",
        )?;
        let reconstruction_duration = Histogram::with_opts(HistogramOpts::new(
            "reconstruction_duration_seconds",
            "Time to decode, infer, encode and publish one message",
        ))?;

        registry.register(Box::new(health_requests.clone()))?;
        registry.register(Box::new(visual_thoughts_rendered.clone()))?;
        registry.register(Box::new(websocket_errors.clone()))?;
        registry.register(Box::new(reconstruction_duration.clone()))?;

        Ok(RelayMetrics {
            registry,
            health_requests,
            visual_thoughts_rendered,
            websocket_errors,
            reconstruction_duration,
        })
    }

    /// Text exposition of every metric.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
