//! Relay from streamed waveform latents to reconstructed images - Library exports for testing
//!

pub mod api;
pub mod core;
pub mod infrastructure;
