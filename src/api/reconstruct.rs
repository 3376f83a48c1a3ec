//! Reconstruction endpoints: the latent WebSocket and its schema document.

use crate::api::reconstruct::schemas::{Ack, WsInfo};
use crate::core::config::{NormalizationStats, Settings};
use crate::core::error::RelayError;
use crate::core::metrics::RelayMetrics;
use crate::core::traits::ReconstructionService;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info};
use std::fmt::Display;
use std::time::Instant;
use uuid::Uuid;

pub const WS_PATH: &str = "/ws/reconstruct-image-from-waveform-latent";

pub fn router() -> Router {
    Router::new()
        .route(WS_PATH, get(reconstruct_ws))
        .route("/ws-info", get(ws_info))
}

async fn reconstruct_ws(
    ws: WebSocketUpgrade,
    Inject(service): Inject<dyn ReconstructionService>,
    Inject(metrics): Inject<RelayMetrics>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let connection_id = Uuid::new_v4();
        info!("WebSocket {connection_id} accepted.");

        let (outbound, inbound) = socket.split();
        run_connection(connection_id, inbound, outbound, &*service, &metrics).await;
    })
}

async fn ws_info(
    Inject(settings): Inject<Settings>,
    Inject(normalization): Inject<NormalizationStats>,
) -> Json<WsInfo> {
    Json(WsInfo::new(&settings, &normalization))
}

/// Relays messages until the peer leaves or a message fails, and returns why the connection
/// ended.
///
/// Messages are handled strictly one after another. Any failure other than a disconnect is
/// logged, counted in `websocket_errors_total` and ends the connection; the peer gets no error
/// payload.
pub async fn run_connection<R, W>(
    connection_id: Uuid,
    mut inbound: R,
    mut outbound: W,
    service: &dyn ReconstructionService,
    metrics: &RelayMetrics,
) -> RelayError
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let reason = loop {
        if let Err(e) = relay_next(&mut inbound, &mut outbound, service, metrics).await {
            break e;
        }
    };

    if reason.is_disconnect() {
        info!("WebSocket {connection_id} disconnected.");
    } else {
        error!("WebSocket {connection_id} error in image reconstruction: {reason}");
        metrics.websocket_errors.inc();
    }
    reason
}

async fn relay_next<R, W>(
    inbound: &mut R,
    outbound: &mut W,
    service: &dyn ReconstructionService,
    metrics: &RelayMetrics,
) -> Result<(), RelayError>
where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let text = match inbound.next().await {
        Some(Ok(Message::Text(text))) => text,
        Some(Ok(Message::Ping(_) | Message::Pong(_))) => return Ok(()),
        Some(Ok(Message::Binary(_))) => {
            return Err(RelayError::MalformedMessage(
                "binary frames are not supported".to_owned(),
            ));
        }
        Some(Ok(Message::Close(_))) | None => return Err(RelayError::PeerDisconnected),
        Some(Err(e)) => return Err(RelayError::Transport(e.to_string())),
    };

    let start = Instant::now();
    let reconstruction = service.reconstruct(&text).await?;
    metrics
        .reconstruction_duration
        .observe(start.elapsed().as_secs_f64());

    let ack = serde_json::to_string(&Ack::success())
        .map_err(|e| RelayError::Transport(e.to_string()))?;
    outbound
        .send(Message::Text(ack))
        .await
        .map_err(|e| RelayError::Transport(e.to_string()))?;

    metrics.visual_thoughts_rendered.inc();
    debug!(
        "Rendered image for session {} in {:?}",
        reconstruction.session_id,
        start.elapsed()
    );
    Ok(())
}

pub mod schemas {
    use crate::api::reconstruct::WS_PATH;
    use crate::core::codec::ANONYMOUS_SESSION;
    use crate::core::config::{NormalizationStats, Settings};
    use crate::infrastructure::entities::RECONSTRUCTED_IMAGE;
    use crate::infrastructure::publisher::{CACHE_KEY_PREFIX, CACHE_TTL};
    use serde::{Deserialize, Serialize};
    use serde_json::{Value, json};

    pub const SUCCESS: &str = "success";

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    pub struct Ack {
        pub status: String,
    }

    impl Ack {
        pub fn success() -> Ack {
            Ack {
                status: SUCCESS.to_owned(),
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct WsInfo {
        pub endpoint: String,
        pub full_url: String,
        pub protocol: &'static str,
        pub description: &'static str,
        pub input_format: Value,
        pub output_format: Value,
        pub redis_cache: Value,
        pub model: Value,
    }

    impl WsInfo {
        pub fn new(settings: &Settings, normalization: &NormalizationStats) -> WsInfo {
            let endpoint = format!("/reconstruct{WS_PATH}");

            WsInfo {
                full_url: format!(
                    "ws://localhost:{}{}{endpoint}",
                    settings.port, settings.root_path
                ),
                endpoint,
                protocol: "WebSocket",
                description: "Reconstructs an image from a waveform latent and its skip \
                    connections. Each text frame is acknowledged once the image has been \
                    written to the shared cache.",
                input_format: json!({
                    "type": "waveform_latent",
                    "session_id": format!("string (optional, defaults to '{ANONYMOUS_SESSION}')"),
                    "payload": format!("[float; {}] waveform latent", settings.latent_dim),
                    "skip_connections": "base64-encoded safetensors archive of skip connection tensors",
                }),
                output_format: json!({ "status": SUCCESS }),
                redis_cache: json!({
                    "key": format!("{CACHE_KEY_PREFIX}{}", settings.cache_key),
                    "value_format": {
                        "type": RECONSTRUCTED_IMAGE,
                        "session_id": "{session_id}",
                        "image_base64": "data:image/png;base64,...",
                    },
                    "expiration_seconds": CACHE_TTL.as_secs(),
                }),
                model: json!({
                    "latent_dim": settings.latent_dim,
                    "image_size": settings.image_size,
                    "normalization_channels": normalization.channels(),
                    "normalization_applied": false,
                }),
            }
        }
    }
}
