use crate::core::config::Settings;
use crate::core::metrics::RelayMetrics;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use di_axum::Inject;
use log::error;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};

pub mod reconstruct;

/// All routes of the relay; the DI provider is attached by the caller.
pub fn router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/docs", get(docs))
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .nest("/reconstruct", reconstruct::router())
}

/// Open CORS policy for browser frontends on any origin.
pub fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any)
}

async fn root(Inject(settings): Inject<Settings>) -> Redirect {
    Redirect::temporary(&format!("{}/docs", settings.root_path))
}

async fn docs() -> Html<&'static str> {
    Html(include_str!("../../static/docs.html"))
}

async fn health(Inject(metrics): Inject<RelayMetrics>) -> Json<Value> {
    metrics.health_requests.inc();
    Json(json!({ "status": "healthy" }))
}

async fn metrics_endpoint(Inject(metrics): Inject<RelayMetrics>) -> Response {
    match metrics.render() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(e) => {
            error!("failed to render metrics: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
