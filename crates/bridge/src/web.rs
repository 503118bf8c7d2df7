use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, Transport};
use crate::config::HttpConfig;
use crate::protocol::{RequestBody, ResponseBody};

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub(crate) fn router<T: Transport + 'static>(bridge: Bridge<T>) -> Router {
    Router::new()
        .route("/collect2.php", post(collect::<T>))
        .route("/api/status", get(api_status::<T>))
        .route("/api/status/{identifier}", get(api_device_status::<T>))
        .with_state(bridge)
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({}))).into_response()
}

/// Telemetry report from a controller. Answers with the pending valve
/// command, then publishes the report cycle in the background.
async fn collect<T: Transport + 'static>(State(bridge): State<Bridge<T>>, body: Bytes) -> Response {
    let request: RequestBody = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("bad telemetry json: {e}");
            return bad_request();
        }
    };
    let payload = request.itek_v1;
    debug!(controller_id = %payload.id, ?payload, "telemetry");

    let upserted = match bridge.registry().upsert(&payload).await {
        Ok(u) => u,
        Err(e) => {
            warn!(mac = %payload.mac_address, "rejected payload: {e}");
            return bad_request();
        }
    };
    let report = upserted.report;
    let identifier = report.identifier.clone();

    info!(device = %identifier, new = upserted.is_new, "{}", upserted.summary);

    let valve = report.pending.map(|p| p.command.wire_code());

    let publisher = bridge.clone();
    let is_new = upserted.is_new;
    tokio::spawn(async move {
        if is_new {
            publisher.watch(&report.identifier).await;
        }
        publisher.run_cycle(report).await;
    });

    Json(ResponseBody::ok(valve)).into_response()
}

async fn api_status<T: Transport + 'static>(State(bridge): State<Bridge<T>>) -> impl IntoResponse {
    Json(bridge.registry().reports().await)
}

async fn api_device_status<T: Transport + 'static>(
    State(bridge): State<Bridge<T>>,
    Path(identifier): Path<String>,
) -> Response {
    match bridge.registry().report(&identifier).await {
        Some(report) => Json(report).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub(crate) async fn serve<T: Transport + 'static>(bridge: Bridge<T>, http: &HttpConfig) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], http.port));
    let app = router(bridge);

    if let (Some(cert), Some(key)) = (&http.tls_cert, &http.tls_key) {
        #[cfg(feature = "tls")]
        {
            let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
                .await
                .with_context(|| format!("failed to load TLS cert {cert} / key {key}"))?;
            info!(%addr, "telemetry endpoint listening (tls)");
            axum_server::bind_rustls(addr, tls)
                .serve(app.into_make_service())
                .await
                .context("web server error")?;
            return Ok(());
        }
        #[cfg(not(feature = "tls"))]
        warn!(%cert, %key, "TLS configured but built without the `tls` feature; serving plain HTTP");
    }

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "telemetry endpoint listening");
    axum::serve(listener, app).await.context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
