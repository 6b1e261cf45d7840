use std::sync::Arc;

use axum::{
    body::{self, Body},
    extract::{Request, State},
    response::{IntoResponse, Response},
};
use http::{Method, StatusCode};
use tracing::{debug, error, warn};

use super::Server;
use crate::{metrics::gather_metrics, sources::AlertManagerEvent};

pub async fn health() -> &'static str {
    "OK"
}

pub async fn metrics() -> Response {
    match gather_metrics() {
        Ok(text) => text.into_response(),
        Err(e) => {
            error!("Error encoding metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Decode the Alertmanager payload and dispatch its alerts.
pub async fn webhook(State(server): State<Arc<Server>>, request: Request) -> Response {
    if request.method() != Method::POST {
        return (StatusCode::BAD_REQUEST, "Bad request method.\n").into_response();
    }

    // Bodies at the limit are rejected as well as those above it.
    let limit = server.body_limit.saturating_sub(1);
    let body = match body::to_bytes(request.into_body(), limit).await {
        Ok(body) => body,
        Err(e) => {
            warn!("Error reading request body: {}", e);
            return (StatusCode::BAD_REQUEST, format!("Error reading body: {e}\n")).into_response();
        }
    };

    if server.verbose {
        debug!("Request Body: {:?}", String::from_utf8_lossy(&body));
    }

    let event = match AlertManagerEvent::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Error parsing request JSON: {}", e);
            return (StatusCode::BAD_REQUEST, format!("Error parsing JSON: {e}\n")).into_response();
        }
    };

    let report = server.dispatcher.dispatch(event).await;
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };

    if server.verbose {
        debug!("Response body: {:?}", String::from_utf8_lossy(&report.output));
    }

    (status, Body::from(report.output)).into_response()
}
