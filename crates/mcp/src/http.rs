//! Streamable-HTTP style transport: one JSON-RPC message per `POST /mcp`.
//!
//! Each request is handled on its own axum task, so concurrency comes for
//! free; a client that disconnects drops the in-flight tool call with it.

use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::server::{parse_message, Incoming, McpServer};

pub const MCP_PATH: &str = "/mcp";
pub const HEALTH_PATH: &str = "/healthz";

/// Build the router: `POST /mcp`, `GET /healthz`, `GET /`.
pub fn router(server: McpServer, cors_origin: &str) -> Router {
    Router::new()
        .route(MCP_PATH, post(mcp_post))
        .route(HEALTH_PATH, get(healthz))
        .route("/", get(root))
        .layer(cors_layer(cors_origin))
        .with_state(server)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(e) => {
            warn!(origin, error = %e, "Invalid CORS origin, allowing any");
            layer.allow_origin(Any)
        }
    }
}

async fn mcp_post(State(server): State<McpServer>, body: String) -> Response {
    match parse_message(&body) {
        Incoming::Request(request) => {
            debug!(method = %request.method, id = %request.id, "HTTP request");
            Json(server.handle_request(&request).await).into_response()
        }
        Incoming::Notification(notif) => {
            server.handle_notification(&notif);
            StatusCode::ACCEPTED.into_response()
        }
        Incoming::Invalid(resp) => (StatusCode::BAD_REQUEST, Json(resp)).into_response(),
    }
}

async fn healthz(State(server): State<McpServer>) -> Response {
    Json(json!({
        "ok": true,
        "service": server.name(),
        "paths": [MCP_PATH, HEALTH_PATH],
        "tools": server.tool_names(),
    }))
    .into_response()
}

async fn root() -> Response {
    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("OK. MCP endpoint is at {MCP_PATH}."),
    )
        .into_response()
}

/// Serve `server` on `addr` until Ctrl-C.
pub async fn serve(server: McpServer, addr: &str, cors_origin: &str) -> Result<(), McpError> {
    let app = router(server, cors_origin);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, path = MCP_PATH, "MCP HTTP transport listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}
