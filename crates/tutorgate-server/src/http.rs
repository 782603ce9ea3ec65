use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::warn;

use crate::gateway::{Gateway, InboundRequest};

pub const CHAT_ROUTE: &str = "chat";

pub fn router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/api/chat", any(chat))
        .route("/health", get(health))
        .with_state(gateway)
}

async fn health(State(gateway): State<Arc<Gateway>>) -> Response {
    json_response(
        StatusCode::OK,
        json!({
            "status": "ok",
            "coordination": gateway.coordination_mode().as_str(),
        }),
    )
}

async fn chat(
    State(gateway): State<Arc<Gateway>>,
    method: Method,
    headers: HeaderMap,
    peer: Option<ConnectInfo<SocketAddr>>,
    body: Bytes,
) -> Response {
    if method == Method::OPTIONS {
        return preflight();
    }
    if method != Method::POST {
        return json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            json!({ "error": "Method not allowed" }),
        );
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(route = CHAT_ROUTE, error = %err, "unparseable chat payload");
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "Invalid request payload" }),
            );
        }
    };

    let mut req = InboundRequest::new(CHAT_ROUTE, headers, payload);
    req.peer_addr = peer.map(|ConnectInfo(addr)| addr.ip().to_string());

    let res = gateway.handle(req).await;
    let status = StatusCode::from_u16(res.status).unwrap_or(StatusCode::BAD_GATEWAY);
    json_response(status, res.body)
}

fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "POST,OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
        ],
    )
        .into_response()
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (status, [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")], Json(body)).into_response()
}
