//! Admission control stage.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::response;
use crate::http::server::AppState;
use crate::security::rate_limit::{client_key, AdmissionError};

/// Deny clients that exhausted their bucket with 429.
///
/// Keyed by the peer IP from `ConnectInfo`. A request whose peer address
/// is missing or unspecified cannot be attributed to a client and fails
/// with 500.
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.limiter.is_enabled() {
        return next.run(request).await;
    }

    let key = match request.extensions().get::<ConnectInfo<SocketAddr>>() {
        Some(ConnectInfo(addr)) => client_key(addr),
        None => Err(AdmissionError::MissingPeerAddress),
    };
    let key = match key {
        Ok(key) => key,
        Err(e) => {
            return response::server_error(&state.logger, &e, request.method(), request.uri());
        }
    };

    if state.limiter.admit(&key) {
        next.run(request).await
    } else {
        tracing::warn!(client = %key, path = %request.uri().path(), "Rate limit exceeded");
        response::rate_limit_exceeded()
    }
}
