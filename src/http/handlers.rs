//! Demonstration endpoints behind the request pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    extract::{rejection::JsonRejection, Extension, State},
    http::{Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{token, AuthError, Identity, Scope, StoreError};
use crate::http::middleware::require_activated;
use crate::http::response;
use crate::http::server::AppState;
use crate::props;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/healthcheck", get(healthcheck))
        .route("/v1/users/activated", put(activate_user))
        .route("/v1/tokens/authentication", post(create_authentication_token))
        .route(
            "/v1/me",
            get(show_current_user).route_layer(middleware::from_fn(require_activated)),
        )
        .fallback(not_found)
}

async fn healthcheck(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "available",
        "system_info": {
            "environment": state.config.environment,
            "version": env!("CARGO_PKG_VERSION"),
        }
    }))
}

#[derive(Debug, Deserialize)]
struct ActivateUserInput {
    token: String,
}

async fn activate_user(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    input: Result<Json<ActivateUserInput>, JsonRejection>,
) -> Response {
    let Json(input) = match input {
        Ok(input) => input,
        Err(rejection) => return response::bad_request(rejection.body_text()),
    };

    if let Some(problem) = validate_token_plaintext(&input.token) {
        return response::failed_validation(BTreeMap::from([("token", problem)]));
    }

    match state.auth.activate(&input.token).await {
        Ok(user) => {
            let logger = state.logger.clone();
            let user_id = user.id;
            state.runner.run(async move {
                logger.print_info("activation confirmation sent", props! {"user_id" => user_id});
            });
            (StatusCode::OK, Json(json!({ "user": user }))).into_response()
        }
        Err(AuthError::InvalidCredentialFormat | AuthError::InvalidOrExpiredCredential) => {
            response::failed_validation(BTreeMap::from([(
                "token",
                "invalid or expired activation token".to_string(),
            )]))
        }
        Err(AuthError::Store(e)) => response::server_error(&state.logger, &e, &method, &uri),
    }
}

fn validate_token_plaintext(plaintext: &str) -> Option<String> {
    if plaintext.is_empty() {
        Some("must be provided".to_string())
    } else if plaintext.len() != token::PLAINTEXT_LEN {
        Some(format!("must be {} characters long", token::PLAINTEXT_LEN))
    } else if !token::is_valid_plaintext(plaintext) {
        Some("must be base64url encoded".to_string())
    } else {
        None
    }
}

#[derive(Debug, Deserialize)]
struct CreateTokenInput {
    user_id: i64,
}

async fn create_authentication_token(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    input: Result<Json<CreateTokenInput>, JsonRejection>,
) -> Response {
    let Json(input) = match input {
        Ok(input) => input,
        Err(rejection) => return response::bad_request(rejection.body_text()),
    };

    let user = match state.users.find_user(input.user_id).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return response::invalid_credentials(),
        Err(e) => return response::server_error(&state.logger, &e, &method, &uri),
    };

    let ttl = Duration::from_secs(state.config.auth.authentication_ttl_secs);
    let issued = match state.auth.issue(user.id, ttl, Scope::Authentication).await {
        Ok(issued) => issued,
        Err(e) => return response::server_error(&state.logger, &e, &method, &uri),
    };

    let expiry: DateTime<Utc> = issued.token.expiry.into();
    (
        StatusCode::CREATED,
        Json(json!({
            "authentication_token": {
                "token": issued.plaintext,
                "expiry": expiry.to_rfc3339_opts(SecondsFormat::Secs, true),
            }
        })),
    )
        .into_response()
}

async fn show_current_user(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    method: Method,
    uri: Uri,
) -> Response {
    let Identity::Authenticated { user_id, .. } = identity else {
        return response::authentication_required();
    };

    match state.users.find_user(user_id).await {
        Ok(user) => Json(json!({ "user": user })).into_response(),
        Err(e) => response::server_error(&state.logger, &e, &method, &uri),
    }
}

async fn not_found() -> Response {
    response::not_found()
}
