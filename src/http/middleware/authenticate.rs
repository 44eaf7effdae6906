//! Authentication stage and route guards.

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue},
    middleware::Next,
    response::Response,
};

use crate::auth::{AuthError, Identity};
use crate::http::response;
use crate::http::server::AppState;

/// Resolve the `Authorization` header into an [`Identity`] extension.
///
/// No header means [`Identity::Anonymous`]. A header that does not carry a
/// live authentication token is rejected with 401 before the handler runs.
/// Every response from this stage varies on `Authorization`.
pub async fn authenticate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let credential = request
        .headers()
        .get(header::AUTHORIZATION)
        .map(|value| value.to_str().map(str::to_owned));

    let resolved = match &credential {
        None => state.auth.resolve(None).await,
        Some(Ok(value)) => state.auth.resolve(Some(value.as_str())).await,
        Some(Err(_)) => Err(AuthError::InvalidCredentialFormat),
    };

    let mut response = match resolved {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(AuthError::InvalidCredentialFormat | AuthError::InvalidOrExpiredCredential) => {
            response::invalid_authentication_token()
        }
        Err(AuthError::Store(e)) => {
            response::server_error(&state.logger, &e, request.method(), request.uri())
        }
    };

    response
        .headers_mut()
        .append(header::VARY, HeaderValue::from_static("Authorization"));
    response
}

fn identity(request: &Request) -> Identity {
    request
        .extensions()
        .get::<Identity>()
        .copied()
        .unwrap_or(Identity::Anonymous)
}

/// Route guard: anonymous requests get 401.
pub async fn require_authenticated(request: Request, next: Next) -> Response {
    match identity(&request) {
        Identity::Anonymous => response::authentication_required(),
        Identity::Authenticated { .. } => next.run(request).await,
    }
}

/// Route guard: anonymous requests get 401, inactive accounts get 403.
pub async fn require_activated(request: Request, next: Next) -> Response {
    match identity(&request) {
        Identity::Anonymous => response::authentication_required(),
        Identity::Authenticated { activated: false, .. } => response::inactive_account(),
        Identity::Authenticated { activated: true, .. } => next.run(request).await,
    }
}
