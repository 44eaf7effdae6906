//! JSON error responses.
//!
//! Every error leaves the service as `{"error": ...}` with a fitting status.
//! Server errors are logged here, with the request method and URL, before
//! the generic 500 is built.

use std::collections::BTreeMap;
use std::fmt;

use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::observability::logging::Logger;
use crate::props;

pub const SERVER_ERROR_MESSAGE: &str =
    "the server encountered a problem and could not process your request";

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Log `err` at Error level and answer 500 with a generic message.
pub fn server_error(logger: &Logger, err: &dyn fmt::Display, method: &Method, uri: &Uri) -> Response {
    logger.print_error(
        err,
        props! {"request_method" => method, "request_url" => uri},
    );
    error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE)
}

/// 500 for a contained panic. The connection is closed after the response.
pub fn panic_recovered() -> Response {
    let mut response = error_response(StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE);
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

pub fn rate_limit_exceeded() -> Response {
    error_response(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded")
}

pub fn invalid_authentication_token() -> Response {
    let mut response = error_response(
        StatusCode::UNAUTHORIZED,
        "invalid or missing authentication token",
    );
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
    response
}

pub fn invalid_credentials() -> Response {
    error_response(StatusCode::UNAUTHORIZED, "invalid authentication credentials")
}

pub fn authentication_required() -> Response {
    error_response(
        StatusCode::UNAUTHORIZED,
        "you must be authenticated to access this resource",
    )
}

pub fn inactive_account() -> Response {
    error_response(
        StatusCode::FORBIDDEN,
        "your user account must be activated to access this resource",
    )
}

pub fn bad_request(message: impl Into<String>) -> Response {
    error_response(StatusCode::BAD_REQUEST, message)
}

pub fn not_found() -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        "the requested resource could not be found",
    )
}

/// 422 with one message per offending field.
pub fn failed_validation(errors: BTreeMap<&'static str, String>) -> Response {
    (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({ "error": errors }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::{Level, SharedBuffer};

    #[test]
    fn invalid_token_challenges_bearer() {
        let response = invalid_authentication_token();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
    }

    #[test]
    fn panic_response_closes_connection() {
        let response = panic_recovered();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }

    #[test]
    fn server_error_is_logged_with_request() {
        let buffer = SharedBuffer::new();
        let logger = Logger::new(buffer.clone(), Level::Info);
        let uri: Uri = "/v1/me".parse().unwrap();

        let response = server_error(&logger, &"store offline", &Method::GET, &uri);
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let entries = buffer.entries();
        assert_eq!(entries[0]["message"], "store offline");
        assert_eq!(entries[0]["properties"]["request_method"], "GET");
        assert_eq!(entries[0]["properties"]["request_url"], "/v1/me");
    }
}
