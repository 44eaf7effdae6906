//! Panic recovery stage.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::request::request_id;
use crate::http::response;
use crate::http::server::AppState;
use crate::props;
use crate::resilience::fault::{self, Contained};

/// Contain any panic raised by the inner stages or the handler.
///
/// The panic is logged once at Error level with the trace from the panic
/// site; the client gets a generic 500 and the connection is closed.
pub async fn recover_panic(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request_id(&request).map(str::to_owned);

    match fault::contain(next.run(request)).await {
        Contained::Ok(response) => response,
        Contained::Fault(fault) => {
            let message = fault.to_string();
            let mut properties = props! {"request_method" => method, "request_url" => uri};
            if let Some(id) = request_id {
                properties.insert("request_id".to_string(), id);
            }
            state
                .logger
                .print_error_with_trace(&message, properties, fault.into_trace());
            response::panic_recovered()
        }
    }
}
