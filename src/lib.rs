//! Request admission control, bearer-token authentication and safe
//! background execution for an HTTP API.

pub mod auth;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use observability::logging::{Level, Logger};
