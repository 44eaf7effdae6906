//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (peer SocketAddr via ConnectInfo)
//!     → server.rs (tower-http: request id, trace, timeout)
//!     → middleware/recover.rs (panic containment)
//!     → middleware/rate_limit.rs (admit or 429)
//!     → middleware/authenticate.rs (Identity or 401)
//!     → handlers.rs (route guards, demo endpoints)
//!     → response.rs (JSON error bodies)
//! ```

pub mod handlers;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
