//! Authentication subsystem.
//!
//! # Data Flow
//! ```text
//! Authorization header
//!     → authenticator.rs (absent/empty → Anonymous, else "Bearer <token>")
//!     → token.rs (shape check, SHA-256)
//!     → store.rs (lookup by hash + scope, expiry check, user lookup)
//!     → Identity attached to the request
//! ```
//!
//! # Design Decisions
//! - Plaintext tokens are never stored, only their SHA-256
//! - Tokens are immutable; activation deletes rather than updates
//! - Storage sits behind traits so a database backend can replace the
//!   in-memory one

pub mod authenticator;
pub mod store;
pub mod token;

pub use authenticator::{AuthError, Identity, TokenAuthenticator};
pub use store::{MemoryStore, StoreError, TokenStore, User, UserStore};
pub use token::{AuthToken, IssuedToken, Scope, TokenHash};
