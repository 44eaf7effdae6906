//! Request pipeline stages, outermost first.
//!
//! ```text
//! recover.rs       catch panics from everything inside, 500 + Connection: close
//! rate_limit.rs    per-client admission, 429 on deny
//! authenticate.rs  Authorization header → Identity extension, 401 on bad token
//! guards           per-route require_authenticated / require_activated
//! ```

pub mod authenticate;
pub mod rate_limit;
pub mod recover;

pub use authenticate::{authenticate, require_activated, require_authenticated};
pub use rate_limit::rate_limit;
pub use recover::recover_panic;
