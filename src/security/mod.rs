//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → client key from the peer address (raw IP, forwarded headers ignored)
//!     → rate_limit.rs (token bucket per client: admit or deny)
//!     → deny becomes 429 in the HTTP layer
//!
//! Every sweep_interval:
//!     → rate_limit.rs sweep evicts clients idle beyond idle_eviction
//! ```
//!
//! # Design Decisions
//! - One lock over the whole client registry, never held across an await
//! - New clients start with a full bucket
//! - A client key that cannot be derived is an error, never a silent allow

pub mod rate_limit;

pub use rate_limit::{AdmissionError, LimiterSettings, RateLimiter};
