//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     broadcast → server stops accepting and drains
//!               → limiter sweep and token purge exit their loops
//!     server    → waits for in-flight background tasks (bounded)
//! ```
//!
//! # Design Decisions
//! - One broadcast channel; every long-running task owns a receiver
//! - Background tasks are never cancelled, only waited on with a deadline

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
