//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request handler or background task:
//!     → fault.rs (catch_unwind boundary, panic → Contained::Fault)
//!     → Fault carries the panic message and the panic-site trace
//!
//! Background work:
//!     → background.rs (spawn, track in-flight, optional permit)
//!     → fault.rs boundary around the task body
//!     → one Error entry per fault; the process keeps running
//! ```
//!
//! # Design Decisions
//! - A panic never escapes a request or a background task
//! - The hook records the trace at the panic site, the boundary only reports it
//! - Shutdown waits for in-flight background work with a deadline

pub mod background;
pub mod fault;

pub use background::BackgroundRunner;
pub use fault::{contain, install_panic_hook, Contained, Fault};
