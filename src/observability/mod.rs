//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Core components (limiter sweep, background runner, pipeline):
//!     → logging.rs (Logger: leveled JSON lines, one mutex per sink)
//!
//! tracing events (crate diagnostics, tower-http request traces):
//!     → EnvFilter
//!     → layer.rs (JsonLogLayer)
//!     → logging.rs (same Logger, same sink)
//!
//! Counters and gauges:
//!     → metrics.rs → Prometheus exporter (optional)
//! ```
//!
//! # Design Decisions
//! - A single sink for every log line so entries never interleave
//! - Error entries carry a stack trace; Info entries never do
//! - Metrics are cheap and recorded unconditionally

pub mod layer;
pub mod logging;
pub mod metrics;
