//! Bridge from `tracing` events to the structured [`Logger`].
//!
//! Code inside the crate (and tower-http's request tracing) emits ordinary
//! `tracing` events. This layer turns each event that passes the `EnvFilter`
//! into a log entry so everything ends up in the one serialized sink.

use std::fmt;
use std::sync::Arc;

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

use super::logging::{Level, Logger, Properties};

/// `tracing_subscriber` layer writing events through a [`Logger`].
pub struct JsonLogLayer {
    logger: Arc<Logger>,
}

impl JsonLogLayer {
    pub fn new(logger: Arc<Logger>) -> Self {
        Self { logger }
    }
}

impl<S: Subscriber> Layer<S> for JsonLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = if *metadata.level() == tracing::Level::ERROR {
            Level::Error
        } else {
            Level::Info
        };
        if !self.logger.enabled(level) {
            return;
        }

        let mut fields = FieldCollector::default();
        event.record(&mut fields);
        fields
            .properties
            .insert("target".to_string(), metadata.target().to_string());

        let _ = self.logger.print(level, &fields.message, fields.properties);
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    properties: Properties,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.properties
                .insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.properties
                .insert(field.name().to_string(), format!("{:?}", value));
        }
    }
}

/// Install the global subscriber: `EnvFilter` (from `RUST_LOG`, else
/// `default_filter`) followed by the JSON bridge.
pub fn install(logger: Arc<Logger>, default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(JsonLogLayer::new(logger))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::logging::SharedBuffer;

    #[test]
    fn events_are_written_as_entries() {
        let buffer = SharedBuffer::new();
        let logger = Arc::new(Logger::new(buffer.clone(), Level::Info));
        let subscriber = tracing_subscriber::registry().with(JsonLogLayer::new(logger));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(client = "10.0.0.1", evicted = 3, "Swept idle clients");
            tracing::error!(error = %"disk full", "Write failed");
        });

        let entries = buffer.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["level"], "INFO");
        assert_eq!(entries[0]["message"], "Swept idle clients");
        assert_eq!(entries[0]["properties"]["client"], "10.0.0.1");
        assert_eq!(entries[0]["properties"]["evicted"], "3");
        assert_eq!(entries[1]["level"], "ERROR");
        assert_eq!(entries[1]["properties"]["error"], "disk full");
        assert!(entries[1]["trace"].as_str().is_some());
    }

    #[test]
    fn filtered_levels_skip_field_collection() {
        let buffer = SharedBuffer::new();
        let logger = Arc::new(Logger::new(buffer.clone(), Level::Error));
        let subscriber = tracing_subscriber::registry().with(JsonLogLayer::new(logger));

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!("Rate limit exceeded");
        });

        assert!(buffer.is_empty());
    }
}
