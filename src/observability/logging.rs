//! Structured logging.
//!
//! # Responsibilities
//! - Write leveled log entries as single JSON lines
//! - Drop entries below the configured minimum level before formatting them
//! - Attach a stack trace to every entry at Error level or above
//! - Serialize all sink writes so concurrent entries never interleave
//!
//! # Design Decisions
//! - One mutex guards the sink; formatting happens outside it
//! - The minimum level lives in an atomic so config reload can change it
//! - `print_fatal` is the only place in the crate that exits the process

use std::backtrace::Backtrace;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Ordered key/value pairs attached to a log entry.
pub type Properties = BTreeMap<String, String>;

/// Build a [`Properties`] map from `key => value` pairs.
///
/// Values only need to implement `ToString`.
#[macro_export]
macro_rules! props {
    () => {
        $crate::observability::logging::Properties::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut properties = $crate::observability::logging::Properties::new();
        $(properties.insert(($key).to_string(), ($value).to_string());)+
        properties
    }};
}

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[default]
    Info = 0,
    Error = 1,
    Fatal = 2,
    /// Minimum level that silences every entry.
    Off = 3,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
            Level::Off => "",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Level::Info,
            1 => Level::Error,
            2 => Level::Fatal,
            _ => Level::Off,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single log line as it is written to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub level: &'static str,
    pub time: String,
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

/// Leveled JSON-lines logger shared by every subsystem.
pub struct Logger {
    out: Mutex<Box<dyn Write + Send>>,
    min_level: AtomicU8,
}

impl Logger {
    /// Create a logger writing entries at or above `min_level` to `out`.
    pub fn new<W>(out: W, min_level: Level) -> Self
    where
        W: Write + Send + 'static,
    {
        Self {
            out: Mutex::new(Box::new(out)),
            min_level: AtomicU8::new(min_level as u8),
        }
    }

    /// Logger writing to standard output.
    pub fn stdout(min_level: Level) -> Self {
        Self::new(io::stdout(), min_level)
    }

    pub fn min_level(&self) -> Level {
        Level::from_u8(self.min_level.load(Ordering::Relaxed))
    }

    pub fn set_min_level(&self, level: Level) {
        self.min_level.store(level as u8, Ordering::Relaxed);
    }

    /// Whether an entry at `level` would be written.
    pub fn enabled(&self, level: Level) -> bool {
        level != Level::Off && level >= self.min_level()
    }

    pub fn print_info(&self, message: &str, properties: Properties) {
        let _ = self.print(Level::Info, message, properties);
    }

    pub fn print_error(&self, err: &dyn fmt::Display, properties: Properties) {
        if self.enabled(Level::Error) {
            let _ = self.print(Level::Error, &err.to_string(), properties);
        }
    }

    /// Error entry carrying a trace captured elsewhere, e.g. at a panic site.
    ///
    /// Falls back to capturing the current stack when `trace` is `None`.
    pub fn print_error_with_trace(
        &self,
        message: &str,
        properties: Properties,
        trace: Option<String>,
    ) {
        let _ = self.write_entry(Level::Error, message, properties, trace);
    }

    /// Write a Fatal entry and terminate the process with exit code 1.
    pub fn print_fatal(&self, err: &dyn fmt::Display, properties: Properties) -> ! {
        if self.enabled(Level::Fatal) {
            let _ = self.print(Level::Fatal, &err.to_string(), properties);
        }
        std::process::exit(1)
    }

    /// Write one entry. Returns the number of bytes written, zero when the
    /// entry was filtered out.
    pub fn print(&self, level: Level, message: &str, properties: Properties) -> io::Result<usize> {
        self.write_entry(level, message, properties, None)
    }

    fn write_entry(
        &self,
        level: Level,
        message: &str,
        properties: Properties,
        trace: Option<String>,
    ) -> io::Result<usize> {
        if !self.enabled(level) {
            return Ok(0);
        }

        let trace = if level >= Level::Error {
            Some(trace.unwrap_or_else(|| Backtrace::force_capture().to_string()))
        } else {
            None
        };

        let entry = LogEntry {
            level: level.as_str(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            message: message.to_string(),
            properties,
            trace,
        };

        let mut line = match serde_json::to_vec(&entry) {
            Ok(line) => line,
            Err(e) => format!("{}: unable to marshal log message: {}", Level::Error, e).into_bytes(),
        };
        line.push(b'\n');

        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        out.write_all(&line)?;
        out.flush()?;
        Ok(line.len())
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.min_level())
            .finish_non_exhaustive()
    }
}

/// Cloneable in-memory sink. Useful for capturing log output.
#[derive(Clone, Default)]
pub struct SharedBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far, lossily decoded.
    pub fn contents(&self) -> String {
        let bytes = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Written entries, one parsed JSON value per line.
    pub fn entries(&self) -> Vec<serde_json::Value> {
        self.contents()
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).is_empty()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn logger(min_level: Level) -> (Logger, SharedBuffer) {
        let buffer = SharedBuffer::new();
        (Logger::new(buffer.clone(), min_level), buffer)
    }

    #[test]
    fn entries_below_min_level_are_dropped() {
        let (logger, buffer) = logger(Level::Error);
        let written = logger.print(Level::Info, "ignored", props! {"k" => "v"}).unwrap();
        assert_eq!(written, 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn off_silences_everything() {
        let (logger, buffer) = logger(Level::Off);
        logger.print_error(&"boom", props!());
        assert!(buffer.is_empty());
    }

    struct CountingDisplay(std::sync::atomic::AtomicUsize);

    impl fmt::Display for CountingDisplay {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            self.0.fetch_add(1, Ordering::SeqCst);
            f.write_str("counted")
        }
    }

    #[test]
    fn filtered_errors_are_never_formatted() {
        let (logger, buffer) = logger(Level::Off);
        let err = CountingDisplay(std::sync::atomic::AtomicUsize::new(0));
        logger.print_error(&err, props!());
        assert_eq!(err.0.load(Ordering::SeqCst), 0);
        assert!(buffer.is_empty());

        logger.set_min_level(Level::Error);
        logger.print_error(&err, props!());
        assert_eq!(err.0.load(Ordering::SeqCst), 1);
        assert_eq!(buffer.entries()[0]["message"], "counted");
    }

    #[test]
    fn info_entry_has_no_trace() {
        let (logger, buffer) = logger(Level::Info);
        logger.print_info("started", props! {"addr" => "127.0.0.1:4000"});

        let entries = buffer.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["level"], "INFO");
        assert_eq!(entries[0]["message"], "started");
        assert_eq!(entries[0]["properties"]["addr"], "127.0.0.1:4000");
        assert!(entries[0].get("trace").is_none());
        assert!(entries[0]["time"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn error_entry_always_carries_trace() {
        let (logger, buffer) = logger(Level::Info);
        logger.print_error(&"database unreachable", props!());

        let entries = buffer.entries();
        assert_eq!(entries[0]["level"], "ERROR");
        let trace = entries[0]["trace"].as_str().unwrap();
        assert!(!trace.is_empty());
        // empty properties are omitted
        assert!(entries[0].get("properties").is_none());
    }

    #[test]
    fn supplied_trace_is_kept() {
        let (logger, buffer) = logger(Level::Info);
        logger.print_error_with_trace("panicked", props!(), Some("frame 0".into()));
        assert_eq!(buffer.entries()[0]["trace"], "frame 0");
    }

    #[test]
    fn min_level_can_change_at_runtime() {
        let (logger, buffer) = logger(Level::Info);
        logger.set_min_level(Level::Error);
        logger.print_info("dropped", props!());
        assert!(buffer.is_empty());
        assert_eq!(logger.min_level(), Level::Error);
    }

    #[test]
    fn concurrent_writes_never_interleave() {
        let (logger, buffer) = logger(Level::Info);
        let logger = Arc::new(logger);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = logger.clone();
                thread::spawn(move || {
                    for i in 0..50 {
                        logger.print_info("tick", props! {"thread" => t, "i" => i});
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let contents = buffer.contents();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 400);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(value["message"], "tick");
        }
    }

    #[test]
    fn level_parses_from_config_names() {
        let level: Level = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(level, Level::Error);
        assert!(Level::Fatal > Level::Error);
    }
}
