//! Trace logger: a verbosity mask in front of an optional text sink.
//!
//! Every entry is also emitted as a `tracing` event, so host applications
//! that install a subscriber see connection activity without a sink.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, trace};

bitflags::bitflags! {
    /// Categories of log entries, combined into a verbosity mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TraceLevel: u32 {
        const MESSAGES = 0x01;
        const EVENTS = 0x02;
        const STATE_CHANGES = 0x04;
        const ERRORS = 0x08;
        const INFO = 0x10;
        const ALL = Self::MESSAGES.bits()
            | Self::EVENTS.bits()
            | Self::STATE_CHANGES.bits()
            | Self::ERRORS.bits()
            | Self::INFO.bits();
    }
}

impl TraceLevel {
    fn label(self) -> &'static str {
        if self.contains(Self::ERRORS) {
            "error"
        } else if self.contains(Self::STATE_CHANGES) {
            "state change"
        } else if self.contains(Self::EVENTS) {
            "event"
        } else if self.contains(Self::MESSAGES) {
            "message"
        } else if self.contains(Self::INFO) {
            "info"
        } else {
            "none"
        }
    }
}

/// Destination for formatted log entries.
pub trait LogWriter: Send + Sync {
    fn write(&self, entry: &str);
}

/// Pairs a [`LogWriter`] with the [`TraceLevel`] mask it accepts.
#[derive(Clone)]
pub struct Logger {
    writer: Option<Arc<dyn LogWriter>>,
    level: TraceLevel,
}

impl Logger {
    pub fn new(writer: Arc<dyn LogWriter>, level: TraceLevel) -> Self {
        Self {
            writer: Some(writer),
            level,
        }
    }

    /// A logger that only emits `tracing` events.
    pub fn tracing_only() -> Self {
        Self {
            writer: None,
            level: TraceLevel::empty(),
        }
    }

    pub fn level(&self) -> TraceLevel {
        self.level
    }

    /// Logs `entry` under `level`.
    pub fn log(&self, level: TraceLevel, entry: &str) {
        if level.contains(TraceLevel::ERRORS) {
            error!("{entry}");
        } else if level.contains(TraceLevel::MESSAGES) {
            trace!("{entry}");
        } else {
            debug!("{entry}");
        }

        let Some(writer) = &self.writer else {
            return;
        };
        if !self.level.intersects(level) {
            return;
        }

        let timestamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true);
        writer.write(&format!("{timestamp} [{:<12}] {entry}\n", level.label()));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::tracing_only()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("has_writer", &self.writer.is_some())
            .field("level", &self.level)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl LogWriter for Collect {
        fn write(&self, entry: &str) {
            self.0.lock().unwrap().push(entry.to_string());
        }
    }

    fn strip_timestamp(entry: &str) -> &str {
        entry.split_once(' ').map(|(_, rest)| rest).unwrap_or(entry)
    }

    #[test]
    fn entry_format() {
        let sink = Arc::new(Collect::default());
        let logger = Logger::new(sink.clone(), TraceLevel::ALL);
        logger.log(TraceLevel::STATE_CHANGES, "disconnected -> connecting");
        logger.log(TraceLevel::INFO, "stopping connection");

        let entries = sink.0.lock().unwrap();
        assert_eq!(
            strip_timestamp(&entries[0]),
            "[state change] disconnected -> connecting\n"
        );
        assert_eq!(
            strip_timestamp(&entries[1]),
            "[info        ] stopping connection\n"
        );
        let timestamp = entries[0].split(' ').next().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn mask_filters_entries() {
        let sink = Arc::new(Collect::default());
        let logger = Logger::new(sink.clone(), TraceLevel::ERRORS | TraceLevel::INFO);
        logger.log(TraceLevel::MESSAGES, "dropped");
        logger.log(TraceLevel::STATE_CHANGES, "dropped");
        logger.log(TraceLevel::ERRORS, "kept");

        let entries = sink.0.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(strip_timestamp(&entries[0]), "[error       ] kept\n");
    }

    #[test]
    fn empty_mask_writes_nothing() {
        let sink = Arc::new(Collect::default());
        let logger = Logger::new(sink.clone(), TraceLevel::empty());
        logger.log(TraceLevel::ALL, "nothing");
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn tracing_only_logger_does_not_panic() {
        Logger::default().log(TraceLevel::ERRORS, "no sink");
    }
}
