//! Observability for the exchange
//!
//! - Structured logging (JSON, one line per event)
//! - Typed lifecycle events
//! - Atomic counters with a serializable snapshot
//!
//! Observability is read-only: a failing log sink never fails an operation.
//!
//! # Usage
//!
//! ```ignore
//! use aerodb_exchange::observability::{log_event, Event, ExchangeMetrics};
//!
//! log_event(Event::FetchSkipped, &[("result_id", "r1"), ("bytes", "42")]);
//!
//! let metrics = ExchangeMetrics::new();
//! metrics.increment_fetch_fast_paths();
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{ExchangeMetrics, MetricsSnapshot};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    match event.severity() {
        Severity::Error | Severity::Fatal => Logger::log_stderr(event.severity(), event.as_str(), fields),
        severity => Logger::log(severity, event.as_str(), fields),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_event() {
        // Verifies no panic on either sink
        log_event(Event::NamespaceCreated, &[("path", "/tmp/x")]);
        log_event(Event::NamespaceRemoveFailed, &[("reason", "busy")]);
    }
}
