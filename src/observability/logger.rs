//! Structured JSON logger for the exchange
//!
//! One line per event: `ts`, `event`, `severity`, then the caller's fields
//! sorted by key. Events below the process-wide minimum severity are
//! dropped before rendering. A failing sink never fails the caller.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};

static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Info as u8);

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Trace = 0,
    Info = 1,
    /// Degraded but continuing, e.g. a missing result file
    Warn = 2,
    Error = 3,
    /// The distributed transaction cannot continue
    Fatal = 4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }

    fn from_u8(value: u8) -> Severity {
        match value {
            0 => Severity::Trace,
            1 => Severity::Info,
            2 => Severity::Warn,
            3 => Severity::Error,
            _ => Severity::Fatal,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "trace" => Ok(Severity::Trace),
            "info" => Ok(Severity::Info),
            "warn" | "warning" => Ok(Severity::Warn),
            "error" => Ok(Severity::Error),
            "fatal" => Ok(Severity::Fatal),
            other => Err(format!("unknown log level \"{}\"", other)),
        }
    }
}

/// Process-wide JSON line logger
pub struct Logger;

impl Logger {
    /// Drop events below `severity` from now on
    pub fn set_min_severity(severity: Severity) {
        MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
    }

    pub fn min_severity() -> Severity {
        Severity::from_u8(MIN_SEVERITY.load(Ordering::Relaxed))
    }

    pub fn enabled(severity: Severity) -> bool {
        severity >= Self::min_severity()
    }

    /// Log to stdout
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if Self::enabled(severity) {
            Self::write_line(&mut io::stdout(), severity, event, fields);
        }
    }

    /// Log to stderr; used for errors and fatal events
    pub fn log_stderr(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        if Self::enabled(severity) {
            Self::write_line(&mut io::stderr(), severity, event, fields);
        }
    }

    fn write_line<W: Write>(writer: &mut W, severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let line = render(Utc::now(), severity, event, fields);
        let _ = writer.write_all(line.as_bytes());
        let _ = writer.flush();
    }
}

fn render(at: DateTime<Utc>, severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(128 + fields.len() * 32);

    output.push_str("{\"ts\":\"");
    output.push_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true));
    output.push_str("\",\"event\":");
    output.push_str(&quote(event));
    output.push_str(",\"severity\":\"");
    output.push_str(severity.as_str());
    output.push('"');

    let mut sorted: Vec<&(&str, &str)> = fields.iter().collect();
    sorted.sort_by_key(|(key, _)| *key);
    for (key, value) in sorted {
        output.push(',');
        output.push_str(&quote(key));
        output.push(':');
        output.push_str(&quote(value));
    }

    output.push_str("}\n");
    output
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_severity_ordering_and_parse() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warn);
        assert_eq!("error".parse::<Severity>().unwrap(), Severity::Error);
        assert!("loud".parse::<Severity>().is_err());
    }

    #[test]
    fn test_render_json_line() {
        let line = render(at(), Severity::Warn, "INTERMEDIATE_RESULT_MISSING", &[("result_id", "r1")]);

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["ts"], "2024-01-02T03:04:05.000Z");
        assert_eq!(parsed["event"], "INTERMEDIATE_RESULT_MISSING");
        assert_eq!(parsed["severity"], "WARN");
        assert_eq!(parsed["result_id"], "r1");
        assert!(line.find("\"event\"").unwrap() < line.find("\"severity\"").unwrap());
    }

    #[test]
    fn test_render_sorts_fields() {
        let first = render(
            at(),
            Severity::Info,
            "FETCH_COMPLETE",
            &[("result_id", "r1"), ("bytes", "2"), ("node", "w1:5544")],
        );
        let second = render(
            at(),
            Severity::Info,
            "FETCH_COMPLETE",
            &[("node", "w1:5544"), ("result_id", "r1"), ("bytes", "2")],
        );
        assert_eq!(first, second);
        assert!(first.find("bytes").unwrap() < first.find("node").unwrap());
        assert!(first.find("node").unwrap() < first.find("result_id").unwrap());
    }

    #[test]
    fn test_render_escapes_values() {
        let line = render(at(), Severity::Info, "X", &[("path", "C:\\results\n\"quoted\"")]);

        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["path"], "C:\\results\n\"quoted\"");
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_min_severity_filter() {
        let previous = Logger::min_severity();
        Logger::set_min_severity(Severity::Error);
        assert!(!Logger::enabled(Severity::Warn));
        assert!(Logger::enabled(Severity::Fatal));
        Logger::set_min_severity(previous);
    }
}
