//! Observable exchange events
//!
//! Events are explicit and typed; the string form is the `event` key of the
//! structured log line.

use std::fmt;

use super::logger::Severity;

/// Observable events in the intermediate-result exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Namespace lifecycle
    /// Namespace directory created by this backend
    NamespaceCreated,
    /// Namespace directory removed at transaction end
    NamespaceRemoved,
    /// Atomic rename before removal failed, falling back to direct removal
    NamespaceRenameFailed,
    /// Namespace directory could not be removed
    NamespaceRemoveFailed,

    // Broadcast
    /// Destinations prepared, streaming begins
    BroadcastStart,
    /// Broadcast closed on every destination
    BroadcastComplete,
    /// Broadcast aborted
    BroadcastFailed,

    // Fetch
    /// Pull of a named result started
    FetchStart,
    /// Local copy already present, transfer skipped
    FetchSkipped,
    /// Pull complete
    FetchComplete,
    /// Pull failed
    FetchFailed,

    // Read
    /// Result file absent while reading
    ResultMissing,

    // Peer service
    /// Service listening for connections
    ServiceListening,
    /// Listener failed to accept a connection; the service keeps listening
    AcceptFailed,
    /// Session accepted
    SessionStart,
    /// Session closed
    SessionEnd,
    /// Peer received a result stream into a local file
    ResultReceived,
    /// Peer streamed a local result file to a client
    ResultSent,
    /// Service shutting down
    ServiceShutdown,

    // Repartitioning
    /// Fragment transfers dispatched to target nodes
    TransfersDispatched,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::NamespaceCreated => "RESULT_NAMESPACE_CREATED",
            Event::NamespaceRemoved => "RESULT_NAMESPACE_REMOVED",
            Event::NamespaceRenameFailed => "RESULT_NAMESPACE_RENAME_FAILED",
            Event::NamespaceRemoveFailed => "RESULT_NAMESPACE_REMOVE_FAILED",

            Event::BroadcastStart => "RESULT_BROADCAST_BEGIN",
            Event::BroadcastComplete => "RESULT_BROADCAST_COMPLETE",
            Event::BroadcastFailed => "RESULT_BROADCAST_FAILED",

            Event::FetchStart => "RESULT_FETCH_BEGIN",
            Event::FetchSkipped => "RESULT_FETCH_SKIPPED",
            Event::FetchComplete => "RESULT_FETCH_COMPLETE",
            Event::FetchFailed => "RESULT_FETCH_FAILED",

            Event::ResultMissing => "INTERMEDIATE_RESULT_MISSING",

            Event::ServiceListening => "RESULT_SERVICE_LISTENING",
            Event::AcceptFailed => "RESULT_SERVICE_ACCEPT_FAILED",
            Event::SessionStart => "RESULT_SESSION_BEGIN",
            Event::SessionEnd => "RESULT_SESSION_END",
            Event::ResultReceived => "RESULT_RECEIVED",
            Event::ResultSent => "RESULT_SENT",
            Event::ServiceShutdown => "RESULT_SERVICE_SHUTDOWN",

            Event::TransfersDispatched => "FRAGMENT_TRANSFERS_DISPATCHED",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::NamespaceRenameFailed | Event::ResultMissing | Event::AcceptFailed => {
                Severity::Warn
            }
            Event::NamespaceRemoveFailed | Event::BroadcastFailed | Event::FetchFailed => {
                Severity::Error
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_result_is_a_warning() {
        assert_eq!(Event::ResultMissing.severity(), Severity::Warn);
        assert_eq!(Event::ResultMissing.as_str(), "INTERMEDIATE_RESULT_MISSING");
    }

    #[test]
    fn test_failures_are_errors() {
        assert_eq!(Event::NamespaceRemoveFailed.severity(), Severity::Error);
        assert_eq!(Event::FetchFailed.severity(), Severity::Error);
        assert_eq!(Event::BroadcastStart.severity(), Severity::Info);
    }

    #[test]
    fn test_accept_failure_is_not_a_session_end() {
        assert_ne!(Event::AcceptFailed.as_str(), Event::SessionEnd.as_str());
        assert_eq!(Event::AcceptFailed.as_str(), "RESULT_SERVICE_ACCEPT_FAILED");
        assert_eq!(Event::AcceptFailed.severity(), Severity::Warn);
    }
}
