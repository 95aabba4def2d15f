//! The unified error taxonomy shared by every patchbay crate.

use thiserror::Error;

/// Closed taxonomy of error kinds that can flow out of the OSC core or the
/// audio graph core. Every `PatchbayError` carries exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Packet bytes could not be parsed as an OSC message or bundle.
    Malformed,
    /// An argument's runtime type did not match what a handler expected.
    TypeMismatch,
    /// A type tag character has no known decoding.
    UnknownType,
    /// An address pattern failed to parse or registration-validate.
    AddressError,
    /// A transport-level I/O failure (connect, resolve, send, receive).
    Network,
    /// The peer closed the connection or the local socket was torn down.
    SocketClosed,
    /// A packet or argument exceeded the configured size ceiling.
    MessageTooLarge,
    /// An address pattern contains an unmatched `[` or `{`.
    PatternError,
    /// A requested operation is recognized but deliberately unimplemented.
    NotImplemented,
    /// A configuration value was missing, malformed, or out of range.
    ConfigError,
    /// A node or graph operation failed during execution.
    RuntimeError,
    /// A bounded schedule or queue could not accept another entry.
    ScheduleFull,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Malformed => "malformed",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::UnknownType => "unknown type",
            ErrorKind::AddressError => "address error",
            ErrorKind::Network => "network",
            ErrorKind::SocketClosed => "socket closed",
            ErrorKind::MessageTooLarge => "message too large",
            ErrorKind::PatternError => "pattern error",
            ErrorKind::NotImplemented => "not implemented",
            ErrorKind::ConfigError => "config error",
            ErrorKind::RuntimeError => "runtime error",
            ErrorKind::ScheduleFull => "schedule full",
        };
        f.write_str(s)
    }
}

/// A structured error produced by the OSC core or the audio graph core.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct PatchbayError {
    /// Which bucket of the taxonomy this error belongs to.
    pub kind: ErrorKind,
    /// Human-readable detail, safe to log or forward to a console.
    pub message: String,
    /// The underlying cause, when one exists (e.g. an `io::Error`).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl PatchbayError {
    /// Build an error with no further source chain.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Build an error wrapping an underlying cause.
    pub fn with_source(
        kind: ErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

impl From<std::io::Error> for PatchbayError {
    fn from(err: std::io::Error) -> Self {
        PatchbayError::with_source(ErrorKind::Network, err.to_string(), err)
    }
}

/// The payload delivered to an error handler: dispatch never panics across
/// a collaborator boundary, it reports.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// The error kind being reported.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
    /// Name of the component that raised the error (e.g. `"dispatcher"`,
    /// `"graph:node:7"`), used for log correlation.
    pub origin: String,
}

impl ErrorEvent {
    /// Construct an event from a `PatchbayError` plus an origin label.
    pub fn from_error(err: &PatchbayError, origin: impl Into<String>) -> Self {
        Self {
            kind: err.kind,
            message: err.message.clone(),
            origin: origin.into(),
        }
    }
}

/// A boxed handler invoked for every propagated error: handler exceptions
/// are caught and reported so dispatch can continue, and this handler
/// itself returns nothing and must not be allowed to unwind across the
/// dispatch loop.
pub type ErrorHandler = Box<dyn Fn(ErrorEvent) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_kind() {
        let err = PatchbayError::new(ErrorKind::ScheduleFull, "queue full for key 'gain'");
        assert_eq!(err.to_string(), "schedule full: queue full for key 'gain'");
    }

    #[test]
    fn io_error_maps_to_network() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        let err: PatchbayError = io_err.into();
        assert_eq!(err.kind, ErrorKind::Network);
    }
}
