//! Error types for sqlgate operations.
//!
//! The taxonomy distinguishes who is at fault and whether a retry can ever
//! help:
//!
//! - [`ConnectionError`] — establishing or keeping the link to the server
//! - [`QueryError`] — the server rejected a command (SQLSTATE carried verbatim)
//! - [`ProtocolError`] — malformed or truncated wire data; the connection is
//!   no longer trustworthy
//! - [`UsageError`] — the caller misused the API; never retried
//! - [`ConfigError`] — bad connection options, detected before any I/O

use std::fmt;

/// The primary error type for all sqlgate operations.
#[derive(Debug)]
pub enum Error {
    /// Connection-related errors (connect, auth, lost connection)
    Connection(ConnectionError),
    /// Server-reported command errors
    Query(QueryError),
    /// Wire-level protocol errors
    Protocol(ProtocolError),
    /// Client API misuse
    Usage(UsageError),
    /// Configuration errors
    Config(ConfigError),
    /// I/O errors
    Io(std::io::Error),
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    /// Failed to establish the connection
    Connect,
    /// Authentication failed
    Authentication,
    /// Connection lost during an operation
    Disconnected,
    /// Requested character encoding is not usable
    Encoding,
}

/// A server error packet, surfaced without reinterpretation.
#[derive(Debug)]
pub struct QueryError {
    /// Server error code (e.g. 1062)
    pub code: u16,
    /// Five-character SQLSTATE, when the server sent one
    pub sqlstate: Option<String>,
    /// Server message, verbatim
    pub message: String,
}

#[derive(Debug)]
pub struct ProtocolError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug)]
pub struct UsageError {
    pub kind: UsageErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageErrorKind {
    /// A prepared-statement parameter slot was never bound
    ParameterUnset,
    /// A mutating result-set method was called on a read-only set
    NotUpdatable,
    /// Cursor positioned where the operation is illegal
    Positioning,
    /// The feature is not supported by this driver or server version
    NotSupported,
    /// Operation illegal in the current connection/statement state
    InvalidState,
    /// A column value could not be converted to the requested type
    TypeConversion,
}

#[derive(Debug)]
pub struct ConfigError {
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Build a client-usage error.
    pub fn usage(kind: UsageErrorKind, message: impl Into<String>) -> Self {
        Error::Usage(UsageError {
            kind,
            message: message.into(),
        })
    }

    /// Build a protocol error with no underlying cause.
    pub fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(ProtocolError {
            message: message.into(),
            source: None,
        })
    }

    /// Build a connection error with no underlying cause.
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
            source: None,
        })
    }

    /// Does this error mean the connection can no longer be used?
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Connection(c) => matches!(
                c.kind,
                ConnectionErrorKind::Connect
                    | ConnectionErrorKind::Authentication
                    | ConnectionErrorKind::Disconnected
            ),
            Error::Protocol(_) | Error::Io(_) => true,
            _ => false,
        }
    }

    /// The server-provided SQLSTATE, if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sqlstate.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "Connection error: {}", e.message),
            Error::Query(e) => match &e.sqlstate {
                Some(state) => {
                    write!(f, "Server error {} (SQLSTATE {}): {}", e.code, state, e.message)
                }
                None => write!(f, "Server error {}: {}", e.code, e.message),
            },
            Error::Protocol(e) => write!(f, "Protocol error: {}", e.message),
            Error::Usage(e) => write!(f, "Usage error: {}", e.message),
            Error::Config(e) => write!(f, "Configuration error: {}", e.message),
            Error::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Connection(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Protocol(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Config(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sqlstate {
            Some(state) => write!(f, "{} (SQLSTATE {})", self.message, state),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for UsageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<ConnectionError> for Error {
    fn from(err: ConnectionError) -> Self {
        Error::Connection(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl From<UsageError> for Error {
    fn from(err: UsageError) -> Self {
        Error::Usage(err)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

/// Result type alias for sqlgate operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification() {
        let lost = Error::connection(ConnectionErrorKind::Disconnected, "lost");
        assert!(lost.is_fatal());

        let proto = Error::protocol("truncated packet");
        assert!(proto.is_fatal());

        let usage = Error::usage(UsageErrorKind::Positioning, "before first row");
        assert!(!usage.is_fatal());

        let query = Error::Query(QueryError {
            code: 1064,
            sqlstate: Some("42000".to_string()),
            message: "syntax".to_string(),
        });
        assert!(!query.is_fatal());
    }

    #[test]
    fn sqlstate_passthrough() {
        let err = Error::Query(QueryError {
            code: 1062,
            sqlstate: Some("23000".to_string()),
            message: "Duplicate entry".to_string(),
        });
        assert_eq!(err.sqlstate(), Some("23000"));
        assert_eq!(
            err.to_string(),
            "Server error 1062 (SQLSTATE 23000): Duplicate entry"
        );
    }

    #[test]
    fn usage_error_display() {
        let err = Error::usage(UsageErrorKind::ParameterUnset, "parameter 2 is not set");
        assert_eq!(err.to_string(), "Usage error: parameter 2 is not set");
    }
}
