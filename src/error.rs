//! The stable error surface shared by every layer of the core.

use std::fmt;

use failure::{Backtrace, Context, Fail};

/// Stable, enumerated error identifiers (§6 of the spec).
///
/// These are intentionally flat (no nested payloads beyond what's listed)
/// so callers across an FFI boundary can match on a simple code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    UnexpectedError,
    InvalidUri,
    UnknownUriScheme,
    UnknownHost,
    ProtocolNegotiationFailed,
    InvalidCredentials,
    ConnectionClosed,
    SessionFailed,
    SessionEnded,
    SessionReset,
    SessionBusy,
    UnclosedResultStream,
    StatementEvaluationFailed,
    StatementPreviousFailure,
    TlsNotSupported,
    TlsVerificationFailed,
    NoServerTlsSupport,
    ServerRequiresSecure,
    InvalidMapKeyType,
    InvalidLabelType,
    InvalidPathNodeType,
    InvalidPathRelationshipType,
    InvalidPathSequenceLength,
    InvalidPathSequenceIdxType,
    InvalidPathSequenceIdxRange,
    AuthRateLimit,
    TlsMalformedCertificate,
    NoBufs,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { write!(f, "{:?}", self) }
}

/// The crate's error type: an [`ErrorKind`] plus a human-readable context
/// string (connection id, message type, offending field) attached at the
/// point of failure, and a `failure` chain for the underlying cause.
#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind { self.inner.get_context() }

    pub fn with_context<S: Into<String>>(kind: ErrorKind, context: S) -> Self {
        let message = format!("{}: {}", kind, context.into());
        Error {
            inner: Context::new(kind).context(message).into_inner(),
        }
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> { self.inner.cause() }

    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result { fmt::Display::fmt(&self.inner, f) }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Self { Error { inner } }
}

impl From<String> for Error {
    fn from(message: String) -> Self { Error::with_context(ErrorKind::UnexpectedError, message) }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        match e.kind() {
            IoKind::UnexpectedEof | IoKind::ConnectionReset | IoKind::ConnectionAborted
            | IoKind::BrokenPipe | IoKind::NotConnected => {
                Error::with_context(ErrorKind::ConnectionClosed, e.to_string())
            }
            _ => Error::with_context(ErrorKind::UnexpectedError, e.to_string()),
        }
    }
}

pub type Fallible<T> = Result<T, Error>;

/// Shorthand for constructing an [`Error`] with a formatted context string,
/// mirroring the `bail!` macro used throughout this codebase.
#[macro_export]
macro_rules! bail_kind {
    ($kind:expr, $($arg:tt)*) => {
        return Err($crate::error::Error::with_context($kind, format!($($arg)*)))
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn kind_roundtrips_through_with_context() {
        let err = Error::with_context(ErrorKind::InvalidUri, "missing host");
        assert_eq!(*err.kind(), ErrorKind::InvalidUri);
        assert!(err.to_string().contains("missing host"));
    }

    #[test]
    fn bare_kind_conversion_preserves_kind() {
        let err: Error = ErrorKind::SessionBusy.into();
        assert_eq!(*err.kind(), ErrorKind::SessionBusy);
    }

    #[test]
    fn eof_like_io_errors_map_to_connection_closed() {
        let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: Error = io_err.into();
        assert_eq!(*err.kind(), ErrorKind::ConnectionClosed);
    }

    #[test]
    fn other_io_errors_map_to_unexpected_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io_err.into();
        assert_eq!(*err.kind(), ErrorKind::UnexpectedError);
    }
}
