//! `pgmini` error types.
//!
//! Every error carries a message and, for server-reported and
//! connection-level errors, a 5-character SQLSTATE code. [`ErrorKind`]
//! mirrors the classic database API hierarchy; the kind of a server error
//! is chosen from its SQLSTATE class.
use std::{fmt, io, str::Utf8Error};

use crate::{
    connection::ParseError,
    postgres::{ProtocolError, backend::ErrorResponse},
    sql::BindError,
    value::DecodeError,
};

/// A specialized [`Result`] type for `pgmini` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from the `pgmini` library.
pub struct Error {
    kind: ErrorKind,
    message: String,
    code: Option<String>,
}

/// The database API error class of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Defined for API compatibility; never raised by the driver itself.
    Warning,
    /// Errors related to the driver rather than the server.
    Interface,
    /// Server error with no more specific class.
    Database,
    /// Problems with the processed data.
    Data,
    /// Errors related to the database's operation, not under the
    /// programmer's control.
    Operational,
    /// Relational integrity violations.
    Integrity,
    /// Internal database errors.
    Internal,
    /// Programming errors: bad SQL, misuse of the driver.
    Programming,
    /// Feature the driver or the database does not support.
    NotSupported,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), code: None }
    }

    pub(crate) fn interface(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Interface, message)
    }

    pub(crate) fn not_supported(what: &str) -> Self {
        Self::new(ErrorKind::NotSupported, format!("{what} is not supported"))
    }

    /// Statement submitted through a dead connection.
    pub(crate) fn lost_connection(kind: ErrorKind) -> Self {
        Self { kind, message: "08003:Lost connection".into(), code: Some("08003".into()) }
    }

    /// The peer stopped sending bytes mid-frame.
    pub(crate) fn recv_failed() -> Self {
        Self {
            kind: ErrorKind::Operational,
            message: "08003:Can't recv packets".into(),
            code: Some("08003".into()),
        }
    }

    /// Build a database error from a server `ErrorResponse`, classified by
    /// its SQLSTATE class.
    pub(crate) fn from_error_response(response: &ErrorResponse) -> Self {
        let code = response.code().map(|c| c.to_string()).unwrap_or_default();
        let message = response.message().map(|m| m.to_string()).unwrap_or_default();
        Self {
            kind: kind_for_sqlstate(&code),
            message: format!("{code}:{message}"),
            code: Some(code),
        }
    }

    /// The error class.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The error message; for server errors this is `"<SQLSTATE>:<message>"`.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The SQLSTATE code, when the error came from the server or the
    /// connection state machine.
    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

/// Map a SQLSTATE onto an error class.
///
/// <https://www.postgresql.org/docs/current/errcodes-appendix.html>
pub(crate) fn kind_for_sqlstate(code: &str) -> ErrorKind {
    let mut chars = code.chars();
    let (Some(c0), Some(c1)) = (chars.next(), chars.next()) else {
        return ErrorKind::Database;
    };
    match (c0, c1) {
        ('0', 'A') => ErrorKind::NotSupported,
        ('2', '0' | '1') | ('3', 'D' | 'F') | ('4', '0' | '2' | '4') => ErrorKind::Programming,
        ('2', '2') => ErrorKind::Data,
        ('2', '3') => ErrorKind::Integrity,
        ('2', '4' | '5' | 'B' | 'D' | 'F') | ('3', '8' | '9' | 'B') => ErrorKind::Internal,
        ('P' | 'X' | 'F', _) => ErrorKind::Internal,
        ('2', '6' | '7' | '8') | ('3', '4') => ErrorKind::Operational,
        ('5' | 'H', _) => ErrorKind::Operational,
        _ => ErrorKind::Database,
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

from!(<ParseError>e => Error::interface(e.to_string()));
from!(<ProtocolError>e => Error::interface(e.to_string()));
from!(<DecodeError>e => Error::new(ErrorKind::Data, e.to_string()));
from!(<Utf8Error>e => Error::new(ErrorKind::Data, e.to_string()));
from!(<BindError>e => Error::new(ErrorKind::Programming, e.to_string()));

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => Error::recv_failed(),
            _ => Error::lost_connection(ErrorKind::Operational),
        }
    }
}

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "Warning",
            Self::Interface => "InterfaceError",
            Self::Database => "DatabaseError",
            Self::Data => "DataError",
            Self::Operational => "OperationalError",
            Self::Integrity => "IntegrityError",
            Self::Internal => "InternalError",
            Self::Programming => "ProgrammingError",
            Self::NotSupported => "NotSupportedError",
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sqlstate_classes() {
        for (code, kind) in [
            ("0A000", ErrorKind::NotSupported),
            ("20000", ErrorKind::Programming),
            ("21000", ErrorKind::Programming),
            ("3D000", ErrorKind::Programming),
            ("3F000", ErrorKind::Programming),
            ("40001", ErrorKind::Programming),
            ("42601", ErrorKind::Programming),
            ("44000", ErrorKind::Programming),
            ("22012", ErrorKind::Data),
            ("23505", ErrorKind::Integrity),
            ("24000", ErrorKind::Internal),
            ("25P02", ErrorKind::Internal),
            ("2BP01", ErrorKind::Internal),
            ("2D000", ErrorKind::Internal),
            ("2F002", ErrorKind::Internal),
            ("38000", ErrorKind::Internal),
            ("39001", ErrorKind::Internal),
            ("3B001", ErrorKind::Internal),
            ("P0001", ErrorKind::Internal),
            ("XX000", ErrorKind::Internal),
            ("F0000", ErrorKind::Internal),
            ("26000", ErrorKind::Operational),
            ("27000", ErrorKind::Operational),
            ("28P01", ErrorKind::Operational),
            ("34000", ErrorKind::Operational),
            ("53200", ErrorKind::Operational),
            ("57014", ErrorKind::Operational),
            ("HV000", ErrorKind::Operational),
            ("08006", ErrorKind::Database),
            ("", ErrorKind::Database),
        ] {
            assert_eq!(kind_for_sqlstate(code), kind, "sqlstate {code:?}");
        }
    }

    #[test]
    fn error_response_message_format() {
        use crate::postgres::backend::ErrorResponse;
        use bytes::Bytes;

        let response = ErrorResponse {
            body: Bytes::from_static(b"SERROR\0C42601\0Msyntax error at or near \"BAD\"\0\0"),
        };
        let err = Error::from_error_response(&response);
        assert_eq!(err.kind(), ErrorKind::Programming);
        assert_eq!(err.message(), "42601:syntax error at or near \"BAD\"");
        assert_eq!(err.code(), Some("42601"));
    }

    #[test]
    fn lost_connection_carries_sqlstate() {
        let err = Error::lost_connection(ErrorKind::Operational);
        assert_eq!(err.code(), Some("08003"));
        assert_eq!(err.message(), "08003:Lost connection");
    }
}
