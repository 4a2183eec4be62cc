//! Postgres Backend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::{Buf, Bytes};

use super::ProtocolError;
use crate::common::ByteStr;

/// A type that can be decoded into postgres backend message.
pub trait BackendProtocol: Sized {
    /// Try decode given bytes into message.
    ///
    /// Note that `body` is only the main body, **excluding** message type and length.
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages.
pub enum BackendMessage {
    /// Identifies the message as an authentication request.
    Authentication(Authentication),
    /// Identifies the message as cancellation key data.
    BackendKeyData(BackendKeyData),
    /// Identifies the message as a command-completed response.
    CommandComplete(CommandComplete),
    /// Identifies the message as COPY data.
    CopyData(CopyData),
    /// Identifies the message as a COPY-complete indicator.
    CopyDone(CopyDone),
    /// Identifies the message as a Start Copy In response.
    CopyInResponse(CopyInResponse),
    /// Identifies the message as a Start Copy Out response.
    CopyOutResponse(CopyOutResponse),
    /// Identifies the message as a data row.
    DataRow(DataRow),
    /// Identifies the message as a response to an empty query string.
    EmptyQueryResponse(EmptyQueryResponse),
    /// Identifies the message as an error.
    ErrorResponse(ErrorResponse),
    /// Identifies the message as a notice.
    NoticeResponse(NoticeResponse),
    /// Identifies the message as a run-time parameter status report.
    ParameterStatus(ParameterStatus),
    /// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
    ReadyForQuery(ReadyForQuery),
    /// Identifies the message as a row description.
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            /// Returns the message type.
            pub const fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub const fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    CommandComplete,
    CopyData,
    CopyDone,
    CopyInResponse,
    CopyOutResponse,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NoticeResponse,
    ParameterStatus,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected(Self::MSGTYPE,$typ))
        }
    };
}

macro_rules! msgtype {
    ($me:ident,$ty:literal) => {
        impl $me {
            #[doc = concat!("`",stringify!($ty),"`")]
            pub const MSGTYPE: u8 = $ty;
        }
    };
}

/// Identifies the message as an authentication request.
///
/// The first four bytes of the body select the method; the rest is
/// method-specific data.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that an MD5-encrypted password is required.
    MD5Password {
        /// The salt to use when encrypting the password.
        salt: [u8;4],
    },
    /// Specifies that SASL authentication is required.
    Sasl {
        /// The message body is a list of SASL authentication mechanisms,
        /// in the server's order of preference.
        ///
        /// A zero byte is required as terminator after the last authentication mechanism name.
        mechanisms: Bytes,
    },
    /// Specifies that this message contains a SASL challenge.
    SaslContinue {
        /// SASL data, specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Specifies that SASL authentication has completed.
    SaslFinal {
        /// SASL outcome "additional data", specific to the SASL mechanism being used.
        data: Bytes,
    },
    /// Any method this driver does not speak (kerberos, GSSAPI, SSPI, ...).
    Unsupported(u32),
}

msgtype!(Authentication, b'R');

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 4 {
            return Err(ProtocolError::malformed("Authentication"));
        }
        let auth = match body.get_u32() {
            0 => Self::Ok,
            5 => {
                if body.remaining() < 4 {
                    return Err(ProtocolError::malformed("Authentication"));
                }
                Self::MD5Password { salt: body.get_u32().to_be_bytes() }
            },
            10 => Self::Sasl { mechanisms: body },
            11 => Self::SaslContinue { data: body },
            12 => Self::SaslFinal { data: body },
            method => Self::Unsupported(method),
        };
        Ok(auth)
    }
}

impl Authentication {
    /// Returns `true` if the SASL mechanism list contains `mechanism`.
    pub fn offers_mechanism(mechanisms: &Bytes, mechanism: &str) -> bool {
        mechanisms
            .split(|b| matches!(b, b'\0'))
            .any(|m| m == mechanism.as_bytes())
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: u32,
    /// The secret key of this backend.
    pub secret_key: u32,
}

msgtype!(BackendKeyData, b'K');

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 8 {
            return Err(ProtocolError::malformed("BackendKeyData"));
        }
        Ok(Self {
            process_id: body.get_u32(),
            secret_key: body.get_u32(),
        })
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported.
    pub name: ByteStr,
    /// The current value of the parameter.
    pub value: ByteStr,
}

msgtype!(ParameterStatus, b'S');

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        let err = || ProtocolError::malformed("ParameterStatus");
        Ok(Self {
            name: ByteStr::read_nul(&mut body).ok_or_else(err)?,
            value: ByteStr::read_nul(&mut body).ok_or_else(err)?,
        })
    }
}

/// Identifies the message as a notice.
pub struct NoticeResponse {
    /// Raw message body, in the same field-tagged format as [`ErrorResponse`].
    pub body: Bytes,
}

msgtype!(NoticeResponse, b'N');

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

impl NoticeResponse {
    /// The human-readable primary message, if present.
    pub fn message(&self) -> Option<ByteStr> {
        fields(&self.body)
            .find(|(tag, _)| matches!(tag, b'M'))
            .map(|(_, value)| value)
    }
}

/// Identifies the message as an error.
///
/// The message body consists of one or more identified fields, followed by
/// a zero byte as a terminator. Fields can appear in any order.
///
/// For each field there is a `Byte1` code identifying the field type, then
/// the NUL-terminated field value. Field codes are listed in
/// [Section 53.8](https://www.postgresql.org/docs/current/protocol-error-fields.html);
/// unrecognized codes are silently ignored.
pub struct ErrorResponse {
    /// Raw message body.
    pub body: Bytes,
}

msgtype!(ErrorResponse, b'E');

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

impl ErrorResponse {
    /// Iterate the `(code, value)` field pairs.
    pub fn fields(&self) -> impl Iterator<Item = (u8, ByteStr)> + '_ {
        fields(&self.body)
    }

    /// The SQLSTATE code for the error (field `C`). Always present.
    pub fn code(&self) -> Option<ByteStr> {
        self.fields().find(|(tag, _)| matches!(tag, b'C')).map(|(_, v)| v)
    }

    /// The primary human-readable error message (field `M`). Always present.
    pub fn message(&self) -> Option<ByteStr> {
        self.fields().find(|(tag, _)| matches!(tag, b'M')).map(|(_, v)| v)
    }

    /// The severity (field `S`): `ERROR`, `FATAL`, or `PANIC`.
    pub fn severity(&self) -> Option<ByteStr> {
        self.fields().find(|(tag, _)| matches!(tag, b'S')).map(|(_, v)| v)
    }
}

/// Parse field-tagged NUL-separated records, stopping at the zero terminator.
fn fields(body: &Bytes) -> impl Iterator<Item = (u8, ByteStr)> + '_ {
    let mut body = body.clone();
    std::iter::from_fn(move || {
        if body.remaining() < 2 {
            return None;
        }
        let tag = body.get_u8();
        if tag == 0 {
            return None;
        }
        Some((tag, ByteStr::read_nul(&mut body)?))
    })
}

/// Identifies the message as a row description.
pub struct RowDescription {
    /// Raw message body.
    ///
    /// - `Int16` Specifies the number of fields in a row (can be zero).
    ///
    /// For each field, there is the following:
    ///
    /// - `String` The field name.
    /// - `Int32` If the field can be identified as a column of a specific table,
    ///   the object ID of the table; otherwise zero.
    /// - `Int16` If the field can be identified as a column of a specific table,
    ///   the attribute number of the column; otherwise zero.
    /// - `Int32` The object ID of the field's data type.
    /// - `Int16` The data type size (see pg_type.typlen). Note that negative values denote variable-width types.
    /// - `Int32` The type modifier (see pg_attribute.atttypmod). The meaning of the modifier is type-specific.
    /// - `Int16` The format code being used for the field. Currently will be zero (text) or one (binary).
    pub body: Bytes,
}

msgtype!(RowDescription, b'T');

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as a data row.
pub struct DataRow {
    /// Raw row buffer.
    ///
    /// - `Int16` The number of column values that follow (possibly zero).
    ///
    /// Next, the following pair of fields appear for each column:
    ///
    /// - `Int32` The length of the column value, in bytes (this count does not include itself).
    ///
    /// Can be zero. As a special case, -1 indicates a NULL column value. No value bytes follow in the NULL case.
    ///
    /// - `Byte[n]` The value of the column, in the format indicated by the associated format code.
    pub body: Bytes,
}

msgtype!(DataRow, b'D');

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as a command-completed response.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    ///
    /// For `SELECT`, `UPDATE`, `DELETE`, and `INSERT` the tag ends with the
    /// number of rows retrieved or affected.
    pub tag: ByteStr,
}

msgtype!(CommandComplete, b'C');

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self {
            tag: ByteStr::read_nul(&mut body).ok_or_else(|| ProtocolError::malformed("CommandComplete"))?,
        })
    }
}

impl CommandComplete {
    /// The row count carried by the tag.
    ///
    /// `SELECT`/`UPDATE`/`DELETE`/`INSERT` report the final whitespace-separated
    /// integer; `SHOW` counts as a single row; anything else carries none.
    pub fn rows(&self) -> Option<i64> {
        let tag = self.tag.as_str();
        if tag == "SHOW" {
            return Some(1);
        }
        for command in ["SELECT", "UPDATE", "DELETE", "INSERT"] {
            if tag.starts_with(command) {
                return tag.rsplit(' ').next()?.parse().ok();
            }
        }
        None
    }
}

/// Identifies the message as COPY data.
pub struct CopyData {
    /// Data that forms part of a COPY data stream.
    pub data: Bytes,
}

msgtype!(CopyData, b'd');

impl BackendProtocol for CopyData {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { data: body })
    }
}

/// Identifies the message as a Start Copy In response.
///
/// The frontend must now send copy-in data, ending with `CopyDone`.
pub struct CopyInResponse {
    /// Overall format plus per-column format codes; this driver always
    /// streams the caller's bytes through untouched.
    pub body: Bytes,
}

msgtype!(CopyInResponse, b'G');

impl BackendProtocol for CopyInResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message as a Start Copy Out response.
pub struct CopyOutResponse {
    /// Overall format plus per-column format codes.
    pub body: Bytes,
}

msgtype!(CopyOutResponse, b'H');

impl BackendProtocol for CopyOutResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self { body })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
pub struct ReadyForQuery {
    /// Current backend transaction status indicator.
    ///
    /// Possible values are 'I' if idle (not in a transaction block);
    /// 'T' if in a transaction block;
    /// or 'E' if in a failed transaction block (queries will be rejected until block is ended).
    pub tx_status: u8
}

msgtype!(ReadyForQuery, b'Z');

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self,ProtocolError> {
        assert_msgtype!(msgtype);
        if body.remaining() < 1 {
            return Err(ProtocolError::malformed("ReadyForQuery"));
        }
        Ok(Self { tx_status: body.get_u8() })
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            msgtype!($name, $ty);

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, _: Bytes) -> Result<Self,ProtocolError> {
                    if $name::MSGTYPE != msgtype {
                        return Err(ProtocolError::unexpected(Self::MSGTYPE,msgtype))
                    }
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a COPY-complete indicator.
    struct CopyDone, b'c';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';
}

// CUSTOM DEBUG

impl std::fmt::Debug for BackendMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(Self::message_name(self.msgtype()))
    }
}

impl std::fmt::Debug for BackendKeyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendKeyData")
            .field("process_id", &self.process_id)
            .field("secret_key", &"<REDACTED>")
            .finish()
    }
}

impl std::fmt::Debug for ReadyForQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadyForQuery")
            .field("tx_status", &match self.tx_status {
                b'I' => "Idle(I)",
                b'T' => "Transaction(T)",
                b'E' => "FailedTx(E)",
                _ => "unknown",
            })
            .finish()
    }
}

impl std::fmt::Debug for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("ErrorResponse");
        for (tag, value) in self.fields() {
            match tag {
                b'S' => { dbg.field("severity", &value); },
                b'C' => { dbg.field("code", &value); },
                b'M' => { dbg.field("message", &value); },
                _ => { }
            }
        }
        dbg.finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn error_body() -> Bytes {
        Bytes::from_static(b"SERROR\0C42601\0Msyntax error at or near \"BAD\"\0\0")
    }

    #[test]
    fn error_response_fields_by_tag() {
        let err = ErrorResponse { body: error_body() };
        assert_eq!(err.severity().unwrap(), "ERROR");
        assert_eq!(err.code().unwrap(), "42601");
        assert_eq!(err.message().unwrap(), "syntax error at or near \"BAD\"");
    }

    #[test]
    fn error_response_field_order_does_not_matter() {
        let err = ErrorResponse {
            body: Bytes::from_static(b"Mrelation does not exist\0C42P01\0SERROR\0\0"),
        };
        assert_eq!(err.code().unwrap(), "42P01");
        assert_eq!(err.message().unwrap(), "relation does not exist");
    }

    #[test]
    fn command_complete_rowcounts() {
        for (tag, rows) in [
            ("SELECT 3", Some(3)),
            ("INSERT 0 1", Some(1)),
            ("UPDATE 42", Some(42)),
            ("DELETE 0", Some(0)),
            ("SHOW", Some(1)),
            ("BEGIN", None),
            ("CREATE TABLE", None),
        ] {
            let c = CommandComplete { tag: ByteStr::from_static(tag) };
            assert_eq!(c.rows(), rows, "tag {tag:?}");
        }
    }

    #[test]
    fn authentication_selectors() {
        let ok = Authentication::decode(b'R', Bytes::from_static(&[0,0,0,0])).unwrap();
        assert!(matches!(ok, Authentication::Ok));

        let md5 = Authentication::decode(b'R', Bytes::from_static(&[0,0,0,5, 1,2,3,4])).unwrap();
        assert!(matches!(md5, Authentication::MD5Password { salt: [1,2,3,4] }));

        let kerberos = Authentication::decode(b'R', Bytes::from_static(&[0,0,0,2])).unwrap();
        assert!(matches!(kerberos, Authentication::Unsupported(2)));
    }

    #[test]
    fn sasl_mechanism_list() {
        let mechanisms = Bytes::from_static(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        assert!(Authentication::offers_mechanism(&mechanisms, "SCRAM-SHA-256"));
        assert!(Authentication::offers_mechanism(&mechanisms, "SCRAM-SHA-256-PLUS"));
        assert!(!Authentication::offers_mechanism(&mechanisms, "PLAIN"));
    }

    #[test]
    fn ready_for_query_status() {
        let r = ReadyForQuery::decode(b'Z', Bytes::from_static(b"T")).unwrap();
        assert_eq!(r.tx_status, b'T');
    }

    #[test]
    fn unknown_message_type() {
        assert!(BackendMessage::decode(b'@', Bytes::new()).is_err());
    }
}
