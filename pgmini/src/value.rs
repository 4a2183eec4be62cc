//! Decoded column values and the per-oid text decoder.
//!
//! The simple query protocol always carries values in their text
//! representation; [`decode_column`] turns that text into a [`Value`] keyed
//! by the column's type oid.
use bytes::Bytes;
use std::fmt;

use crate::postgres::{Oid, oid};

/// A single decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL `NULL`.
    Null,
    Bool(bool),
    /// `int2`, `int4`, `int8` and `oid` all widen to `i64`.
    Int(i64),
    /// `float4` and `float8`.
    Float(f64),
    /// `bytea`.
    Bytes(Vec<u8>),
    /// Every textual type, plus any oid the decoder does not know.
    Text(String),
    /// `int2[]`, `int4[]`, `float4[]`, `name[]`, `text[]` and `int2vector`.
    Array(Vec<Value>),
    /// `point`.
    Point { x: f64, y: f64 },
    /// `circle`.
    Circle { x: f64, y: f64, radius: f64 },
}

impl Value {
    /// Returns `true` for [`Value::Null`].
    pub const fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow the inner text, if this is a textual value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The inner integer, if this is an integer value.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Value {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

from!(<bool>b => Value::Bool(b));
from!(<i16>i => Value::Int(i.into()));
from!(<i32>i => Value::Int(i.into()));
from!(<i64>i => Value::Int(i));
from!(<f32>f => Value::Float(f.into()));
from!(<f64>f => Value::Float(f));
from!(<&str>s => Value::Text(s.into()));
from!(<String>s => Value::Text(s));
from!(<&[u8]>b => Value::Bytes(b.into()));
from!(<Vec<u8>>b => Value::Bytes(b));

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => Value::Null,
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Value::Array(value.into_iter().map(Into::into).collect())
    }
}

/// An error when decoding a column value.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("column is not valid {encoding} text")]
    Encoding { encoding: String },
    #[error("malformed {1} value {0:?}")]
    Malformed(String, &'static str),
}

impl DecodeError {
    fn malformed(data: &str, what: &'static str) -> Self {
        Self::Malformed(data.into(), what)
    }
}

/// Decode a single column from its server text representation.
///
/// `None` (a `0xFFFFFFFF` length prefix on the wire) decodes to
/// [`Value::Null`]. Unknown oids pass the text through unchanged.
pub fn decode_column(data: Option<&Bytes>, type_oid: Oid, encoding: &str) -> Result<Value, DecodeError> {
    let Some(data) = data else {
        return Ok(Value::Null);
    };

    // Postgres clients negotiate the session encoding at startup; this
    // driver only ever runs UTF-8 (and its ASCII subset) sessions.
    let text = std::str::from_utf8(data)
        .map_err(|_| DecodeError::Encoding { encoding: encoding.into() })?;

    let value = match type_oid {
        oid::BOOL => Value::Bool(text == "t"),
        oid::INT2 | oid::INT4 | oid::INT8 | oid::OID => Value::Int(parse_int(text)?),
        oid::FLOAT4 | oid::FLOAT8 => Value::Float(parse_float(text)?),
        oid::BYTEA => Value::Bytes(parse_bytea(text)?),
        oid::INT2_ARRAY | oid::INT4_ARRAY => {
            Value::Array(parse_array(text)?.map(|s| parse_int(s).map(Value::Int)).collect::<Result<_,_>>()?)
        }
        oid::FLOAT4_ARRAY => {
            Value::Array(parse_array(text)?.map(|s| parse_float(s).map(Value::Float)).collect::<Result<_,_>>()?)
        }
        oid::NAME_ARRAY | oid::TEXT_ARRAY => {
            Value::Array(parse_array(text)?.map(|s| Value::Text(s.into())).collect())
        }
        oid::INT2VECTOR => {
            Value::Array(text.split_whitespace().map(|s| parse_int(s).map(Value::Int)).collect::<Result<_,_>>()?)
        }
        oid::POINT => {
            let (x, y) = parse_point(text)?;
            Value::Point { x, y }
        }
        oid::CIRCLE => parse_circle(text)?,
        // Remaining geometry comes back as raw text for the caller to parse.
        //
        // The same goes for every textual type and for any oid this driver
        // does not know about.
        _ => Value::Text(text.into()),
    };
    Ok(value)
}

fn parse_int(text: &str) -> Result<i64, DecodeError> {
    text.parse().map_err(|_| DecodeError::malformed(text, "integer"))
}

fn parse_float(text: &str) -> Result<f64, DecodeError> {
    text.parse().map_err(|_| DecodeError::malformed(text, "float"))
}

/// `bytea` output is `\x` followed by an even run of hex digits.
fn parse_bytea(text: &str) -> Result<Vec<u8>, DecodeError> {
    let hex = text
        .strip_prefix("\\x")
        .ok_or_else(|| DecodeError::malformed(text, "bytea"))?;
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(DecodeError::malformed(text, "bytea"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| DecodeError::malformed(text, "bytea"))
        })
        .collect()
}

/// Strip the outer braces and split on `,`; `{}` is the empty array.
fn parse_array(text: &str) -> Result<impl Iterator<Item = &str>, DecodeError> {
    let inner = text
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or_else(|| DecodeError::malformed(text, "array"))?;
    Ok(inner.split(',').filter(|s| !s.is_empty()))
}

/// `(x,y)`
fn parse_point(text: &str) -> Result<(f64, f64), DecodeError> {
    let err = || DecodeError::malformed(text, "point");
    let inner = text
        .strip_prefix('(')
        .and_then(|t| t.strip_suffix(')'))
        .ok_or_else(err)?;
    let (x, y) = inner.split_once(',').ok_or_else(err)?;
    Ok((
        x.parse().map_err(|_| err())?,
        y.parse().map_err(|_| err())?,
    ))
}

/// `<(x,y),r>`
fn parse_circle(text: &str) -> Result<Value, DecodeError> {
    let err = || DecodeError::malformed(text, "circle");
    let inner = text
        .strip_prefix('<')
        .and_then(|t| t.strip_suffix('>'))
        .ok_or_else(err)?;
    let close = inner.find(')').ok_or_else(err)?;
    let (x, y) = parse_point(&inner[..=close]).map_err(|_| err())?;
    let radius = inner[close + 1..]
        .strip_prefix(',')
        .ok_or_else(err)?
        .parse()
        .map_err(|_| err())?;
    Ok(Value::Circle { x, y, radius })
}

impl fmt::Display for Value {
    /// The postgres text representation, used by the fallback escaper.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("NULL"),
            Value::Bool(b) => f.write_str(if *b { "t" } else { "f" }),
            Value::Int(i) => f.write_str(itoa::Buffer::new().format(*i)),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => {
                f.write_str("\\x")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
            Value::Array(items) => {
                f.write_str("{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    fmt::Display::fmt(item, f)?;
                }
                f.write_str("}")
            }
            Value::Point { x, y } => write!(f, "({x},{y})"),
            Value::Circle { x, y, radius } => write!(f, "<({x},{y}),{radius}>"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn decode(text: &str, type_oid: Oid) -> Value {
        let data = Bytes::copy_from_slice(text.as_bytes());
        decode_column(Some(&data), type_oid, "UTF8").unwrap()
    }

    #[test]
    fn null_marker() {
        assert_eq!(decode_column(None, oid::INT4, "UTF8").unwrap(), Value::Null);
    }

    #[test]
    fn scalars() {
        assert_eq!(decode("t", oid::BOOL), Value::Bool(true));
        assert_eq!(decode("f", oid::BOOL), Value::Bool(false));
        assert_eq!(decode("1", oid::INT8), Value::Int(1));
        assert_eq!(decode("-32768", oid::INT2), Value::Int(-32768));
        assert_eq!(decode("24577", oid::OID), Value::Int(24577));
        assert_eq!(decode("1.5", oid::FLOAT8), Value::Float(1.5));
        assert_eq!(decode("-0.25", oid::FLOAT4), Value::Float(-0.25));
    }

    #[test]
    fn bytea_hex() {
        assert_eq!(decode("\\x0102", oid::BYTEA), Value::Bytes(vec![1, 2]));
        assert_eq!(decode("\\x", oid::BYTEA), Value::Bytes(vec![]));

        let data = Bytes::from_static(b"0102");
        assert!(decode_column(Some(&data), oid::BYTEA, "UTF8").is_err());
        let odd = Bytes::from_static(b"\\x010");
        assert!(decode_column(Some(&odd), oid::BYTEA, "UTF8").is_err());
    }

    #[test]
    fn textual_types() {
        for ty in [oid::CHAR, oid::TEXT, oid::BPCHAR, oid::VARCHAR, oid::NAME, oid::JSON, oid::JSONB, oid::XML] {
            assert_eq!(decode("hello", ty), Value::Text("hello".into()));
        }
    }

    #[test]
    fn arrays() {
        assert_eq!(
            decode("{1,2,3}", oid::INT4_ARRAY),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
        assert_eq!(decode("{}", oid::INT2_ARRAY), Value::Array(vec![]));
        assert_eq!(
            decode("{0.5,1.25}", oid::FLOAT4_ARRAY),
            Value::Array(vec![Value::Float(0.5), Value::Float(1.25)]),
        );
        assert_eq!(
            decode("{alice,bob}", oid::NAME_ARRAY),
            Value::Array(vec![Value::Text("alice".into()), Value::Text("bob".into())]),
        );
        assert_eq!(
            decode("1 2 3", oid::INT2VECTOR),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
    }

    #[test]
    fn geometry() {
        assert_eq!(decode("(1.5,-2)", oid::POINT), Value::Point { x: 1.5, y: -2.0 });
        assert_eq!(
            decode("<(0,0),5>", oid::CIRCLE),
            Value::Circle { x: 0.0, y: 0.0, radius: 5.0 },
        );
        // the rest of the geometry family passes through as text
        for ty in [oid::LSEG, oid::PATH, oid::BOX, oid::POLYGON, oid::LINE] {
            assert_eq!(decode("((1,2),(3,4))", ty), Value::Text("((1,2),(3,4))".into()));
        }
    }

    #[test]
    fn unknown_oid_passes_through() {
        assert_eq!(decode("08:00:2b:01:02:03", 829), Value::Text("08:00:2b:01:02:03".into()));
    }

    #[test]
    fn text_round_trip() {
        for (text, ty) in [("t", oid::BOOL), ("42", oid::INT4), ("1.5", oid::FLOAT8), ("abc", oid::TEXT)] {
            assert_eq!(decode(text, ty).to_string(), text);
        }
    }
}
