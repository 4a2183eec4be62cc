use bytes::{Buf, Bytes};

/// A cheaply cloneable str slice of a backend frame.
///
/// Protocol strings arrive nul-terminated inside a frame body;
/// [`read_nul`][ByteStr::read_nul] splits them off without copying,
/// validating the bytes once at the split point.
#[derive(Clone, PartialEq, Eq)]
pub struct ByteStr {
    bytes: Bytes,
}

impl ByteStr {
    /// Split the next nul-terminated string off `buf`, consuming the
    /// terminator.
    ///
    /// Returns [`None`] when no terminator is present or the bytes are not
    /// valid UTF-8; the consumed bytes are not restored on failure.
    pub fn read_nul(buf: &mut Bytes) -> Option<ByteStr> {
        let end = buf.iter().position(|b| *b == 0)?;
        let bytes = buf.split_to(end);
        buf.advance(1); // nul
        std::str::from_utf8(&bytes).ok()?;
        Some(ByteStr { bytes })
    }

    /// A `ByteStr` pointing directly at a static str. No allocation or
    /// copying.
    pub const fn from_static(string: &'static str) -> ByteStr {
        ByteStr { bytes: Bytes::from_static(string.as_bytes()) }
    }

    /// Returns the internal str.
    pub fn as_str(&self) -> &str {
        // SAFETY: validated on construction and immutable since
        unsafe { std::str::from_utf8_unchecked(&self.bytes) }
    }
}

impl std::ops::Deref for ByteStr {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_str()
    }
}

impl PartialEq<str> for ByteStr {
    fn eq(&self, other: &str) -> bool {
        str::eq(self.as_str(), other)
    }
}

impl PartialEq<&str> for ByteStr {
    fn eq(&self, other: &&str) -> bool {
        str::eq(self.as_str(), *other)
    }
}

impl std::fmt::Display for ByteStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for ByteStr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self.as_str(), f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_nul_splits_off_strings() {
        let mut buf = Bytes::from_static(b"server_encoding\0UTF8\0rest");
        assert_eq!(ByteStr::read_nul(&mut buf).unwrap(), "server_encoding");
        assert_eq!(ByteStr::read_nul(&mut buf).unwrap(), "UTF8");
        // no terminator left
        assert_eq!(ByteStr::read_nul(&mut buf), None);
        assert_eq!(&buf[..], b"rest");
    }

    #[test]
    fn read_nul_rejects_invalid_utf8() {
        let mut buf = Bytes::from_static(b"\xff\xfe\0");
        assert!(ByteStr::read_nul(&mut buf).is_none());
    }

    #[test]
    fn empty_string_is_valid() {
        let mut buf = Bytes::from_static(b"\0");
        assert_eq!(ByteStr::read_nul(&mut buf).unwrap(), "");
        assert!(buf.is_empty());
    }
}
