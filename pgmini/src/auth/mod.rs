//! Authentication primitives.
//!
//! The method selection itself lives in the connection message loop; this
//! module only computes the responses.
use md5::{Digest, Md5};

pub(crate) mod scram;

/// Computes the MD5 password response used in postgres authentication.
///
/// The response is `"md5" || hex(md5(hex(md5(password || user)) || salt))`,
/// sent as the payload of a `PasswordMessage`.
pub fn md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    let mut hasher = Md5::new();
    hasher.update(password.as_bytes());
    hasher.update(user.as_bytes());
    let inner = to_hex(&hasher.finalize());

    let mut hasher = Md5::new();
    hasher.update(inner.as_bytes());
    hasher.update(salt);

    format!("md5{}", to_hex(&hasher.finalize()))
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}
