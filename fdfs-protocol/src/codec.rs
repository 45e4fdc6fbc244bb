//! Big-endian integer helpers and fixed-width field codecs.

use bytes::BufMut;
use md5::{Digest, Md5};

/// Packs an i64 into 8 big-endian bytes.
pub fn long2buff(n: i64) -> [u8; 8] {
    n.to_be_bytes()
}

/// Reads a big-endian i64 at `offset`.
///
/// Panics if fewer than 8 bytes are available; callers validate lengths first.
pub fn buff2long(bs: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bs[offset..offset + 8]);
    i64::from_be_bytes(raw)
}

/// Reads a big-endian i32 at `offset`.
pub fn buff2int32(bs: &[u8], offset: usize) -> i32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bs[offset..offset + 4]);
    i32::from_be_bytes(raw)
}

/// Renders four bytes at `offset` as a dotted IPv4 address.
///
/// Returns an empty string when the first or last octet is zero, which the
/// storage server uses to mean "no address recorded".
pub fn get_ip_address(bs: &[u8], offset: usize) -> String {
    let octets = &bs[offset..offset + 4];
    if octets[0] == 0 || octets[3] == 0 {
        return String::new();
    }
    format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}

/// Writes `value` into a zero-padded field of exactly `width` bytes,
/// truncating longer input.
pub fn put_fixed(buf: &mut impl BufMut, value: &[u8], width: usize) {
    let n = value.len().min(width);
    buf.put_slice(&value[..n]);
    buf.put_bytes(0, width - n);
}

/// Strips NUL padding and surrounding whitespace from a decoded field.
pub fn trim_field(s: &str) -> &str {
    s.trim_matches(|c: char| c == '\0' || c.is_whitespace())
}

/// Decodes a fixed-width byte field as trimmed text.
pub fn field_str(bs: &[u8]) -> String {
    trim_field(&String::from_utf8_lossy(bs)).to_string()
}

/// Lowercase hex MD5 digest.
pub fn md5_hex(source: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(source);
    hex::encode(hasher.finalize())
}

/// HTTP anti-steal token for a remote filename.
///
/// The digest input is the filename, then the secret key, then the decimal
/// timestamp, each already in the configured charset.
pub fn get_token(remote_filename: &[u8], ts: i64, secret_key: &[u8]) -> String {
    let ts = ts.to_string();
    let mut buf = Vec::with_capacity(remote_filename.len() + secret_key.len() + ts.len());
    buf.extend_from_slice(remote_filename);
    buf.extend_from_slice(secret_key);
    buf.extend_from_slice(ts.as_bytes());
    md5_hex(&buf)
}
