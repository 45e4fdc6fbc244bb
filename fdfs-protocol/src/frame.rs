//! Packet framing for the FastDFS protocol.
//!
//! Every request and response starts with a fixed 10-byte header:
//!
//! ```text
//! +---------------------------+---------+--------+
//! | body length (big-endian)  | command | status |
//! |         8 bytes           | 1 byte  | 1 byte |
//! +---------------------------+---------+--------+
//! | body                                         |
//! | body length bytes                            |
//! +----------------------------------------------+
//! ```
//!
//! A non-zero status in a response carries an errno and no body follows.

use crate::error::ProtocolError;
use crate::PKG_LEN_SIZE;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the fixed header in bytes (8 + 1 + 1 = 10).
pub const HEADER_SIZE: usize = PKG_LEN_SIZE + 2;

const CMD_INDEX: usize = PKG_LEN_SIZE;
const STATUS_INDEX: usize = PKG_LEN_SIZE + 1;

/// A parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Declared body length.
    pub pkg_len: i64,
    /// Command byte.
    pub cmd: u8,
    /// Status byte, 0 on success.
    pub status: u8,
}

impl Header {
    pub fn new(cmd: u8, pkg_len: i64, status: u8) -> Self {
        Self {
            pkg_len,
            cmd,
            status,
        }
    }

    /// Encodes the header. Negative body lengths are rejected.
    pub fn encode(&self) -> Result<[u8; HEADER_SIZE], ProtocolError> {
        if self.pkg_len < 0 {
            return Err(ProtocolError::NegativeLength(self.pkg_len));
        }

        let mut buf = [0u8; HEADER_SIZE];
        buf[..PKG_LEN_SIZE].copy_from_slice(&self.pkg_len.to_be_bytes());
        buf[CMD_INDEX] = self.cmd;
        buf[STATUS_INDEX] = self.status;
        Ok(buf)
    }

    /// Decodes a header from the front of `buf`.
    ///
    /// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are available.
    pub fn decode(buf: &[u8]) -> Result<Option<Self>, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Ok(None);
        }

        let mut len = [0u8; PKG_LEN_SIZE];
        len.copy_from_slice(&buf[..PKG_LEN_SIZE]);

        Ok(Some(Self {
            pkg_len: i64::from_be_bytes(len),
            cmd: buf[CMD_INDEX],
            status: buf[STATUS_INDEX],
        }))
    }
}

/// Packs a header for `cmd` announcing `pkg_len` body bytes.
pub fn pack_header(cmd: u8, pkg_len: i64, status: u8) -> Result<[u8; HEADER_SIZE], ProtocolError> {
    Header::new(cmd, pkg_len, status).encode()
}

/// Outcome of reading a response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    /// Server status; when non-zero no body was announced.
    pub errno: u8,
    /// Body length still to be read from the stream.
    pub body_len: u64,
}

/// A fully received response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecvPackage {
    pub errno: u8,
    pub body: Vec<u8>,
}

/// Fills `buf` from `reader`, tolerating partial reads.
pub async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(ProtocolError::ShortRead {
                expected: buf.len(),
                actual: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// Reads a response header.
///
/// `expected_len` of -1 accepts any body length; otherwise the declared
/// length must match exactly. A non-zero status short-circuits and the
/// length checks are skipped.
pub async fn recv_header<R>(
    reader: &mut R,
    expected_cmd: u8,
    expected_len: i64,
) -> Result<ResponseHeader, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = [0u8; HEADER_SIZE];
    read_full(reader, &mut buf).await?;

    let header = Header::decode(&buf)?.ok_or(ProtocolError::ShortRead {
        expected: HEADER_SIZE,
        actual: buf.len(),
    })?;
    tracing::trace!(
        "recv header: cmd={} status={} len={}",
        header.cmd,
        header.status,
        header.pkg_len
    );

    if header.cmd != expected_cmd {
        return Err(ProtocolError::CommandMismatch {
            expected: expected_cmd,
            actual: header.cmd,
        });
    }

    if header.status != 0 {
        return Ok(ResponseHeader {
            errno: header.status,
            body_len: 0,
        });
    }

    if header.pkg_len < 0 {
        return Err(ProtocolError::NegativeLength(header.pkg_len));
    }

    if expected_len >= 0 && header.pkg_len != expected_len {
        return Err(ProtocolError::BodyLengthMismatch {
            expected: expected_len,
            actual: header.pkg_len,
        });
    }

    Ok(ResponseHeader {
        errno: 0,
        body_len: header.pkg_len as u64,
    })
}

/// Reads a response header and its whole body.
pub async fn recv_package<R>(
    reader: &mut R,
    expected_cmd: u8,
    expected_len: i64,
) -> Result<RecvPackage, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let header = recv_header(reader, expected_cmd, expected_len).await?;
    if header.errno != 0 {
        return Ok(RecvPackage {
            errno: header.errno,
            body: Vec::new(),
        });
    }

    let len = usize::try_from(header.body_len).map_err(|_| {
        ProtocolError::InvalidResponse(format!("body of {} bytes too large", header.body_len))
    })?;
    let mut body = vec![0u8; len];
    read_full(reader, &mut body).await?;

    Ok(RecvPackage { errno: 0, body })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command;
    use proptest::prelude::*;

    fn response(len: i64, cmd: u8, status: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = pack_header(cmd, len, status).unwrap().to_vec();
        buf.extend_from_slice(body);
        buf
    }

    #[test]
    fn test_header_layout() {
        let buf = pack_header(command::storage::UPLOAD_FILE, 0x0102, 0).unwrap();
        assert_eq!(buf, [0, 0, 0, 0, 0, 0, 1, 2, 11, 0]);
    }

    #[test]
    fn test_negative_length_rejected() {
        let result = pack_header(command::QUIT, -1, 0);
        assert!(matches!(result, Err(ProtocolError::NegativeLength(-1))));
    }

    #[test]
    fn test_incomplete_header() {
        assert!(Header::decode(&[0, 0, 0]).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recv_package() {
        let bytes = response(5, command::RESP, 0, b"hello");
        let mut stream = tokio_test::io::Builder::new().read(&bytes).build();

        let pkg = recv_package(&mut stream, command::RESP, -1).await.unwrap();
        assert_eq!(pkg.errno, 0);
        assert_eq!(pkg.body, b"hello");
    }

    #[tokio::test]
    async fn test_recv_package_partial_reads() {
        let bytes = response(6, command::RESP, 0, b"abcdef");
        let mut stream = tokio_test::io::Builder::new()
            .read(&bytes[..4])
            .read(&bytes[4..12])
            .read(&bytes[12..])
            .build();

        let pkg = recv_package(&mut stream, command::RESP, 6).await.unwrap();
        assert_eq!(pkg.body, b"abcdef");
    }

    #[tokio::test]
    async fn test_command_mismatch() {
        let bytes = response(0, command::storage::UPLOAD_FILE, 0, b"");
        let mut stream = tokio_test::io::Builder::new().read(&bytes).build();

        let result = recv_header(&mut stream, command::RESP, 0).await;
        assert!(matches!(
            result,
            Err(ProtocolError::CommandMismatch {
                expected: 100,
                actual: 11
            })
        ));
    }

    #[tokio::test]
    async fn test_body_length_mismatch() {
        let bytes = response(3, command::RESP, 0, b"");
        let mut stream = tokio_test::io::Builder::new().read(&bytes).build();

        let result = recv_package(&mut stream, command::RESP, 0).await;
        assert!(matches!(
            result,
            Err(ProtocolError::BodyLengthMismatch {
                expected: 0,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_status_short_circuits_body() {
        // Declared length is ignored and nothing else is read.
        let bytes = response(40, command::RESP, 2, b"");
        let mut stream = tokio_test::io::Builder::new().read(&bytes).build();

        let pkg = recv_package(&mut stream, command::RESP, 40).await.unwrap();
        assert_eq!(pkg.errno, 2);
        assert!(pkg.body.is_empty());
    }

    #[tokio::test]
    async fn test_negative_declared_length() {
        let mut bytes = (-5i64).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[command::RESP, 0]);
        let mut stream = tokio_test::io::Builder::new().read(&bytes).build();

        let result = recv_header(&mut stream, command::RESP, -1).await;
        assert!(matches!(result, Err(ProtocolError::NegativeLength(-5))));
    }

    #[tokio::test]
    async fn test_short_read() {
        let bytes = response(10, command::RESP, 0, b"abc");
        let mut stream = tokio_test::io::Builder::new().read(&bytes).build();

        let result = recv_package(&mut stream, command::RESP, 10).await;
        assert!(matches!(
            result,
            Err(ProtocolError::ShortRead {
                expected: 10,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_header() {
        let mut stream = tokio_test::io::Builder::new().read(&[0, 0, 0]).build();
        let result = recv_header(&mut stream, command::RESP, 0).await;
        assert!(matches!(result, Err(ProtocolError::ShortRead { .. })));
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(len in 0i64..=(u32::MAX as i64) * 4, cmd: u8) {
            let bytes = pack_header(cmd, len, 0).unwrap();
            let header = tokio_test::block_on(async {
                let mut stream = &bytes[..];
                recv_header(&mut stream, cmd, len).await
            })
            .unwrap();
            prop_assert_eq!(header.errno, 0);
            prop_assert_eq!(header.body_len, len as u64);

            let decoded = Header::decode(&bytes).unwrap().unwrap();
            prop_assert_eq!(decoded, Header::new(cmd, len, 0));
        }

        #[test]
        fn prop_header_status_preserved(len in 0i64..1_000_000, cmd: u8, status: u8) {
            let bytes = pack_header(cmd, len, status).unwrap();
            let decoded = Header::decode(&bytes).unwrap().unwrap();
            prop_assert_eq!(decoded.pkg_len, len);
            prop_assert_eq!(decoded.cmd, cmd);
            prop_assert_eq!(decoded.status, status);
        }
    }
}
