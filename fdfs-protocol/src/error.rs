//! Protocol error types and errno values.

use thiserror::Error;

/// Protocol-level errors raised while framing requests or decoding responses.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unexpected response command: expected {expected}, got {actual}")]
    CommandMismatch { expected: u8, actual: u8 },

    #[error("body length mismatch: expected {expected} bytes, got {actual}")]
    BodyLengthMismatch { expected: i64, actual: i64 },

    #[error("negative body length: {0}")]
    NegativeLength(i64),

    #[error("short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("record buffer of {len} bytes is not a multiple of {width}")]
    InvalidRecordLength { len: usize, width: usize },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns the errno a server would report for the same failure.
    pub fn errno(&self) -> u8 {
        match self {
            ProtocolError::InvalidArgument(_) | ProtocolError::UnsupportedCharset(_) => {
                errno::EINVAL
            }
            _ => errno::EIO,
        }
    }
}

/// Errno-style status bytes used in response headers.
pub mod errno {
    pub const ENOENT: u8 = 2;
    pub const EIO: u8 = 5;
    pub const EBUSY: u8 = 16;
    pub const EINVAL: u8 = 22;
    pub const ENOSPC: u8 = 28;
    pub const ECONNREFUSED: u8 = 61;
    pub const EALREADY: u8 = 114;

    /// Short description of a status byte.
    pub fn describe(code: u8) -> &'static str {
        match code {
            0 => "success",
            ENOENT => "no such file or directory",
            EIO => "I/O error",
            EBUSY => "device or resource busy",
            EINVAL => "invalid argument",
            ENOSPC => "no space left on device",
            ECONNREFUSED => "connection refused",
            EALREADY => "operation already in progress",
            _ => "unknown error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(
            ProtocolError::InvalidArgument("x".into()).errno(),
            errno::EINVAL
        );
        assert_eq!(ProtocolError::NegativeLength(-1).errno(), errno::EIO);
        assert_eq!(
            ProtocolError::ShortRead {
                expected: 4,
                actual: 1
            }
            .errno(),
            errno::EIO
        );
    }

    #[test]
    fn test_errno_describe() {
        assert_eq!(errno::describe(errno::ENOENT), "no such file or directory");
        assert_eq!(errno::describe(errno::EBUSY), "device or resource busy");
        assert_eq!(errno::describe(200), "unknown error");
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::CommandMismatch {
            expected: 100,
            actual: 11,
        };
        assert_eq!(
            err.to_string(),
            "unexpected response command: expected 100, got 11"
        );
    }
}
