//! Client error types.

use crate::config::ConfigError;
use fdfs_protocol::{errno, ProtocolError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("request timeout")]
    Timeout,

    #[error("server error: errno {errno} ({})", fdfs_protocol::errno::describe(*.errno))]
    Server { errno: u8 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no tracker server available")]
    NoTrackerAvailable,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transfer aborted: {0}")]
    Callback(String),
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::NoTrackerAvailable
        )
    }

    /// Errno byte describing this error.
    pub fn errno(&self) -> u8 {
        match self {
            ClientError::Server { errno } => *errno,
            ClientError::InvalidArgument(_) => errno::EINVAL,
            ClientError::NoTrackerAvailable => errno::ECONNREFUSED,
            ClientError::Protocol(e) => e.errno(),
            _ => errno::EIO,
        }
    }

    /// True if the server reported that the file or node does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::Server { errno } if *errno == errno::ENOENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ClientError::Server { errno: 2 }.errno(), errno::ENOENT);
        assert_eq!(
            ClientError::InvalidArgument("empty".into()).errno(),
            errno::EINVAL
        );
        assert_eq!(ClientError::Timeout.errno(), errno::EIO);
        assert_eq!(
            ClientError::Protocol(ProtocolError::UnsupportedCharset("GBK".into())).errno(),
            errno::EINVAL
        );
    }

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::NoTrackerAvailable.is_retryable());
        assert!(!ClientError::Server { errno: 2 }.is_retryable());
        assert!(!ClientError::InvalidArgument("x".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::Server { errno: 2 };
        assert_eq!(
            err.to_string(),
            "server error: errno 2 (no such file or directory)"
        );
        assert!(ClientError::Server { errno: 2 }.is_not_found());
    }
}
