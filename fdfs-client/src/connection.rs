//! Connection management.

use crate::error::ClientError;
use crate::transfer::UploadSink;
use fdfs_protocol::{command, pack_header, ProtocolError, RecvPackage, ResponseHeader};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per read/write timeout.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(30);

/// Host and port of a tracker or storage node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ClientError::InvalidArgument(format!("invalid endpoint \"{}\"", s));
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host.trim();
        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.trim().parse().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Timeout applied to every read and write.
    pub network_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }
}

/// A connection to a tracker or storage node.
///
/// Owned by whoever opened it and closed explicitly with [`Connection::close`]
/// or [`Connection::release`].
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    endpoint: Endpoint,
    network_timeout: Duration,
}

impl Connection {
    /// Connects to `endpoint`.
    pub async fn connect(endpoint: &Endpoint, config: &ConnectionConfig) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to {}...", endpoint);

        let stream = tokio::time::timeout(
            config.connect_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection to {} timed out", endpoint);
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection to {} failed: {}", endpoint, e);
            ClientError::Io(e)
        })?;

        stream.set_nodelay(true).ok();

        Ok(Self {
            stream,
            endpoint: endpoint.clone(),
            network_timeout: config.network_timeout,
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Writes all of `buf`.
    pub async fn send(&mut self, buf: &[u8]) -> Result<(), ClientError> {
        let timeout = self.network_timeout;
        with_timeout(timeout, self.stream.write_all(buf)).await?;
        Ok(())
    }

    /// Writes a header for `cmd` followed by `body`.
    pub async fn send_package(&mut self, cmd: u8, body: &[u8]) -> Result<(), ClientError> {
        let header = pack_header(cmd, body.len() as i64, 0)?;
        tracing::trace!("send cmd={} len={} to {}", cmd, body.len(), self.endpoint);

        let mut pkg = Vec::with_capacity(header.len() + body.len());
        pkg.extend_from_slice(&header);
        pkg.extend_from_slice(body);
        self.send(&pkg).await
    }

    /// Reads a response header. See [`fdfs_protocol::recv_header`].
    pub async fn recv_header(
        &mut self,
        expected_cmd: u8,
        expected_len: i64,
    ) -> Result<ResponseHeader, ClientError> {
        let timeout = self.network_timeout;
        let header = with_timeout(
            timeout,
            fdfs_protocol::recv_header(&mut self.stream, expected_cmd, expected_len),
        )
        .await?;
        Ok(header)
    }

    /// Reads a response header and body. See [`fdfs_protocol::recv_package`].
    pub async fn recv_package(
        &mut self,
        expected_cmd: u8,
        expected_len: i64,
    ) -> Result<RecvPackage, ClientError> {
        let timeout = self.network_timeout;
        let pkg = with_timeout(
            timeout,
            fdfs_protocol::recv_package(&mut self.stream, expected_cmd, expected_len),
        )
        .await?;
        Ok(pkg)
    }

    /// Reads a response body and fails on a non-zero status.
    pub async fn recv_body(&mut self, expected_len: i64) -> Result<Vec<u8>, ClientError> {
        let pkg = self.recv_package(command::RESP, expected_len).await?;
        if pkg.errno != 0 {
            return Err(ClientError::Server { errno: pkg.errno });
        }
        Ok(pkg.body)
    }

    /// Reads at least one byte into `buf`. End of stream is a short read.
    pub async fn read_some(&mut self, buf: &mut [u8]) -> Result<usize, ClientError> {
        let timeout = self.network_timeout;
        let n = with_timeout(timeout, self.stream.read(buf)).await?;
        if n == 0 && !buf.is_empty() {
            return Err(ProtocolError::ShortRead {
                expected: buf.len(),
                actual: 0,
            }
            .into());
        }
        Ok(n)
    }

    /// Sink that streams at most `limit` content bytes onto this connection.
    pub fn sink(&mut self, limit: u64) -> UploadSink<'_> {
        UploadSink::new(self, limit)
    }

    /// Probes the node. Returns true if it answered with status 0.
    pub async fn active_test(&mut self) -> Result<bool, ClientError> {
        self.send_package(command::ACTIVE_TEST, &[]).await?;
        let header = self.recv_header(command::RESP, 0).await?;
        Ok(header.errno == 0)
    }

    /// Sends QUIT and shuts the stream down.
    ///
    /// The shutdown happens even if QUIT cannot be written; the write error is
    /// still returned.
    pub async fn close(mut self) -> Result<(), ClientError> {
        tracing::debug!("Closing connection to {}", self.endpoint);
        let quit = self.send_package(command::QUIT, &[]).await;
        let shutdown = self.stream.shutdown().await;
        quit?;
        shutdown?;
        Ok(())
    }

    /// Shuts the stream down without QUIT, for a connection whose framing can
    /// no longer be trusted.
    pub async fn abort(mut self) {
        tracing::debug!("Dropping connection to {}", self.endpoint);
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("Shutdown of {} failed: {}", self.endpoint, e);
        }
    }

    /// Closes the connection, logging instead of returning a failure.
    pub async fn release(self) {
        let endpoint = self.endpoint.clone();
        if let Err(e) = self.close().await {
            tracing::warn!("Failed to close connection to {}: {}", endpoint, e);
        }
    }
}

async fn with_timeout<T, E, F>(timeout: Duration, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, E>>,
    ClientError: From<E>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(ClientError::from),
        Err(_) => {
            tracing::debug!("Network operation timed out after {:?}", timeout);
            Err(ClientError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use fdfs_protocol::HEADER_SIZE;
    use tokio::net::TcpListener;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.network_timeout, Duration::from_secs(30));

        let config = config.with_network_timeout(Duration::from_millis(10));
        assert_eq!(config.network_timeout, Duration::from_millis(10));
    }

    #[test]
    fn test_endpoint_parse() {
        let endpoint: Endpoint = "10.0.0.1:22122".parse().unwrap();
        assert_eq!(endpoint, Endpoint::new("10.0.0.1", 22122));
        assert_eq!(endpoint.to_string(), "10.0.0.1:22122");

        assert!("10.0.0.1".parse::<Endpoint>().is_err());
        assert!(":22122".parse::<Endpoint>().is_err());
        assert!("host:port".parse::<Endpoint>().is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = Connection::connect(&Endpoint::new("127.0.0.1", port), &ConnectionConfig::new()).await;
        assert!(matches!(result, Err(ClientError::Io(_))));
    }

    #[tokio::test]
    async fn test_active_test() {
        let server = MockServer::start(vec![MockServer::status(0)]).await;
        let mut conn = Connection::connect(&server.endpoint(), &ConnectionConfig::new())
            .await
            .unwrap();

        assert!(conn.active_test().await.unwrap());
        conn.close().await.unwrap();

        let requests = server.requests();
        assert_eq!(requests[0].cmd, command::ACTIVE_TEST);
        assert!(requests[0].body.is_empty());
    }

    #[tokio::test]
    async fn test_active_test_failed_status() {
        let server = MockServer::start(vec![MockServer::status(5)]).await;
        let mut conn = Connection::connect(&server.endpoint(), &ConnectionConfig::new())
            .await
            .unwrap();

        assert!(!conn.active_test().await.unwrap());
        conn.release().await;
    }

    #[tokio::test]
    async fn test_close_sends_quit() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            socket.read_to_end(&mut buf).await.unwrap();
            buf
        });

        let conn = Connection::connect(&Endpoint::new("127.0.0.1", port), &ConnectionConfig::new())
            .await
            .unwrap();
        conn.close().await.unwrap();

        let received = accept.await.unwrap();
        assert_eq!(received.len(), HEADER_SIZE);
        assert_eq!(received[8], command::QUIT);
    }

    #[tokio::test]
    async fn test_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let _accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(socket);
        });

        let config = ConnectionConfig::new().with_network_timeout(Duration::from_millis(50));
        let mut conn = Connection::connect(&Endpoint::new("127.0.0.1", port), &config)
            .await
            .unwrap();
        let result = conn.recv_header(command::RESP, 0).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
    }
}
