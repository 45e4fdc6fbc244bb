//! Streaming upload sources and download sinks.
//!
//! Upload content is written straight to the connection after the request
//! prefix, so large files never sit in memory. Download bodies are handed to
//! a sink chunk by chunk.

use crate::connection::Connection;
use crate::error::ClientError;
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Chunk size used when reading upload content from a reader.
pub const UPLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Upper bound on capacity reserved up front from a server-declared size.
const MAX_RESERVE: u64 = 1 << 20;

/// Writes upload content onto a connection, counting bytes.
///
/// The sink accepts at most the size announced in the request header. A
/// write past that limit is rejected before any of it reaches the stream.
pub struct UploadSink<'a> {
    conn: &'a mut Connection,
    written: u64,
    limit: u64,
}

impl<'a> UploadSink<'a> {
    pub(crate) fn new(conn: &'a mut Connection, limit: u64) -> Self {
        Self {
            conn,
            written: 0,
            limit,
        }
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), ClientError> {
        if buf.len() as u64 > self.remaining() {
            return Err(ClientError::Callback(format!(
                "source wrote past its size of {} bytes ({} + {})",
                self.limit,
                self.written,
                buf.len()
            )));
        }
        self.conn.send(buf).await?;
        self.written += buf.len() as u64;
        Ok(())
    }

    /// Bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Bytes still expected.
    pub fn remaining(&self) -> u64 {
        self.limit - self.written
    }
}

/// Producer of upload content.
///
/// `send` must write exactly `size()` bytes.
pub trait UploadSource: Send {
    fn size(&self) -> u64;

    fn send(
        &mut self,
        sink: &mut UploadSink<'_>,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

/// Uploads an in-memory buffer.
#[derive(Debug, Clone, Copy)]
pub struct BufferSource<'a> {
    buf: &'a [u8],
}

impl<'a> BufferSource<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Uploads `length` bytes of `buf` starting at `offset`.
    pub fn slice(buf: &'a [u8], offset: usize, length: usize) -> Result<Self, ClientError> {
        let end = offset.checked_add(length).filter(|&end| end <= buf.len());
        match end {
            Some(end) => Ok(Self::new(&buf[offset..end])),
            None => Err(ClientError::InvalidArgument(format!(
                "range {}+{} exceeds buffer of {} bytes",
                offset,
                length,
                buf.len()
            ))),
        }
    }
}

impl UploadSource for BufferSource<'_> {
    fn size(&self) -> u64 {
        self.buf.len() as u64
    }

    async fn send(&mut self, sink: &mut UploadSink<'_>) -> Result<(), ClientError> {
        sink.write_all(self.buf).await
    }
}

/// Uploads `size` bytes read from an async reader.
#[derive(Debug)]
pub struct ReaderSource<R> {
    reader: R,
    size: u64,
}

impl<R> ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R, size: u64) -> Self {
        Self { reader, size }
    }
}

impl ReaderSource<tokio::fs::File> {
    /// Opens a local file, taking the size from its metadata.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ClientError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        let size = file.metadata().await?.len();
        Ok(Self::new(file, size))
    }
}

impl<R> UploadSource for ReaderSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn size(&self) -> u64 {
        self.size
    }

    async fn send(&mut self, sink: &mut UploadSink<'_>) -> Result<(), ClientError> {
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE.min(self.size as usize).max(1)];
        let mut remaining = self.size;
        while remaining > 0 {
            let want = buf.len().min(remaining as usize);
            let n = self.reader.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(ClientError::Callback(format!(
                    "source ended {} bytes early",
                    remaining
                )));
            }
            sink.write_all(&buf[..n]).await?;
            remaining -= n as u64;
        }
        Ok(())
    }
}

/// Consumer of download content.
///
/// `recv` is called once per chunk with the total body size. Returning an
/// error aborts the download.
pub trait DownloadSink: Send {
    fn recv(
        &mut self,
        file_size: u64,
        chunk: &[u8],
    ) -> impl Future<Output = Result<(), ClientError>> + Send;
}

impl DownloadSink for Vec<u8> {
    async fn recv(&mut self, file_size: u64, chunk: &[u8]) -> Result<(), ClientError> {
        if self.is_empty() {
            self.reserve(file_size.min(MAX_RESERVE) as usize);
        }
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// Writes download content to an async writer.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Flushes and returns the writer.
    pub async fn finish(mut self) -> Result<W, ClientError> {
        self.writer.flush().await?;
        Ok(self.writer)
    }
}

impl<W> DownloadSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn recv(&mut self, _file_size: u64, chunk: &[u8]) -> Result<(), ClientError> {
        self.writer.write_all(chunk).await?;
        Ok(())
    }
}

/// Hands download chunks to a closure.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: FnMut(u64, &[u8]) -> Result<(), String> + Send,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> DownloadSink for CallbackSink<F>
where
    F: FnMut(u64, &[u8]) -> Result<(), String> + Send,
{
    async fn recv(&mut self, file_size: u64, chunk: &[u8]) -> Result<(), ClientError> {
        (self.callback)(file_size, chunk).map_err(ClientError::Callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_slice() {
        let data = b"HelloWorld";
        let source = BufferSource::slice(data, 5, 5).unwrap();
        assert_eq!(source.size(), 5);

        let result = BufferSource::slice(data, 8, 5);
        assert!(matches!(result, Err(ClientError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_vec_sink() {
        let mut sink = Vec::new();
        sink.recv(6, b"abc").await.unwrap();
        sink.recv(6, b"def").await.unwrap();
        assert_eq!(sink, b"abcdef");
    }

    #[tokio::test]
    async fn test_vec_sink_ignores_huge_declared_size() {
        let mut sink = Vec::new();
        sink.recv(u64::MAX, b"ab").await.unwrap();
        assert_eq!(sink, b"ab");
        assert!(sink.capacity() as u64 <= MAX_RESERVE);
    }

    #[tokio::test]
    async fn test_writer_sink() {
        let mut sink = WriterSink::new(Vec::new());
        sink.recv(4, b"ab").await.unwrap();
        sink.recv(4, b"cd").await.unwrap();
        assert_eq!(sink.finish().await.unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn test_callback_sink_abort() {
        let mut seen = 0u64;
        let mut sink = CallbackSink::new(|_, chunk: &[u8]| {
            seen += chunk.len() as u64;
            if seen > 3 {
                Err("enough".to_string())
            } else {
                Ok(())
            }
        });

        sink.recv(10, b"ab").await.unwrap();
        let result = sink.recv(10, b"cd").await;
        assert!(matches!(result, Err(ClientError::Callback(msg)) if msg == "enough"));
    }

    #[tokio::test]
    async fn test_reader_source_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let source = ReaderSource::open(&path).await.unwrap();
        assert_eq!(source.size(), 10);
    }
}
