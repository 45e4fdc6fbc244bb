//! Storage node operations.
//!
//! A [`StorageClient`] asks its tracker which storage node to use for every
//! call and opens a fresh connection to it, or reuses a caller-supplied
//! session connection when one is attached.
//!
//! Read-only calls (download, metadata and file-info queries) are routed by a
//! fetch query; calls that change an existing file are routed by an update
//! query, which answers with the file's source node.

use crate::connection::Connection;
use crate::error::ClientError;
use crate::tracker::TrackerClient;
use crate::transfer::{BufferSource, DownloadSink, ReaderSource, UploadSource, WriterSink};
use bytes::{BufMut, BytesMut};
use fdfs_protocol::codec::{long2buff, put_fixed, trim_field};
use fdfs_protocol::command::{self, storage};
use fdfs_protocol::file_id::{decode_file_info, local_ext_name, split_file_id};
use fdfs_protocol::{
    errno, pack_header, pack_metadata, split_metadata, Charset, EmbeddedFileInfo, FileId,
    FileInfo, MetadataFlag, NameValuePair, ProtocolError, FILE_EXT_NAME_MAX_LEN,
    FILE_PREFIX_MAX_LEN, GROUP_NAME_MAX_LEN, PKG_LEN_SIZE,
};
use std::path::Path;

/// Read size when downloading into a local file.
pub const FILE_DOWNLOAD_CHUNK_SIZE: usize = 256 * 1024;

/// Read size when downloading into a [`DownloadSink`].
pub const SINK_DOWNLOAD_CHUNK_SIZE: usize = 2 * 1024;

/// Which tracker query picks the storage node.
#[derive(Debug, Clone, Copy)]
enum Route<'a> {
    Store(Option<&'a str>),
    Fetch(&'a str, &'a str),
    Update(&'a str, &'a str),
}

/// A storage connection borrowed for one call.
struct Lease {
    conn: Connection,
    store_path_index: u8,
    /// Opened for this call and closed afterwards.
    owned: bool,
}

/// Client for the storage sub-protocol.
#[derive(Debug)]
pub struct StorageClient {
    tracker: TrackerClient,
    session: Option<(Connection, u8)>,
    errno: u8,
}

impl StorageClient {
    pub fn new(tracker: TrackerClient) -> Self {
        Self {
            tracker,
            session: None,
            errno: 0,
        }
    }

    /// Creates a client that runs every call on `conn`.
    ///
    /// `store_path_index` is used for uploads. The tracker is not consulted
    /// while the session is attached.
    pub fn with_storage(tracker: TrackerClient, conn: Connection, store_path_index: u8) -> Self {
        Self {
            tracker,
            session: Some((conn, store_path_index)),
            errno: 0,
        }
    }

    pub fn tracker(&self) -> &TrackerClient {
        &self.tracker
    }

    /// Detaches the session connection, if any.
    pub fn take_session(&mut self) -> Option<(Connection, u8)> {
        self.session.take()
    }

    /// Errno of the last operation, 0 if it succeeded.
    pub fn error_code(&self) -> u8 {
        self.errno
    }

    /// Closes the session connection, if any.
    pub async fn close(mut self) -> Result<(), ClientError> {
        match self.session.take() {
            Some((conn, _)) => conn.close().await,
            None => Ok(()),
        }
    }

    fn charset(&self) -> Charset {
        self.tracker.charset()
    }

    // ---------------------------------------------------------------------
    // Upload
    // ---------------------------------------------------------------------

    /// Uploads `source` as a new file, returning its id.
    ///
    /// When `meta` is not empty it is stored with the file. If that fails the
    /// new file is deleted and the metadata error is returned.
    pub async fn upload_source<S: UploadSource>(
        &mut self,
        group_name: Option<&str>,
        source: &mut S,
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        self.upload(storage::UPLOAD_FILE, group_name, source, ext_name, meta)
            .await
    }

    pub async fn upload_buffer(
        &mut self,
        group_name: Option<&str>,
        data: &[u8],
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let mut source = BufferSource::new(data);
        self.upload_source(group_name, &mut source, ext_name, meta)
            .await
    }

    /// Uploads a local file. Without `ext_name` the local extension is used.
    pub async fn upload_file(
        &mut self,
        group_name: Option<&str>,
        local_path: impl AsRef<Path>,
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let local_path = local_path.as_ref();
        let mut source = self.open_local(local_path).await?;
        let ext_name = ext_name.or_else(|| local_ext_name(local_path));
        self.upload_source(group_name, &mut source, ext_name, meta)
            .await
    }

    /// Uploads `source` as an appender file.
    pub async fn upload_appender_source<S: UploadSource>(
        &mut self,
        group_name: Option<&str>,
        source: &mut S,
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        self.upload(
            storage::UPLOAD_APPENDER_FILE,
            group_name,
            source,
            ext_name,
            meta,
        )
        .await
    }

    pub async fn upload_appender_buffer(
        &mut self,
        group_name: Option<&str>,
        data: &[u8],
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let mut source = BufferSource::new(data);
        self.upload_appender_source(group_name, &mut source, ext_name, meta)
            .await
    }

    pub async fn upload_appender_file(
        &mut self,
        group_name: Option<&str>,
        local_path: impl AsRef<Path>,
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let local_path = local_path.as_ref();
        let mut source = self.open_local(local_path).await?;
        let ext_name = ext_name.or_else(|| local_ext_name(local_path));
        self.upload_appender_source(group_name, &mut source, ext_name, meta)
            .await
    }

    /// Uploads `source` as a slave of `master_filename`.
    ///
    /// The slave is stored on the master's node, named after the master with
    /// `prefix` inserted before the extension.
    pub async fn upload_slave_source<S: UploadSource>(
        &mut self,
        group_name: &str,
        master_filename: &str,
        prefix: &str,
        source: &mut S,
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        if group_name.is_empty() || master_filename.is_empty() || prefix.is_empty() {
            return self.record(Err(ClientError::InvalidArgument(
                "slave upload needs group, master filename and prefix".to_string(),
            )));
        }

        let mut lease = self.lease(Route::Update(group_name, master_filename)).await?;
        let result = self
            .upload_slave_on(
                &mut lease.conn,
                master_filename,
                prefix,
                source,
                ext_name.unwrap_or(""),
            )
            .await;
        let result = self.attach_metadata(&mut lease.conn, result, meta).await;
        self.finish(lease, result).await
    }

    pub async fn upload_slave_buffer(
        &mut self,
        group_name: &str,
        master_filename: &str,
        prefix: &str,
        data: &[u8],
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let mut source = BufferSource::new(data);
        self.upload_slave_source(group_name, master_filename, prefix, &mut source, ext_name, meta)
            .await
    }

    pub async fn upload_slave_file(
        &mut self,
        group_name: &str,
        master_filename: &str,
        prefix: &str,
        local_path: impl AsRef<Path>,
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let local_path = local_path.as_ref();
        let mut source = self.open_local(local_path).await?;
        let ext_name = ext_name.or_else(|| local_ext_name(local_path));
        self.upload_slave_source(group_name, master_filename, prefix, &mut source, ext_name, meta)
            .await
    }

    pub async fn upload_slave_by_file_id<S: UploadSource>(
        &mut self,
        master_file_id: &str,
        prefix: &str,
        source: &mut S,
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let (group_name, master_filename) = self.split(master_file_id)?;
        self.upload_slave_source(group_name, master_filename, prefix, source, ext_name, meta)
            .await
    }

    async fn upload<S: UploadSource>(
        &mut self,
        cmd: u8,
        group_name: Option<&str>,
        source: &mut S,
        ext_name: Option<&str>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let mut lease = self.lease(Route::Store(group_name)).await?;
        let result = self
            .upload_on(
                &mut lease.conn,
                cmd,
                lease.store_path_index,
                source,
                ext_name.unwrap_or(""),
            )
            .await;
        let result = self.attach_metadata(&mut lease.conn, result, meta).await;
        self.finish(lease, result).await
    }

    /// store path index + size + ext, then content
    async fn upload_on<S: UploadSource>(
        &self,
        conn: &mut Connection,
        cmd: u8,
        store_path_index: u8,
        source: &mut S,
        ext_name: &str,
    ) -> Result<FileId, ClientError> {
        let ext = self.encode(ext_name)?;
        let size = source.size();
        let fixed_len = 1 + PKG_LEN_SIZE + FILE_EXT_NAME_MAX_LEN;

        let mut prefix = BytesMut::with_capacity(fdfs_protocol::HEADER_SIZE + fixed_len);
        prefix.put_slice(&pack_header(cmd, body_len(fixed_len, size)?, 0)?);
        prefix.put_u8(store_path_index);
        prefix.put_slice(&long2buff(to_wire(size)?));
        put_fixed(&mut prefix, &ext, FILE_EXT_NAME_MAX_LEN);

        send_with_content(conn, &prefix, source).await?;
        let body = conn.recv_body(-1).await?;
        self.parse_file_id(&body)
    }

    /// master len + size + prefix + ext + master filename, then content
    async fn upload_slave_on<S: UploadSource>(
        &self,
        conn: &mut Connection,
        master_filename: &str,
        prefix: &str,
        source: &mut S,
        ext_name: &str,
    ) -> Result<FileId, ClientError> {
        let master = self.encode(master_filename)?;
        let prefix = self.encode(prefix)?;
        let ext = self.encode(ext_name)?;
        let size = source.size();
        let fixed_len =
            2 * PKG_LEN_SIZE + FILE_PREFIX_MAX_LEN + FILE_EXT_NAME_MAX_LEN + master.len();

        let mut head = BytesMut::with_capacity(fdfs_protocol::HEADER_SIZE + fixed_len);
        head.put_slice(&pack_header(
            storage::UPLOAD_SLAVE_FILE,
            body_len(fixed_len, size)?,
            0,
        )?);
        head.put_slice(&long2buff(master.len() as i64));
        head.put_slice(&long2buff(to_wire(size)?));
        put_fixed(&mut head, &prefix, FILE_PREFIX_MAX_LEN);
        put_fixed(&mut head, &ext, FILE_EXT_NAME_MAX_LEN);
        head.put_slice(&master);

        send_with_content(conn, &head, source).await?;
        let body = conn.recv_body(-1).await?;
        self.parse_file_id(&body)
    }

    async fn attach_metadata(
        &self,
        conn: &mut Connection,
        uploaded: Result<FileId, ClientError>,
        meta: &[NameValuePair],
    ) -> Result<FileId, ClientError> {
        let file_id = uploaded?;
        if meta.is_empty() {
            return Ok(file_id);
        }

        let result = self
            .set_metadata_on(
                conn,
                &file_id.group_name,
                &file_id.remote_filename,
                meta,
                MetadataFlag::Overwrite,
            )
            .await;
        if let Err(e) = result {
            tracing::warn!("Setting metadata of {} failed, deleting it: {}", file_id, e);
            if let Err(del) = self
                .delete_file_on(conn, &file_id.group_name, &file_id.remote_filename)
                .await
            {
                tracing::warn!("Failed to delete {}: {}", file_id, del);
            }
            return Err(e);
        }
        Ok(file_id)
    }

    // ---------------------------------------------------------------------
    // Append / modify / truncate
    // ---------------------------------------------------------------------

    /// Appends `source` to an appender file.
    pub async fn append_source<S: UploadSource>(
        &mut self,
        group_name: &str,
        appender_filename: &str,
        source: &mut S,
    ) -> Result<(), ClientError> {
        self.require_file(group_name, appender_filename)?;

        let mut lease = self.lease(Route::Update(group_name, appender_filename)).await?;
        let result = async {
            let filename = self.encode(appender_filename)?;
            let size = source.size();
            let fixed_len = 2 * PKG_LEN_SIZE + filename.len();

            let mut head = BytesMut::with_capacity(fdfs_protocol::HEADER_SIZE + fixed_len);
            head.put_slice(&pack_header(
                storage::APPEND_FILE,
                body_len(fixed_len, size)?,
                0,
            )?);
            head.put_slice(&long2buff(filename.len() as i64));
            head.put_slice(&long2buff(to_wire(size)?));
            head.put_slice(&filename);

            send_with_content(&mut lease.conn, &head, source).await?;
            lease.conn.recv_body(0).await?;
            Ok(())
        }
        .await;
        self.finish(lease, result).await
    }

    pub async fn append_buffer(
        &mut self,
        group_name: &str,
        appender_filename: &str,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let mut source = BufferSource::new(data);
        self.append_source(group_name, appender_filename, &mut source)
            .await
    }

    pub async fn append_by_file_id(
        &mut self,
        appender_file_id: &str,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let (group_name, filename) = self.split(appender_file_id)?;
        self.append_buffer(group_name, filename, data).await
    }

    /// Overwrites part of an appender file starting at `file_offset`.
    pub async fn modify_source<S: UploadSource>(
        &mut self,
        group_name: &str,
        appender_filename: &str,
        file_offset: u64,
        source: &mut S,
    ) -> Result<(), ClientError> {
        self.require_file(group_name, appender_filename)?;

        let mut lease = self.lease(Route::Update(group_name, appender_filename)).await?;
        let result = async {
            let filename = self.encode(appender_filename)?;
            let size = source.size();
            let fixed_len = 3 * PKG_LEN_SIZE + filename.len();

            let mut head = BytesMut::with_capacity(fdfs_protocol::HEADER_SIZE + fixed_len);
            head.put_slice(&pack_header(
                storage::MODIFY_FILE,
                body_len(fixed_len, size)?,
                0,
            )?);
            head.put_slice(&long2buff(filename.len() as i64));
            head.put_slice(&long2buff(to_wire(file_offset)?));
            head.put_slice(&long2buff(to_wire(size)?));
            head.put_slice(&filename);

            send_with_content(&mut lease.conn, &head, source).await?;
            lease.conn.recv_body(0).await?;
            Ok(())
        }
        .await;
        self.finish(lease, result).await
    }

    pub async fn modify_buffer(
        &mut self,
        group_name: &str,
        appender_filename: &str,
        file_offset: u64,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let mut source = BufferSource::new(data);
        self.modify_source(group_name, appender_filename, file_offset, &mut source)
            .await
    }

    pub async fn modify_by_file_id(
        &mut self,
        appender_file_id: &str,
        file_offset: u64,
        data: &[u8],
    ) -> Result<(), ClientError> {
        let (group_name, filename) = self.split(appender_file_id)?;
        self.modify_buffer(group_name, filename, file_offset, data)
            .await
    }

    /// Truncates an appender file to `truncated_size` bytes.
    pub async fn truncate_file(
        &mut self,
        group_name: &str,
        appender_filename: &str,
        truncated_size: u64,
    ) -> Result<(), ClientError> {
        self.require_file(group_name, appender_filename)?;

        let mut lease = self.lease(Route::Update(group_name, appender_filename)).await?;
        let result = async {
            let filename = self.encode(appender_filename)?;
            let mut body = BytesMut::with_capacity(2 * PKG_LEN_SIZE + filename.len());
            body.put_slice(&long2buff(filename.len() as i64));
            body.put_slice(&long2buff(to_wire(truncated_size)?));
            body.put_slice(&filename);

            lease.conn.send_package(storage::TRUNCATE_FILE, &body).await?;
            lease.conn.recv_body(0).await?;
            Ok(())
        }
        .await;
        self.finish(lease, result).await
    }

    pub async fn truncate_file_by_file_id(
        &mut self,
        appender_file_id: &str,
        truncated_size: u64,
    ) -> Result<(), ClientError> {
        let (group_name, filename) = self.split(appender_file_id)?;
        self.truncate_file(group_name, filename, truncated_size)
            .await
    }

    // ---------------------------------------------------------------------
    // Delete
    // ---------------------------------------------------------------------

    pub async fn delete_file(&mut self, group_name: &str, filename: &str) -> Result<(), ClientError> {
        let mut lease = self.lease(Route::Update(group_name, filename)).await?;
        let result = self.delete_file_on(&mut lease.conn, group_name, filename).await;
        self.finish(lease, result).await
    }

    pub async fn delete_file_by_file_id(&mut self, file_id: &str) -> Result<(), ClientError> {
        let (group_name, filename) = self.split(file_id)?;
        self.delete_file(group_name, filename).await
    }

    async fn delete_file_on(
        &self,
        conn: &mut Connection,
        group_name: &str,
        filename: &str,
    ) -> Result<(), ClientError> {
        let body = self.group_and_filename(group_name, filename)?;
        conn.send_package(storage::DELETE_FILE, &body).await?;
        conn.recv_body(0).await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Download
    // ---------------------------------------------------------------------

    /// Downloads `length` bytes from `offset`; a length of 0 reads to the end.
    pub async fn download_buffer(
        &mut self,
        group_name: &str,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, ClientError> {
        let mut lease = self.lease(Route::Fetch(group_name, filename)).await?;
        let result = async {
            self.send_download(&mut lease.conn, group_name, filename, offset, length)
                .await?;
            lease.conn.recv_body(-1).await
        }
        .await;
        self.finish(lease, result).await
    }

    pub async fn download_buffer_by_file_id(&mut self, file_id: &str) -> Result<Vec<u8>, ClientError> {
        let (group_name, filename) = self.split(file_id)?;
        self.download_buffer(group_name, filename, 0, 0).await
    }

    /// Downloads into a new local file, returning the bytes written.
    ///
    /// The local file is removed if the download fails part way.
    pub async fn download_to_file(
        &mut self,
        group_name: &str,
        filename: &str,
        offset: u64,
        length: u64,
        local_path: impl AsRef<Path>,
    ) -> Result<u64, ClientError> {
        let local_path = local_path.as_ref();
        let mut lease = self.lease(Route::Fetch(group_name, filename)).await?;
        let file = match tokio::fs::File::create(local_path).await {
            Ok(file) => file,
            Err(e) => {
                self.settle(lease, true).await;
                return self.record(Err(e.into()));
            }
        };

        let mut sink = WriterSink::new(file);
        let result = async {
            self.send_download(&mut lease.conn, group_name, filename, offset, length)
                .await?;
            let size = recv_download(&mut lease.conn, &mut sink, FILE_DOWNLOAD_CHUNK_SIZE).await?;
            sink.finish().await?;
            Ok(size)
        }
        .await;

        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(local_path).await {
                tracing::warn!("Failed to remove {}: {}", local_path.display(), e);
            }
        }
        self.finish(lease, result).await
    }

    pub async fn download_to_file_by_file_id(
        &mut self,
        file_id: &str,
        local_path: impl AsRef<Path>,
    ) -> Result<u64, ClientError> {
        let (group_name, filename) = self.split(file_id)?;
        self.download_to_file(group_name, filename, 0, 0, local_path)
            .await
    }

    /// Streams the download into `sink` in chunks of at most 2 KiB.
    ///
    /// An error from the sink stops the download and is returned.
    pub async fn download_to_sink<D: DownloadSink>(
        &mut self,
        group_name: &str,
        filename: &str,
        offset: u64,
        length: u64,
        sink: &mut D,
    ) -> Result<u64, ClientError> {
        let mut lease = self.lease(Route::Fetch(group_name, filename)).await?;
        let result = async {
            self.send_download(&mut lease.conn, group_name, filename, offset, length)
                .await?;
            recv_download(&mut lease.conn, sink, SINK_DOWNLOAD_CHUNK_SIZE).await
        }
        .await;
        self.finish(lease, result).await
    }

    pub async fn download_to_sink_by_file_id<D: DownloadSink>(
        &mut self,
        file_id: &str,
        sink: &mut D,
    ) -> Result<u64, ClientError> {
        let (group_name, filename) = self.split(file_id)?;
        self.download_to_sink(group_name, filename, 0, 0, sink)
            .await
    }

    /// offset + length + group + filename
    async fn send_download(
        &self,
        conn: &mut Connection,
        group_name: &str,
        filename: &str,
        offset: u64,
        length: u64,
    ) -> Result<(), ClientError> {
        let tail = self.group_and_filename(group_name, filename)?;
        let mut body = BytesMut::with_capacity(2 * PKG_LEN_SIZE + tail.len());
        body.put_slice(&long2buff(to_wire(offset)?));
        body.put_slice(&long2buff(to_wire(length)?));
        body.put_slice(&tail);
        conn.send_package(storage::DOWNLOAD_FILE, &body).await
    }

    // ---------------------------------------------------------------------
    // Metadata
    // ---------------------------------------------------------------------

    pub async fn get_metadata(
        &mut self,
        group_name: &str,
        filename: &str,
    ) -> Result<Vec<NameValuePair>, ClientError> {
        let mut lease = self.lease(Route::Fetch(group_name, filename)).await?;
        let result = async {
            let body = self.group_and_filename(group_name, filename)?;
            lease.conn.send_package(storage::GET_METADATA, &body).await?;
            let body = lease.conn.recv_body(-1).await?;
            Ok(split_metadata(&self.charset().decode(&body)))
        }
        .await;
        self.finish(lease, result).await
    }

    pub async fn get_metadata_by_file_id(
        &mut self,
        file_id: &str,
    ) -> Result<Vec<NameValuePair>, ClientError> {
        let (group_name, filename) = self.split(file_id)?;
        self.get_metadata(group_name, filename).await
    }

    pub async fn set_metadata(
        &mut self,
        group_name: &str,
        filename: &str,
        meta: &[NameValuePair],
        flag: MetadataFlag,
    ) -> Result<(), ClientError> {
        let mut lease = self.lease(Route::Update(group_name, filename)).await?;
        let result = self
            .set_metadata_on(&mut lease.conn, group_name, filename, meta, flag)
            .await;
        self.finish(lease, result).await
    }

    pub async fn set_metadata_by_file_id(
        &mut self,
        file_id: &str,
        meta: &[NameValuePair],
        flag: MetadataFlag,
    ) -> Result<(), ClientError> {
        let (group_name, filename) = self.split(file_id)?;
        self.set_metadata(group_name, filename, meta, flag).await
    }

    /// filename len + meta len + flag + group + filename, then the meta blob
    async fn set_metadata_on(
        &self,
        conn: &mut Connection,
        group_name: &str,
        filename: &str,
        meta: &[NameValuePair],
        flag: MetadataFlag,
    ) -> Result<(), ClientError> {
        let group = self.encode(group_name)?;
        let filename = self.encode(filename)?;
        let blob = self.encode(&pack_metadata(meta))?;
        let fixed_len = 2 * PKG_LEN_SIZE + 1 + GROUP_NAME_MAX_LEN + filename.len();

        let mut head = BytesMut::with_capacity(fdfs_protocol::HEADER_SIZE + fixed_len);
        head.put_slice(&pack_header(
            storage::SET_METADATA,
            (fixed_len + blob.len()) as i64,
            0,
        )?);
        head.put_slice(&long2buff(filename.len() as i64));
        head.put_slice(&long2buff(blob.len() as i64));
        head.put_u8(flag.as_byte());
        put_fixed(&mut head, &group, GROUP_NAME_MAX_LEN);
        head.put_slice(&filename);

        conn.send(&head).await?;
        if !blob.is_empty() {
            conn.send(&blob).await?;
        }
        conn.recv_body(0).await?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // File info
    // ---------------------------------------------------------------------

    /// File info decoded from the filename, or queried from the storage node
    /// for slave, appender and trunk files.
    pub async fn get_file_info(
        &mut self,
        group_name: &str,
        filename: &str,
    ) -> Result<FileInfo, ClientError> {
        match decode_file_info(filename) {
            Ok(EmbeddedFileInfo::Decoded(info)) => self.record(Ok(info)),
            Ok(EmbeddedFileInfo::QueryServer) => self.query_file_info(group_name, filename).await,
            Err(e) => self.record(Err(e.into())),
        }
    }

    pub async fn get_file_info_by_file_id(&mut self, file_id: &str) -> Result<FileInfo, ClientError> {
        let (group_name, filename) = self.split(file_id)?;
        self.get_file_info(group_name, filename).await
    }

    /// Asks the storage node for file info.
    pub async fn query_file_info(
        &mut self,
        group_name: &str,
        filename: &str,
    ) -> Result<FileInfo, ClientError> {
        let mut lease = self.lease(Route::Fetch(group_name, filename)).await?;
        let result = async {
            let body = self.group_and_filename(group_name, filename)?;
            lease.conn.send_package(storage::QUERY_FILE_INFO, &body).await?;
            let body = lease
                .conn
                .recv_body(fdfs_protocol::file_id::QUERY_FILE_INFO_BODY_LEN as i64)
                .await?;
            Ok(FileInfo::from_query_response(&body)?)
        }
        .await;
        self.finish(lease, result).await
    }

    pub async fn query_file_info_by_file_id(
        &mut self,
        file_id: &str,
    ) -> Result<FileInfo, ClientError> {
        let (group_name, filename) = self.split(file_id)?;
        self.query_file_info(group_name, filename).await
    }

    // ---------------------------------------------------------------------
    // Helpers
    // ---------------------------------------------------------------------

    async fn lease(&mut self, route: Route<'_>) -> Result<Lease, ClientError> {
        if let Some((conn, store_path_index)) = self.session.take() {
            return Ok(Lease {
                conn,
                store_path_index,
                owned: false,
            });
        }

        let server = match route {
            Route::Store(group_name) => self.tracker.get_store_storage(group_name).await,
            Route::Fetch(group_name, filename) => {
                self.tracker.get_fetch_storage(group_name, filename).await
            }
            Route::Update(group_name, filename) => {
                self.tracker.get_update_storage(group_name, filename).await
            }
        };
        let server = match server {
            Ok(server) => server,
            Err(e) => return self.record(Err(e)),
        };

        let config = *self.tracker.group().connection_config();
        match server.connect(&config).await {
            Ok(conn) => Ok(Lease {
                conn,
                store_path_index: server.store_path_index,
                owned: true,
            }),
            Err(e) => {
                tracing::warn!("Connect to storage {} failed: {}", server.endpoint, e);
                self.errno = errno::ECONNREFUSED;
                Err(e)
            }
        }
    }

    async fn finish<T>(
        &mut self,
        lease: Lease,
        result: Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        // A server status leaves the stream framed; anything else may not.
        let in_sync = matches!(&result, Ok(_) | Err(ClientError::Server { .. }));
        self.settle(lease, in_sync).await;
        self.record(result)
    }

    /// Returns a session connection to the client or closes an owned one.
    /// A connection that is out of sync is dropped either way.
    async fn settle(&mut self, lease: Lease, in_sync: bool) {
        if !in_sync {
            lease.conn.abort().await;
        } else if lease.owned {
            lease.conn.release().await;
        } else {
            self.session = Some((lease.conn, lease.store_path_index));
        }
    }

    fn record<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        self.errno = match &result {
            Ok(_) => 0,
            Err(e) => e.errno(),
        };
        result
    }

    fn split<'a>(&mut self, file_id: &'a str) -> Result<(&'a str, &'a str), ClientError> {
        let result = split_file_id(file_id).map_err(ClientError::from);
        self.record(result)
    }

    fn require_file(&mut self, group_name: &str, filename: &str) -> Result<(), ClientError> {
        if group_name.is_empty() || filename.is_empty() {
            return self.record(Err(ClientError::InvalidArgument(
                "group name and filename must not be empty".to_string(),
            )));
        }
        Ok(())
    }

    async fn open_local(
        &mut self,
        local_path: &Path,
    ) -> Result<ReaderSource<tokio::fs::File>, ClientError> {
        let result = ReaderSource::open(local_path).await;
        if result.is_err() {
            return self.record(result);
        }
        result
    }

    fn encode(&self, s: &str) -> Result<Vec<u8>, ClientError> {
        Ok(self.charset().encode(s)?)
    }

    /// group (16) + filename
    fn group_and_filename(&self, group_name: &str, filename: &str) -> Result<Vec<u8>, ClientError> {
        let group = self.encode(group_name)?;
        let filename = self.encode(filename)?;
        let mut body = BytesMut::with_capacity(GROUP_NAME_MAX_LEN + filename.len());
        put_fixed(&mut body, &group, GROUP_NAME_MAX_LEN);
        body.put_slice(&filename);
        Ok(body.to_vec())
    }

    /// group (16) + remote filename
    fn parse_file_id(&self, body: &[u8]) -> Result<FileId, ClientError> {
        if body.len() <= GROUP_NAME_MAX_LEN {
            return Err(ProtocolError::InvalidResponse(format!(
                "upload body of {} bytes",
                body.len()
            ))
            .into());
        }
        let charset = self.charset();
        let group_name = trim_field(&charset.decode(&body[..GROUP_NAME_MAX_LEN])).to_string();
        let remote_filename = charset.decode(&body[GROUP_NAME_MAX_LEN..]);
        Ok(FileId::new(group_name, remote_filename))
    }
}

/// Writes the request head, then exactly `source.size()` content bytes.
async fn send_with_content<S: UploadSource>(
    conn: &mut Connection,
    head: &[u8],
    source: &mut S,
) -> Result<(), ClientError> {
    conn.send(head).await?;
    let mut sink = conn.sink(source.size());
    source.send(&mut sink).await?;
    if sink.written() != source.size() {
        return Err(ClientError::Callback(format!(
            "source wrote {} of {} bytes",
            sink.written(),
            source.size()
        )));
    }
    Ok(())
}

/// Reads a download response body into `sink`, returning its size.
async fn recv_download<D: DownloadSink>(
    conn: &mut Connection,
    sink: &mut D,
    chunk_size: usize,
) -> Result<u64, ClientError> {
    let header = conn.recv_header(command::RESP, -1).await?;
    if header.errno != 0 {
        return Err(ClientError::Server {
            errno: header.errno,
        });
    }

    let file_size = header.body_len;
    let mut buf = vec![0u8; chunk_size];
    let mut remaining = file_size;
    while remaining > 0 {
        let want = remaining.min(chunk_size as u64) as usize;
        let n = conn.read_some(&mut buf[..want]).await?;
        sink.recv(file_size, &buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(file_size)
}

fn to_wire(n: u64) -> Result<i64, ClientError> {
    i64::try_from(n).map_err(|_| ClientError::InvalidArgument(format!("{} out of range", n)))
}

fn body_len(fixed_len: usize, content_len: u64) -> Result<i64, ClientError> {
    to_wire(content_len)?
        .checked_add(fixed_len as i64)
        .ok_or_else(|| ClientError::InvalidArgument("request body too large".to_string()))
}
