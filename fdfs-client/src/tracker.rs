//! Tracker queries.
//!
//! Every operation has a pooled form that takes a connection from the
//! [`TrackerGroup`] and closes it afterwards, and an `_on` form that runs on a
//! caller-held tracker connection.

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionConfig, Endpoint};
use crate::error::ClientError;
use crate::tracker_group::TrackerGroup;
use bytes::{BufMut, BytesMut};
use fdfs_protocol::codec::{buff2long, put_fixed, trim_field};
use fdfs_protocol::command::tracker;
use fdfs_protocol::file_id::split_file_id;
use fdfs_protocol::{
    decode_records, errno, Charset, GroupStat, StorageStat, GROUP_NAME_MAX_LEN, IPADDR_SIZE,
    MAX_SERVERS_EACH_GROUP, PKG_LEN_SIZE, TRACKER_QUERY_STORAGE_FETCH_BODY_LEN,
    TRACKER_QUERY_STORAGE_STORE_BODY_LEN,
};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Usable bytes of an IP address field.
const IP_LEN: usize = IPADDR_SIZE - 1;

/// One IP + port entry of a store-all response.
const STORE_ALL_ENTRY_LEN: usize = IP_LEN + PKG_LEN_SIZE;

/// A storage node chosen by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageServer {
    pub endpoint: Endpoint,
    /// Store path to upload into; 0 for fetch/update answers.
    pub store_path_index: u8,
}

impl StorageServer {
    pub fn new(endpoint: Endpoint, store_path_index: u8) -> Self {
        Self {
            endpoint,
            store_path_index,
        }
    }

    pub async fn connect(&self, config: &ConnectionConfig) -> Result<Connection, ClientError> {
        Connection::connect(&self.endpoint, config).await
    }
}

/// Client for the tracker sub-protocol.
#[derive(Debug)]
pub struct TrackerClient {
    group: Arc<TrackerGroup>,
    charset: Charset,
    errno: AtomicU8,
}

impl TrackerClient {
    pub fn new(group: Arc<TrackerGroup>, charset: Charset) -> Self {
        Self {
            group,
            charset,
            errno: AtomicU8::new(0),
        }
    }

    /// Builds a client and its tracker group from configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let group = TrackerGroup::from_config(config)?;
        Ok(Self::new(Arc::new(group), config.charset()?))
    }

    pub fn group(&self) -> &Arc<TrackerGroup> {
        &self.group
    }

    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Errno of the last operation, 0 if it succeeded.
    pub fn error_code(&self) -> u8 {
        self.errno.load(Ordering::Relaxed)
    }

    /// Takes a tracker connection from the pool.
    pub async fn get_connection(&self) -> Result<Connection, ClientError> {
        match self.group.get_connection().await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                self.errno.store(errno::ECONNREFUSED, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Asks for a storage node to upload to, in `group_name` if given.
    pub async fn get_store_storage(
        &self,
        group_name: Option<&str>,
    ) -> Result<StorageServer, ClientError> {
        let mut conn = self.get_connection().await?;
        let result = self.get_store_storage_on(&mut conn, group_name).await;
        conn.release().await;
        result
    }

    pub async fn get_store_storage_on(
        &self,
        conn: &mut Connection,
        group_name: Option<&str>,
    ) -> Result<StorageServer, ClientError> {
        let result = async {
            let (cmd, body) = self.store_request(
                group_name,
                tracker::QUERY_STORE_WITHOUT_GROUP_ONE,
                tracker::QUERY_STORE_WITH_GROUP_ONE,
            )?;
            conn.send_package(cmd, &body).await?;
            let body = conn
                .recv_body(TRACKER_QUERY_STORAGE_STORE_BODY_LEN as i64)
                .await?;

            let ip = self.text(&body[GROUP_NAME_MAX_LEN..GROUP_NAME_MAX_LEN + IP_LEN]);
            let port = to_port(buff2long(&body, GROUP_NAME_MAX_LEN + IP_LEN))?;
            let store_path_index = body[TRACKER_QUERY_STORAGE_STORE_BODY_LEN - 1];
            Ok(StorageServer::new(Endpoint::new(ip, port), store_path_index))
        }
        .await;
        self.record(result)
    }

    /// Asks for every storage node that can take an upload.
    pub async fn get_store_storages(
        &self,
        group_name: Option<&str>,
    ) -> Result<Vec<StorageServer>, ClientError> {
        let mut conn = self.get_connection().await?;
        let result = self.get_store_storages_on(&mut conn, group_name).await;
        conn.release().await;
        result
    }

    pub async fn get_store_storages_on(
        &self,
        conn: &mut Connection,
        group_name: Option<&str>,
    ) -> Result<Vec<StorageServer>, ClientError> {
        let result = async {
            let (cmd, body) = self.store_request(
                group_name,
                tracker::QUERY_STORE_WITHOUT_GROUP_ALL,
                tracker::QUERY_STORE_WITH_GROUP_ALL,
            )?;
            conn.send_package(cmd, &body).await?;
            let body = conn.recv_body(-1).await?;
            self.parse_store_all(&body)
        }
        .await;
        self.record(result)
    }

    /// Asks for a storage node that can serve a download.
    pub async fn get_fetch_storage(
        &self,
        group_name: &str,
        filename: &str,
    ) -> Result<StorageServer, ClientError> {
        let servers = self
            .query_storages(tracker::QUERY_FETCH_ONE, group_name, filename)
            .await?;
        first_server(servers)
    }

    /// Asks for the storage node that can modify a file.
    pub async fn get_update_storage(
        &self,
        group_name: &str,
        filename: &str,
    ) -> Result<StorageServer, ClientError> {
        let servers = self
            .query_storages(tracker::QUERY_UPDATE, group_name, filename)
            .await?;
        first_server(servers)
    }

    /// Asks for every storage node holding a file.
    pub async fn get_fetch_storages(
        &self,
        group_name: &str,
        filename: &str,
    ) -> Result<Vec<StorageServer>, ClientError> {
        self.query_storages(tracker::QUERY_FETCH_ALL, group_name, filename)
            .await
    }

    pub async fn get_fetch_storage_by_file_id(
        &self,
        file_id: &str,
    ) -> Result<StorageServer, ClientError> {
        let (group_name, filename) = split_file_id(file_id)?;
        self.get_fetch_storage(group_name, filename).await
    }

    pub async fn get_fetch_storages_by_file_id(
        &self,
        file_id: &str,
    ) -> Result<Vec<StorageServer>, ClientError> {
        let (group_name, filename) = split_file_id(file_id)?;
        self.get_fetch_storages(group_name, filename).await
    }

    pub async fn get_update_storage_by_file_id(
        &self,
        file_id: &str,
    ) -> Result<StorageServer, ClientError> {
        let (group_name, filename) = split_file_id(file_id)?;
        self.get_update_storage(group_name, filename).await
    }

    async fn query_storages(
        &self,
        cmd: u8,
        group_name: &str,
        filename: &str,
    ) -> Result<Vec<StorageServer>, ClientError> {
        let mut conn = self.get_connection().await?;
        let result = self
            .query_storages_on(&mut conn, cmd, group_name, filename)
            .await;
        conn.release().await;
        result
    }

    /// Runs a fetch-one (102), update (103) or fetch-all (105) query.
    pub async fn query_storages_on(
        &self,
        conn: &mut Connection,
        cmd: u8,
        group_name: &str,
        filename: &str,
    ) -> Result<Vec<StorageServer>, ClientError> {
        let result = async {
            let group = self.encode(group_name)?;
            let filename = self.encode(filename)?;
            let mut body = BytesMut::with_capacity(GROUP_NAME_MAX_LEN + filename.len());
            put_fixed(&mut body, &group, GROUP_NAME_MAX_LEN);
            body.put_slice(&filename);

            conn.send_package(cmd, &body).await?;
            let body = conn.recv_body(-1).await?;
            self.parse_fetch(&body)
        }
        .await;
        self.record(result)
    }

    /// Lists every group.
    pub async fn list_groups(&self) -> Result<Vec<GroupStat>, ClientError> {
        let mut conn = self.get_connection().await?;
        let result = self.list_groups_on(&mut conn).await;
        conn.release().await;
        result
    }

    pub async fn list_groups_on(&self, conn: &mut Connection) -> Result<Vec<GroupStat>, ClientError> {
        let result = async {
            conn.send_package(tracker::SERVER_LIST_GROUP, &[]).await?;
            let body = conn.recv_body(-1).await?;
            Ok(decode_records::<GroupStat>(&body, self.charset)?)
        }
        .await;
        self.record(result)
    }

    /// Lists every storage node of a group.
    pub async fn list_storages(&self, group_name: &str) -> Result<Vec<StorageStat>, ClientError> {
        let mut conn = self.get_connection().await?;
        let result = self.list_storages_on(&mut conn, group_name, None).await;
        conn.release().await;
        result
    }

    /// Lists the storage node of a group with the given IP.
    pub async fn list_storages_by_ip(
        &self,
        group_name: &str,
        storage_ip: &str,
    ) -> Result<Vec<StorageStat>, ClientError> {
        let mut conn = self.get_connection().await?;
        let result = self
            .list_storages_on(&mut conn, group_name, Some(storage_ip))
            .await;
        conn.release().await;
        result
    }

    pub async fn list_storages_on(
        &self,
        conn: &mut Connection,
        group_name: &str,
        storage_ip: Option<&str>,
    ) -> Result<Vec<StorageStat>, ClientError> {
        let result = async {
            let group = self.encode(group_name)?;
            let ip = match storage_ip.filter(|ip| !ip.is_empty()) {
                Some(ip) => self.encode(ip)?,
                None => Vec::new(),
            };
            let ip_len = if ip.len() < IPADDR_SIZE {
                ip.len()
            } else {
                IP_LEN
            };

            let mut body = BytesMut::with_capacity(GROUP_NAME_MAX_LEN + ip_len);
            put_fixed(&mut body, &group, GROUP_NAME_MAX_LEN);
            body.put_slice(&ip[..ip_len]);

            conn.send_package(tracker::SERVER_LIST_STORAGE, &body).await?;
            let body = conn.recv_body(-1).await?;
            Ok(decode_records::<StorageStat>(&body, self.charset)?)
        }
        .await;
        self.record(result)
    }

    /// Removes a storage node from every tracker of the cluster.
    ///
    /// First checks that no tracker reports the node as serving, then asks
    /// each tracker to drop it. Fails with ENOENT when every tracker says the
    /// node is unknown, and with EBUSY when any tracker sees it online.
    pub async fn delete_storage(
        &self,
        group_name: &str,
        storage_ip: &str,
    ) -> Result<(), ClientError> {
        let result = self.delete_storage_all(group_name, storage_ip).await;
        self.record(result)
    }

    async fn delete_storage_all(
        &self,
        group_name: &str,
        storage_ip: &str,
    ) -> Result<(), ClientError> {
        let trackers = self.group.len();

        let mut not_found = 0;
        for index in 0..trackers {
            let mut conn = self.connect_index(index).await?;
            let result = self
                .list_storages_on(&mut conn, group_name, Some(storage_ip))
                .await;
            conn.release().await;

            match result {
                Ok(stats) => match stats.first() {
                    None => not_found += 1,
                    Some(stat) if stat.status.is_serving() => {
                        return Err(ClientError::Server {
                            errno: errno::EBUSY,
                        });
                    }
                    Some(_) => {}
                },
                Err(e) if e.is_not_found() => not_found += 1,
                Err(e) => return Err(e),
            }
        }
        if not_found == trackers {
            return Err(ClientError::Server {
                errno: errno::ENOENT,
            });
        }

        let mut not_found = 0;
        for index in 0..trackers {
            let mut conn = self.connect_index(index).await?;
            let result = self
                .delete_storage_on(&mut conn, group_name, storage_ip)
                .await;
            conn.release().await;

            match result {
                Ok(()) => {}
                Err(e) if e.is_not_found() => not_found += 1,
                Err(ClientError::Server { errno: code }) if code == errno::EALREADY => {}
                Err(e) => return Err(e),
            }
        }
        if not_found == trackers {
            return Err(ClientError::Server {
                errno: errno::ENOENT,
            });
        }

        Ok(())
    }

    /// Asks one tracker to drop a storage node.
    pub async fn delete_storage_on(
        &self,
        conn: &mut Connection,
        group_name: &str,
        storage_ip: &str,
    ) -> Result<(), ClientError> {
        let result = async {
            let group = self.encode(group_name)?;
            let ip = self.encode(storage_ip)?;
            let ip_width = if ip.len() < IPADDR_SIZE {
                IPADDR_SIZE
            } else {
                IP_LEN
            };

            let mut body = BytesMut::with_capacity(GROUP_NAME_MAX_LEN + ip_width);
            put_fixed(&mut body, &group, GROUP_NAME_MAX_LEN);
            put_fixed(&mut body, &ip, ip_width);

            conn.send_package(tracker::SERVER_DELETE_STORAGE, &body)
                .await?;
            conn.recv_body(0).await?;
            Ok(())
        }
        .await;
        self.record(result)
    }

    async fn connect_index(&self, index: usize) -> Result<Connection, ClientError> {
        match self.group.get_connection_by_index(index).await {
            Ok(conn) => Ok(conn),
            Err(e) => {
                tracing::warn!(
                    "Connect to tracker {} failed: {}",
                    self.group.endpoints()[index],
                    e
                );
                self.errno.store(errno::ECONNREFUSED, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    fn store_request(
        &self,
        group_name: Option<&str>,
        without_group: u8,
        with_group: u8,
    ) -> Result<(u8, Vec<u8>), ClientError> {
        match group_name.filter(|g| !g.is_empty()) {
            Some(group) => {
                let mut body = BytesMut::with_capacity(GROUP_NAME_MAX_LEN);
                put_fixed(&mut body, &self.encode(group)?, GROUP_NAME_MAX_LEN);
                Ok((with_group, body.to_vec()))
            }
            None => Ok((without_group, Vec::new())),
        }
    }

    /// group + N x (IP + port) + store path index
    fn parse_store_all(&self, body: &[u8]) -> Result<Vec<StorageServer>, ClientError> {
        let invalid = |reason: String| {
            ClientError::Protocol(fdfs_protocol::ProtocolError::InvalidResponse(reason))
        };

        if body.len() < GROUP_NAME_MAX_LEN + 1 {
            return Err(invalid(format!("store-all body of {} bytes", body.len())));
        }
        let entries_len = body.len() - GROUP_NAME_MAX_LEN - 1;
        if entries_len % STORE_ALL_ENTRY_LEN != 0 {
            return Err(invalid(format!(
                "store-all entries of {} bytes not a multiple of {}",
                entries_len, STORE_ALL_ENTRY_LEN
            )));
        }
        let count = entries_len / STORE_ALL_ENTRY_LEN;
        if count > MAX_SERVERS_EACH_GROUP {
            return Err(invalid(format!(
                "{} servers exceeds the group limit {}",
                count, MAX_SERVERS_EACH_GROUP
            )));
        }

        let store_path_index = body[body.len() - 1];
        (0..count)
            .map(|i| {
                let offset = GROUP_NAME_MAX_LEN + i * STORE_ALL_ENTRY_LEN;
                let ip = self.text(&body[offset..offset + IP_LEN]);
                let port = to_port(buff2long(body, offset + IP_LEN))?;
                Ok(StorageServer::new(Endpoint::new(ip, port), store_path_index))
            })
            .collect()
    }

    /// group + IP + port, then extra IPs sharing the port
    fn parse_fetch(&self, body: &[u8]) -> Result<Vec<StorageServer>, ClientError> {
        if body.len() < TRACKER_QUERY_STORAGE_FETCH_BODY_LEN
            || (body.len() - TRACKER_QUERY_STORAGE_FETCH_BODY_LEN) % IP_LEN != 0
        {
            return Err(ClientError::Protocol(
                fdfs_protocol::ProtocolError::InvalidResponse(format!(
                    "fetch body of {} bytes",
                    body.len()
                )),
            ));
        }

        let port = to_port(buff2long(body, GROUP_NAME_MAX_LEN + IP_LEN))?;
        let first = self.text(&body[GROUP_NAME_MAX_LEN..GROUP_NAME_MAX_LEN + IP_LEN]);

        let mut servers = vec![StorageServer::new(Endpoint::new(first, port), 0)];
        servers.extend(
            body[TRACKER_QUERY_STORAGE_FETCH_BODY_LEN..]
                .chunks_exact(IP_LEN)
                .map(|ip| StorageServer::new(Endpoint::new(self.text(ip), port), 0)),
        );
        Ok(servers)
    }

    fn encode(&self, s: &str) -> Result<Vec<u8>, ClientError> {
        Ok(self.charset.encode(s)?)
    }

    fn text(&self, bs: &[u8]) -> String {
        trim_field(&self.charset.decode(bs)).to_string()
    }

    fn record<T>(&self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        let code = match &result {
            Ok(_) => 0,
            Err(e) => e.errno(),
        };
        self.errno.store(code, Ordering::Relaxed);
        result
    }
}

fn to_port(raw: i64) -> Result<u16, ClientError> {
    u16::try_from(raw).map_err(|_| {
        ClientError::Protocol(fdfs_protocol::ProtocolError::InvalidResponse(format!(
            "invalid port {}",
            raw
        )))
    })
}

fn first_server(servers: Vec<StorageServer>) -> Result<StorageServer, ClientError> {
    servers.into_iter().next().ok_or_else(|| {
        ClientError::Protocol(fdfs_protocol::ProtocolError::InvalidResponse(
            "no storage server returned".to_string(),
        ))
    })
}
