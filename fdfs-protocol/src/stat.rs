//! Group and storage-node statistics records returned by the tracker.

use crate::record::{Record, RecordReader, Schema};
use crate::{
    DOMAIN_NAME_MAX_SIZE, GROUP_NAME_MAX_LEN, IPADDR_SIZE, PKG_LEN_SIZE, STORAGE_ID_MAX_SIZE,
    VERSION_SIZE,
};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

/// Status of a storage node as seen by a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageStatus {
    Init,
    WaitSync,
    Syncing,
    IpChanged,
    Deleted,
    Offline,
    Online,
    Active,
    None,
    Unknown(u8),
}

impl StorageStatus {
    pub const INIT: u8 = 0;
    pub const WAIT_SYNC: u8 = 1;
    pub const SYNCING: u8 = 2;
    pub const IP_CHANGED: u8 = 3;
    pub const DELETED: u8 = 4;
    pub const OFFLINE: u8 = 5;
    pub const ONLINE: u8 = 6;
    pub const ACTIVE: u8 = 7;
    pub const NONE: u8 = 99;

    pub fn as_u8(&self) -> u8 {
        match self {
            StorageStatus::Init => Self::INIT,
            StorageStatus::WaitSync => Self::WAIT_SYNC,
            StorageStatus::Syncing => Self::SYNCING,
            StorageStatus::IpChanged => Self::IP_CHANGED,
            StorageStatus::Deleted => Self::DELETED,
            StorageStatus::Offline => Self::OFFLINE,
            StorageStatus::Online => Self::ONLINE,
            StorageStatus::Active => Self::ACTIVE,
            StorageStatus::None => Self::NONE,
            StorageStatus::Unknown(b) => *b,
        }
    }

    pub fn caption(&self) -> &'static str {
        match self {
            StorageStatus::Init => "INIT",
            StorageStatus::WaitSync => "WAIT_SYNC",
            StorageStatus::Syncing => "SYNCING",
            StorageStatus::IpChanged => "IP_CHANGED",
            StorageStatus::Deleted => "DELETED",
            StorageStatus::Offline => "OFFLINE",
            StorageStatus::Online => "ONLINE",
            StorageStatus::Active => "ACTIVE",
            StorageStatus::None => "NONE",
            StorageStatus::Unknown(_) => "UNKNOWN",
        }
    }

    /// Whether the node is serving requests.
    pub fn is_serving(&self) -> bool {
        matches!(self, StorageStatus::Online | StorageStatus::Active)
    }
}

impl From<u8> for StorageStatus {
    fn from(b: u8) -> Self {
        match b {
            Self::INIT => StorageStatus::Init,
            Self::WAIT_SYNC => StorageStatus::WaitSync,
            Self::SYNCING => StorageStatus::Syncing,
            Self::IP_CHANGED => StorageStatus::IpChanged,
            Self::DELETED => StorageStatus::Deleted,
            Self::OFFLINE => StorageStatus::Offline,
            Self::ONLINE => StorageStatus::Online,
            Self::ACTIVE => StorageStatus::Active,
            Self::NONE => StorageStatus::None,
            other => StorageStatus::Unknown(other),
        }
    }
}

impl fmt::Display for StorageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.caption())
    }
}

impl Serialize for StorageStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.caption())
    }
}

/// Caption for a raw status byte.
pub fn status_caption(status: u8) -> &'static str {
    StorageStatus::from(status).caption()
}

const GROUP_STAT_LAYOUT: &[(&str, usize)] = &[
    ("group_name", GROUP_NAME_MAX_LEN + 1),
    ("total_mb", PKG_LEN_SIZE),
    ("free_mb", PKG_LEN_SIZE),
    ("trunk_free_mb", PKG_LEN_SIZE),
    ("storage_count", PKG_LEN_SIZE),
    ("storage_port", PKG_LEN_SIZE),
    ("storage_http_port", PKG_LEN_SIZE),
    ("active_count", PKG_LEN_SIZE),
    ("current_write_server", PKG_LEN_SIZE),
    ("store_path_count", PKG_LEN_SIZE),
    ("subdir_count_per_path", PKG_LEN_SIZE),
    ("current_trunk_file_id", PKG_LEN_SIZE),
];

/// Per-group statistics from a list-groups query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStat {
    /// Group name.
    pub group_name: String,
    /// Total disk space in MB.
    pub total_mb: i64,
    /// Free disk space in MB.
    pub free_mb: i64,
    /// Free trunk space in MB.
    pub trunk_free_mb: i64,
    /// Number of storage nodes.
    pub storage_count: i32,
    /// Storage service port.
    pub storage_port: i32,
    /// Storage HTTP port.
    pub storage_http_port: i32,
    /// Number of active storage nodes.
    pub active_count: i32,
    /// Index of the storage currently taking uploads.
    pub current_write_server: i32,
    pub store_path_count: i32,
    pub subdir_count_per_path: i32,
    /// Current trunk file ID.
    pub current_trunk_file_id: i32,
}
impl Record for GroupStat {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| Schema::build(GROUP_STAT_LAYOUT))
    }

    fn decode(r: &RecordReader<'_>) -> Self {
        let f = Self::schema().fields();
        Self {
            group_name: r.string(&f[0]),
            total_mb: r.long(&f[1]),
            free_mb: r.long(&f[2]),
            trunk_free_mb: r.long(&f[3]),
            storage_count: r.int(&f[4]),
            storage_port: r.int(&f[5]),
            storage_http_port: r.int(&f[6]),
            active_count: r.int(&f[7]),
            current_write_server: r.int(&f[8]),
            store_path_count: r.int(&f[9]),
            subdir_count_per_path: r.int(&f[10]),
            current_trunk_file_id: r.int(&f[11]),
        }
    }
}

const STORAGE_STAT_LAYOUT: &[(&str, usize)] = &[
    ("status", 1),
    ("id", STORAGE_ID_MAX_SIZE),
    ("ip_addr", IPADDR_SIZE),
    ("domain_name", DOMAIN_NAME_MAX_SIZE),
    ("src_ip_addr", IPADDR_SIZE),
    ("version", VERSION_SIZE),
    ("join_time", PKG_LEN_SIZE),
    ("up_time", PKG_LEN_SIZE),
    ("total_mb", PKG_LEN_SIZE),
    ("free_mb", PKG_LEN_SIZE),
    ("upload_priority", PKG_LEN_SIZE),
    ("store_path_count", PKG_LEN_SIZE),
    ("subdir_count_per_path", PKG_LEN_SIZE),
    ("current_write_path", PKG_LEN_SIZE),
    ("storage_port", PKG_LEN_SIZE),
    ("storage_http_port", PKG_LEN_SIZE),
    ("connection_alloc_count", 4),
    ("connection_current_count", 4),
    ("connection_max_count", 4),
    ("total_upload_count", PKG_LEN_SIZE),
    ("success_upload_count", PKG_LEN_SIZE),
    ("total_append_count", PKG_LEN_SIZE),
    ("success_append_count", PKG_LEN_SIZE),
    ("total_modify_count", PKG_LEN_SIZE),
    ("success_modify_count", PKG_LEN_SIZE),
    ("total_truncate_count", PKG_LEN_SIZE),
    ("success_truncate_count", PKG_LEN_SIZE),
    ("total_set_meta_count", PKG_LEN_SIZE),
    ("success_set_meta_count", PKG_LEN_SIZE),
    ("total_delete_count", PKG_LEN_SIZE),
    ("success_delete_count", PKG_LEN_SIZE),
    ("total_download_count", PKG_LEN_SIZE),
    ("success_download_count", PKG_LEN_SIZE),
    ("total_get_meta_count", PKG_LEN_SIZE),
    ("success_get_meta_count", PKG_LEN_SIZE),
    ("total_create_link_count", PKG_LEN_SIZE),
    ("success_create_link_count", PKG_LEN_SIZE),
    ("total_delete_link_count", PKG_LEN_SIZE),
    ("success_delete_link_count", PKG_LEN_SIZE),
    ("total_upload_bytes", PKG_LEN_SIZE),
    ("success_upload_bytes", PKG_LEN_SIZE),
    ("total_append_bytes", PKG_LEN_SIZE),
    ("success_append_bytes", PKG_LEN_SIZE),
    ("total_modify_bytes", PKG_LEN_SIZE),
    ("success_modify_bytes", PKG_LEN_SIZE),
    ("total_download_bytes", PKG_LEN_SIZE),
    ("success_download_bytes", PKG_LEN_SIZE),
    ("total_sync_in_bytes", PKG_LEN_SIZE),
    ("success_sync_in_bytes", PKG_LEN_SIZE),
    ("total_sync_out_bytes", PKG_LEN_SIZE),
    ("success_sync_out_bytes", PKG_LEN_SIZE),
    ("total_file_open_count", PKG_LEN_SIZE),
    ("success_file_open_count", PKG_LEN_SIZE),
    ("total_file_read_count", PKG_LEN_SIZE),
    ("success_file_read_count", PKG_LEN_SIZE),
    ("total_file_write_count", PKG_LEN_SIZE),
    ("success_file_write_count", PKG_LEN_SIZE),
    ("last_source_update", PKG_LEN_SIZE),
    ("last_sync_update", PKG_LEN_SIZE),
    ("last_synced_timestamp", PKG_LEN_SIZE),
    ("last_heart_beat_time", PKG_LEN_SIZE),
    ("if_trunk_server", 1),
];

/// Per-node statistics from a list-storages query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageStat {
    /// Node status byte.
    pub status: StorageStatus,
    /// Storage server ID.
    pub id: String,
    /// IP address the node registered with.
    pub ip_addr: String,
    /// HTTP domain name, if any.
    pub domain_name: String,
    /// Node this one synchronises from.
    pub src_ip_addr: String,
    /// Server version string.
    pub version: String,
    /// When the node joined the group.
    pub join_time: DateTime<Utc>,
    /// When the node process started.
    pub up_time: DateTime<Utc>,
    /// Total disk space in MB.
    pub total_mb: i64,
    /// Free disk space in MB.
    pub free_mb: i64,
    /// Upload priority; lower is preferred.
    pub upload_priority: i32,
    pub store_path_count: i32,
    pub subdir_count_per_path: i32,
    /// Store path currently written to.
    pub current_write_path: i32,
    /// Storage service port.
    pub storage_port: i32,
    /// Storage HTTP port.
    pub storage_http_port: i32,
    pub connection_alloc_count: i32,
    pub connection_current_count: i32,
    pub connection_max_count: i32,
    pub total_upload_count: i64,
    pub success_upload_count: i64,
    pub total_append_count: i64,
    pub success_append_count: i64,
    pub total_modify_count: i64,
    pub success_modify_count: i64,
    pub total_truncate_count: i64,
    pub success_truncate_count: i64,
    pub total_set_meta_count: i64,
    pub success_set_meta_count: i64,
    pub total_delete_count: i64,
    pub success_delete_count: i64,
    pub total_download_count: i64,
    pub success_download_count: i64,
    pub total_get_meta_count: i64,
    pub success_get_meta_count: i64,
    pub total_create_link_count: i64,
    pub success_create_link_count: i64,
    pub total_delete_link_count: i64,
    pub success_delete_link_count: i64,
    pub total_upload_bytes: i64,
    pub success_upload_bytes: i64,
    pub total_append_bytes: i64,
    pub success_append_bytes: i64,
    pub total_modify_bytes: i64,
    pub success_modify_bytes: i64,
    pub total_download_bytes: i64,
    pub success_download_bytes: i64,
    pub total_sync_in_bytes: i64,
    pub success_sync_in_bytes: i64,
    pub total_sync_out_bytes: i64,
    pub success_sync_out_bytes: i64,
    pub total_file_open_count: i64,
    pub success_file_open_count: i64,
    pub total_file_read_count: i64,
    pub success_file_read_count: i64,
    pub total_file_write_count: i64,
    pub success_file_write_count: i64,
    pub last_source_update: DateTime<Utc>,
    pub last_sync_update: DateTime<Utc>,
    pub last_synced_timestamp: DateTime<Utc>,
    /// Last heartbeat received by the tracker.
    pub last_heart_beat_time: DateTime<Utc>,
    /// Whether this node is the group's trunk server.
    pub if_trunk_server: bool,
}
impl Record for StorageStat {
    fn schema() -> &'static Schema {
        static SCHEMA: OnceLock<Schema> = OnceLock::new();
        SCHEMA.get_or_init(|| Schema::build(STORAGE_STAT_LAYOUT))
    }

    fn decode(r: &RecordReader<'_>) -> Self {
        let f = Self::schema().fields();
        Self {
            status: StorageStatus::from(r.byte(&f[0])),
            id: r.string(&f[1]),
            ip_addr: r.string(&f[2]),
            domain_name: r.string(&f[3]),
            src_ip_addr: r.string(&f[4]),
            version: r.string(&f[5]),
            join_time: r.date(&f[6]),
            up_time: r.date(&f[7]),
            total_mb: r.long(&f[8]),
            free_mb: r.long(&f[9]),
            upload_priority: r.int(&f[10]),
            store_path_count: r.int(&f[11]),
            subdir_count_per_path: r.int(&f[12]),
            current_write_path: r.int(&f[13]),
            storage_port: r.int(&f[14]),
            storage_http_port: r.int(&f[15]),
            connection_alloc_count: r.int32(&f[16]),
            connection_current_count: r.int32(&f[17]),
            connection_max_count: r.int32(&f[18]),
            total_upload_count: r.long(&f[19]),
            success_upload_count: r.long(&f[20]),
            total_append_count: r.long(&f[21]),
            success_append_count: r.long(&f[22]),
            total_modify_count: r.long(&f[23]),
            success_modify_count: r.long(&f[24]),
            total_truncate_count: r.long(&f[25]),
            success_truncate_count: r.long(&f[26]),
            total_set_meta_count: r.long(&f[27]),
            success_set_meta_count: r.long(&f[28]),
            total_delete_count: r.long(&f[29]),
            success_delete_count: r.long(&f[30]),
            total_download_count: r.long(&f[31]),
            success_download_count: r.long(&f[32]),
            total_get_meta_count: r.long(&f[33]),
            success_get_meta_count: r.long(&f[34]),
            total_create_link_count: r.long(&f[35]),
            success_create_link_count: r.long(&f[36]),
            total_delete_link_count: r.long(&f[37]),
            success_delete_link_count: r.long(&f[38]),
            total_upload_bytes: r.long(&f[39]),
            success_upload_bytes: r.long(&f[40]),
            total_append_bytes: r.long(&f[41]),
            success_append_bytes: r.long(&f[42]),
            total_modify_bytes: r.long(&f[43]),
            success_modify_bytes: r.long(&f[44]),
            total_download_bytes: r.long(&f[45]),
            success_download_bytes: r.long(&f[46]),
            total_sync_in_bytes: r.long(&f[47]),
            success_sync_in_bytes: r.long(&f[48]),
            total_sync_out_bytes: r.long(&f[49]),
            success_sync_out_bytes: r.long(&f[50]),
            total_file_open_count: r.long(&f[51]),
            success_file_open_count: r.long(&f[52]),
            total_file_read_count: r.long(&f[53]),
            success_file_read_count: r.long(&f[54]),
            total_file_write_count: r.long(&f[55]),
            success_file_write_count: r.long(&f[56]),
            last_source_update: r.date(&f[57]),
            last_sync_update: r.date(&f[58]),
            last_synced_timestamp: r.date(&f[59]),
            last_heart_beat_time: r.date(&f[60]),
            if_trunk_server: r.boolean(&f[61]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::Charset;
    use crate::record::decode_records;

    fn put(buf: &mut [u8], schema: &Schema, base: usize, name: &str, bytes: &[u8]) {
        let field = schema.field(name).unwrap();
        let start = base + field.offset;
        buf[start..start + bytes.len()].copy_from_slice(bytes);
    }

    #[test]
    fn test_schema_sizes() {
        assert_eq!(GroupStat::schema().record_size(), 105);
        assert_eq!(StorageStat::schema().record_size(), 612);
        assert_eq!(StorageStat::schema().fields().len(), 62);
        assert_eq!(StorageStat::schema().field("ip_addr").unwrap().offset, 17);
        assert_eq!(
            StorageStat::schema().field("if_trunk_server").unwrap().offset,
            611
        );
    }

    #[test]
    fn test_decode_group_stats() {
        let schema = GroupStat::schema();
        let width = schema.record_size();
        let mut buf = vec![0u8; width * 2];

        put(&mut buf, schema, 0, "group_name", b"group1");
        put(&mut buf, schema, 0, "total_mb", &1024i64.to_be_bytes());
        put(&mut buf, schema, 0, "storage_port", &23000i64.to_be_bytes());
        put(&mut buf, schema, width, "group_name", b"group2");
        put(&mut buf, schema, width, "active_count", &3i64.to_be_bytes());

        let groups: Vec<GroupStat> = decode_records(&buf, Charset::Utf8).unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].group_name, "group1");
        assert_eq!(groups[0].total_mb, 1024);
        assert_eq!(groups[0].storage_port, 23000);
        assert_eq!(groups[1].group_name, "group2");
        assert_eq!(groups[1].active_count, 3);
        assert_eq!(groups[1].total_mb, 0);
    }

    #[test]
    fn test_decode_storage_stats() {
        let schema = StorageStat::schema();
        let width = schema.record_size();
        let mut buf = vec![0u8; width * 2];

        put(&mut buf, schema, 0, "status", &[StorageStatus::ACTIVE]);
        put(&mut buf, schema, 0, "ip_addr", b"192.168.0.10");
        put(&mut buf, schema, 0, "version", b"6.07");
        put(&mut buf, schema, 0, "join_time", &1_600_000_000i64.to_be_bytes());
        put(&mut buf, schema, 0, "connection_max_count", &256i32.to_be_bytes());
        put(&mut buf, schema, 0, "success_sync_out_bytes", &77i64.to_be_bytes());
        put(&mut buf, schema, 0, "if_trunk_server", &[1]);
        put(&mut buf, schema, width, "status", &[StorageStatus::OFFLINE]);
        put(&mut buf, schema, width, "domain_name", b"img.example.com");

        let nodes: Vec<StorageStat> = decode_records(&buf, Charset::Utf8).unwrap();
        assert_eq!(nodes.len(), 2);

        assert_eq!(nodes[0].status, StorageStatus::Active);
        assert_eq!(nodes[0].ip_addr, "192.168.0.10");
        assert_eq!(nodes[0].version, "6.07");
        assert_eq!(nodes[0].join_time.timestamp(), 1_600_000_000);
        assert_eq!(nodes[0].connection_max_count, 256);
        assert_eq!(nodes[0].success_sync_out_bytes, 77);
        assert!(nodes[0].if_trunk_server);

        assert_eq!(nodes[1].status, StorageStatus::Offline);
        assert_eq!(nodes[1].domain_name, "img.example.com");
        assert!(!nodes[1].if_trunk_server);
    }

    #[test]
    fn test_status_captions() {
        assert_eq!(status_caption(0), "INIT");
        assert_eq!(status_caption(3), "IP_CHANGED");
        assert_eq!(status_caption(7), "ACTIVE");
        assert_eq!(status_caption(99), "NONE");
        assert_eq!(status_caption(42), "UNKNOWN");
        assert_eq!(StorageStatus::from(42).as_u8(), 42);
        assert!(StorageStatus::Online.is_serving());
        assert!(!StorageStatus::WaitSync.is_serving());
    }
}
