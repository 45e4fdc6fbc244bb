//! # fdfs-protocol
//!
//! Wire protocol implementation for the FastDFS tracker/storage protocol.
//!
//! This crate provides:
//! - Fixed 10-byte header packing and exact-length body reception
//! - Big-endian integer, IP address and token helpers
//! - Charset transcoding for text fields
//! - Configurable-alphabet Base64 used for filename-embedded metadata
//! - Fixed-layout record decoding for group and storage statistics
//! - File identifier helpers (split, slave names, local file-info decode)

pub mod base64;
pub mod charset;
pub mod codec;
pub mod command;
pub mod error;
pub mod file_id;
pub mod frame;
pub mod metadata;
pub mod record;
pub mod stat;

pub use base64::Base64;
pub use charset::{transcode, Charset};
pub use error::{errno, ProtocolError};
pub use file_id::{EmbeddedFileInfo, FileId, FileInfo};
pub use frame::{
    pack_header, recv_header, recv_package, Header, RecvPackage, ResponseHeader, HEADER_SIZE,
};
pub use metadata::{pack_metadata, split_metadata, MetadataFlag, NameValuePair};
pub use record::{decode_records, Record};
pub use stat::{status_caption, GroupStat, StorageStat, StorageStatus};

/// Width of every length field on the wire.
pub const PKG_LEN_SIZE: usize = 8;

/// Fixed width of a group name field.
pub const GROUP_NAME_MAX_LEN: usize = 16;

/// Fixed width of an IP address field (15 usable bytes plus terminator).
pub const IPADDR_SIZE: usize = 16;

/// Fixed width of a domain name field.
pub const DOMAIN_NAME_MAX_SIZE: usize = 128;

/// Fixed width of a server version field.
pub const VERSION_SIZE: usize = 6;

/// Fixed width of a storage ID field.
pub const STORAGE_ID_MAX_SIZE: usize = 16;

/// Fixed width of a file extension field.
pub const FILE_EXT_NAME_MAX_LEN: usize = 6;

/// Fixed width of a slave file prefix field.
pub const FILE_PREFIX_MAX_LEN: usize = 16;

/// Length of the `M00/00/00/` store path prefix of a remote filename.
pub const FILE_PATH_LEN: usize = 10;

/// Length of the Base64 segment embedded in a remote filename.
pub const FILENAME_BASE64_LENGTH: usize = 27;

/// Extra filename bytes carried by files stored inside a trunk.
pub const TRUNK_FILE_INFO_LEN: usize = 16;

/// Separates records in a metadata blob.
pub const RECORD_SEPARATOR: char = '\u{1}';

/// Separates name from value in a metadata record.
pub const FIELD_SEPARATOR: char = '\u{2}';

/// Fetch/update query response: group + IP (15) + port.
pub const TRACKER_QUERY_STORAGE_FETCH_BODY_LEN: usize =
    GROUP_NAME_MAX_LEN + IPADDR_SIZE - 1 + PKG_LEN_SIZE;

/// Store query response: group + IP (15) + port + store path index.
pub const TRACKER_QUERY_STORAGE_STORE_BODY_LEN: usize =
    GROUP_NAME_MAX_LEN + IPADDR_SIZE + PKG_LEN_SIZE;

/// Sentinel size stored in appender file names.
pub const INFINITE_FILE_SIZE: i64 = 256 * 1024 * 1024 * 1024 * 1024 * 1024;

/// Size flag marking an appender file.
pub const APPENDER_FILE_SIZE: i64 = INFINITE_FILE_SIZE;

/// Size flag marking a file stored inside a trunk file.
pub const TRUNK_FILE_MARK_SIZE: i64 = 512 * 1024 * 1024 * 1024 * 1024 * 1024;

/// Length of a regular remote filename.
pub const NORMAL_LOGIC_FILENAME_LENGTH: usize =
    FILE_PATH_LEN + FILENAME_BASE64_LENGTH + FILE_EXT_NAME_MAX_LEN + 1;

/// Length of a remote filename for a file stored inside a trunk.
pub const TRUNK_LOGIC_FILENAME_LENGTH: usize = NORMAL_LOGIC_FILENAME_LENGTH + TRUNK_FILE_INFO_LEN;

/// Upper bound on servers returned by a store-all query.
pub const MAX_SERVERS_EACH_GROUP: usize = 16;

/// Default tracker port.
pub const DEFAULT_TRACKER_PORT: u16 = 22122;
