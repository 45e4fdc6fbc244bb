//! File identifiers and the metadata embedded in remote filenames.
//!
//! A remote filename looks like `M00/00/00/<27 base64 chars><ext>`. The
//! Base64 segment decodes to 18 bytes (trailing padding dropped by decode):
//!
//! ```text
//! +---------+-------------+-----------+--------+
//! | src ip  | create time | file size | crc32  |
//! | 4 bytes |   4 bytes   |  8 bytes  | 4 bytes|
//! +---------+-------------+-----------+--------+
//! ```
//!
//! The size field doubles as a flag word. Appender and trunk files, and
//! slave files with longer names, cannot be described by the embedded data;
//! those must be queried from the storage node.

use crate::base64::Base64;
use crate::codec::{buff2int32, buff2long, field_str, get_ip_address};
use crate::error::ProtocolError;
use crate::{
    APPENDER_FILE_SIZE, FILENAME_BASE64_LENGTH, FILE_EXT_NAME_MAX_LEN, FILE_PATH_LEN,
    IPADDR_SIZE, NORMAL_LOGIC_FILENAME_LENGTH, PKG_LEN_SIZE, TRUNK_FILE_MARK_SIZE,
    TRUNK_LOGIC_FILENAME_LENGTH,
};
use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Separator between group name and remote filename in a file id.
pub const FILE_ID_SEPARATOR: char = '/';

/// Length of a query-file-info response body.
pub const QUERY_FILE_INFO_BODY_LEN: usize = 3 * PKG_LEN_SIZE + IPADDR_SIZE;

/// Minimum master filename length accepted for slave name derivation.
const MIN_MASTER_FILENAME_LEN: usize = 28 + FILE_EXT_NAME_MAX_LEN;

/// A `group/remote_filename` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct FileId {
    pub group_name: String,
    pub remote_filename: String,
}

impl FileId {
    pub fn new(group_name: impl Into<String>, remote_filename: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            remote_filename: remote_filename.into(),
        }
    }
}

impl FromStr for FileId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, filename) = split_file_id(s)?;
        Ok(Self::new(group, filename))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.group_name, FILE_ID_SEPARATOR, self.remote_filename
        )
    }
}

/// Splits a file id at its first `/`.
pub fn split_file_id(file_id: &str) -> Result<(&str, &str), ProtocolError> {
    match file_id.find(FILE_ID_SEPARATOR) {
        Some(pos) if pos > 0 && pos < file_id.len() - 1 => {
            Ok((&file_id[..pos], &file_id[pos + 1..]))
        }
        _ => Err(ProtocolError::InvalidArgument(format!(
            "invalid file id \"{}\"",
            file_id
        ))),
    }
}

/// Derives a slave filename from its master's name.
///
/// `prefix` is inserted immediately before the extension. An empty
/// `ext_name` keeps the master's extension; otherwise it replaces it, with or
/// without a leading dot.
pub fn gen_slave_filename(
    master_filename: &str,
    prefix: &str,
    ext_name: &str,
) -> Result<String, ProtocolError> {
    if master_filename.len() < MIN_MASTER_FILENAME_LEN {
        return Err(ProtocolError::InvalidArgument(format!(
            "master filename \"{}\" is invalid",
            master_filename
        )));
    }

    // Only the tail may hold the extension; the rest is path and Base64.
    let from = master_filename.len() - (FILE_EXT_NAME_MAX_LEN + 1);
    let dot_index = master_filename.as_bytes()[from..]
        .iter()
        .rposition(|&b| b == b'.')
        .map(|pos| from + pos);

    let true_ext = if !ext_name.is_empty() {
        if ext_name.starts_with('.') {
            ext_name.to_string()
        } else {
            format!(".{}", ext_name)
        }
    } else {
        dot_index
            .map(|dot| master_filename[dot..].to_string())
            .unwrap_or_default()
    };

    if true_ext.is_empty() && prefix == "-m" {
        return Err(ProtocolError::InvalidArgument(format!(
            "prefix \"{}\" is invalid",
            prefix
        )));
    }

    let base = match dot_index {
        Some(dot) => &master_filename[..dot],
        None => master_filename,
    };
    Ok(format!("{}{}{}", base, prefix, true_ext))
}

/// Extension of a local file, if short enough to be stored.
///
/// Takes the text after the last `.` of the file name when the dot is not
/// the first character and at most six characters follow it.
pub fn local_ext_name(local_filename: &Path) -> Option<&str> {
    let name = local_filename.file_name()?.to_str()?;
    let pos = name.rfind('.')?;
    if pos > 0 && name.len() - pos <= FILE_EXT_NAME_MAX_LEN + 1 {
        Some(&name[pos + 1..])
    } else {
        None
    }
}

/// Source node, size, creation time and checksum of a stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub source_ip_addr: String,
    pub file_size: i64,
    pub create_timestamp: DateTime<Utc>,
    pub crc32: u32,
}

impl FileInfo {
    pub fn new(file_size: i64, create_timestamp: i64, crc32: u32, source_ip_addr: String) -> Self {
        Self {
            source_ip_addr,
            file_size,
            create_timestamp: Utc
                .timestamp_opt(create_timestamp, 0)
                .single()
                .unwrap_or_default(),
            crc32,
        }
    }

    /// Parses a query-file-info response body.
    pub fn from_query_response(body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() != QUERY_FILE_INFO_BODY_LEN {
            return Err(ProtocolError::InvalidResponse(format!(
                "file info body is {} bytes, expected {}",
                body.len(),
                QUERY_FILE_INFO_BODY_LEN
            )));
        }

        let file_size = buff2long(body, 0);
        let create_timestamp = buff2long(body, PKG_LEN_SIZE);
        let crc32 = buff2long(body, 2 * PKG_LEN_SIZE) as u32;
        let source_ip_addr = field_str(&body[3 * PKG_LEN_SIZE..]);

        Ok(Self::new(file_size, create_timestamp, crc32, source_ip_addr))
    }
}

impl fmt::Display for FileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "source_ip_addr = {}, file_size = {}, create_timestamp = {}, crc32 = {}",
            self.source_ip_addr,
            self.file_size,
            self.create_timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.crc32
        )
    }
}

/// Result of decoding the metadata embedded in a remote filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddedFileInfo {
    /// The filename fully describes the file.
    Decoded(FileInfo),
    /// Slave, appender or trunk file; ask the storage node.
    QueryServer,
}

/// Decodes file info from a remote filename without any network I/O.
pub fn decode_file_info(remote_filename: &str) -> Result<EmbeddedFileInfo, ProtocolError> {
    let len = remote_filename.len();
    if len < NORMAL_LOGIC_FILENAME_LENGTH {
        return Err(ProtocolError::InvalidArgument(format!(
            "remote filename \"{}\" is too short",
            remote_filename
        )));
    }

    let segment = remote_filename
        .get(FILE_PATH_LEN..FILE_PATH_LEN + FILENAME_BASE64_LENGTH)
        .ok_or_else(|| {
            ProtocolError::MalformedInput(format!(
                "remote filename \"{}\" has no metadata segment",
                remote_filename
            ))
        })?;
    let buff = Base64::filename().decode_auto(segment)?;
    if buff.len() < 20 {
        return Err(ProtocolError::MalformedInput(format!(
            "metadata segment decodes to {} bytes",
            buff.len()
        )));
    }

    let mut file_size = buff2long(&buff, 8);
    if len > TRUNK_LOGIC_FILENAME_LENGTH
        || (len > NORMAL_LOGIC_FILENAME_LENGTH && (file_size & TRUNK_FILE_MARK_SIZE) == 0)
        || (file_size & APPENDER_FILE_SIZE) != 0
    {
        return Ok(EmbeddedFileInfo::QueryServer);
    }

    // Top bit set: low 32 bits hold the real size.
    if file_size < 0 {
        file_size &= 0xFFFF_FFFF;
    }

    Ok(EmbeddedFileInfo::Decoded(FileInfo::new(
        file_size,
        i64::from(buff2int32(&buff, 4)),
        buff2int32(&buff, 16) as u32,
        get_ip_address(&buff, 0),
    )))
}

/// Builds a remote filename carrying the given embedded metadata.
///
/// Mirrors the storage server's naming so local decoding can be exercised.
pub fn encode_remote_filename(
    store_path: &str,
    ip: [u8; 4],
    create_timestamp: i32,
    file_size: i64,
    crc32: u32,
    suffix: &str,
) -> String {
    let mut buff = Vec::with_capacity(20);
    buff.extend_from_slice(&ip);
    buff.extend_from_slice(&create_timestamp.to_be_bytes());
    buff.extend_from_slice(&file_size.to_be_bytes());
    buff.extend_from_slice(&crc32.to_be_bytes());
    let encoded = Base64::filename().encode(&buff);
    let segment: String = encoded.chars().take(FILENAME_BASE64_LENGTH).collect();
    format!("{}{}{}", store_path, segment, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str = "M00/00/00/wKgACl5Xv5OAAAAAAAAAAAAAAAA123.jpg";

    fn sample_name(file_size: i64, suffix: &str) -> String {
        encode_remote_filename(
            "M00/00/00/",
            [192, 168, 0, 10],
            1_600_000_000,
            file_size,
            0xDEAD_BEEF,
            suffix,
        )
    }

    #[test]
    fn test_split_file_id() {
        assert_eq!(
            split_file_id("group1/M00/00/00/a.jpg").unwrap(),
            ("group1", "M00/00/00/a.jpg")
        );
        assert!(split_file_id("/M00/a.jpg").is_err());
        assert!(split_file_id("group1/").is_err());
        assert!(split_file_id("group1").is_err());
    }

    #[test]
    fn test_file_id_display_and_parse() {
        let id: FileId = "group1/M00/00/00/a.jpg".parse().unwrap();
        assert_eq!(id.group_name, "group1");
        assert_eq!(id.to_string(), "group1/M00/00/00/a.jpg");
    }

    #[test]
    fn test_gen_slave_keeps_extension() {
        let slave = gen_slave_filename(MASTER, "-big", "").unwrap();
        assert_eq!(slave, "M00/00/00/wKgACl5Xv5OAAAAAAAAAAAAAAAA123-big.jpg");
    }

    #[test]
    fn test_gen_slave_replaces_extension() {
        let slave = gen_slave_filename(MASTER, "_150x150", "png").unwrap();
        assert!(slave.ends_with("123_150x150.png"));
        let slave = gen_slave_filename(MASTER, "_s", ".webp").unwrap();
        assert!(slave.ends_with("123_s.webp"));
    }

    #[test]
    fn test_gen_slave_without_dot() {
        let master = "M00/00/00/wKgACl5Xv5OAAAAAAAAAAAAAAAA123456";
        let slave = gen_slave_filename(master, "-x", "").unwrap();
        assert_eq!(slave, format!("{}-x", master));
    }

    #[test]
    fn test_gen_slave_reserved_prefix() {
        let master = "M00/00/00/wKgACl5Xv5OAAAAAAAAAAAAAAAA123456";
        let result = gen_slave_filename(master, "-m", "");
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
        assert!(gen_slave_filename(master, "-m", "txt").is_ok());
    }

    #[test]
    fn test_gen_slave_short_master() {
        let result = gen_slave_filename("M00/00/00/short.jpg", "-big", "");
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
    }

    #[test]
    fn test_local_ext_name() {
        assert_eq!(local_ext_name(Path::new("/tmp/photo.jpeg")), Some("jpeg"));
        assert_eq!(local_ext_name(Path::new("archive.tar.gz")), Some("gz"));
        assert_eq!(local_ext_name(Path::new(".bashrc")), None);
        assert_eq!(local_ext_name(Path::new("notes.markdown")), None);
        assert_eq!(local_ext_name(Path::new("/a.dir/README")), None);
    }

    #[test]
    fn test_decode_file_info() {
        let name = sample_name(4096, ".txt\0\0\0");
        assert_eq!(name.len(), NORMAL_LOGIC_FILENAME_LENGTH);

        match decode_file_info(&name).unwrap() {
            EmbeddedFileInfo::Decoded(info) => {
                assert_eq!(info.source_ip_addr, "192.168.0.10");
                assert_eq!(info.file_size, 4096);
                assert_eq!(info.create_timestamp.timestamp(), 1_600_000_000);
                assert_eq!(info.crc32, 0xDEAD_BEEF);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_large_file_masks_size() {
        let size = i64::MIN | 0x1234_5678;
        let name = sample_name(size, ".bin\0\0\0");
        match decode_file_info(&name).unwrap() {
            EmbeddedFileInfo::Decoded(info) => assert_eq!(info.file_size, 0x1234_5678),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_appender_needs_query() {
        let name = sample_name(APPENDER_FILE_SIZE | 10, ".log\0\0\0");
        assert_eq!(
            decode_file_info(&name).unwrap(),
            EmbeddedFileInfo::QueryServer
        );
    }

    #[test]
    fn test_decode_slave_needs_query() {
        // Longer than a normal name without the trunk mark.
        let name = sample_name(100, "-big.jpg\0\0\0");
        assert_eq!(
            decode_file_info(&name).unwrap(),
            EmbeddedFileInfo::QueryServer
        );
    }

    #[test]
    fn test_decode_trunk_file() {
        let suffix = format!("{}.jpg\0\0", "T".repeat(crate::TRUNK_FILE_INFO_LEN + 1));
        let name = sample_name(TRUNK_FILE_MARK_SIZE | 2048, &suffix);
        assert_eq!(name.len(), TRUNK_LOGIC_FILENAME_LENGTH);
        match decode_file_info(&name).unwrap() {
            EmbeddedFileInfo::Decoded(info) => {
                assert_eq!(info.file_size, TRUNK_FILE_MARK_SIZE | 2048)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_short_filename() {
        let result = decode_file_info("M00/00/00/abc.jpg");
        assert!(matches!(result, Err(ProtocolError::InvalidArgument(_))));
    }

    #[test]
    fn test_from_query_response() {
        let mut body = Vec::new();
        body.extend_from_slice(&10i64.to_be_bytes());
        body.extend_from_slice(&1_600_000_000i64.to_be_bytes());
        body.extend_from_slice(&0xDEAD_BEEFi64.to_be_bytes());
        body.extend_from_slice(b"10.0.0.7\0\0\0\0\0\0\0\0");

        let info = FileInfo::from_query_response(&body).unwrap();
        assert_eq!(info.file_size, 10);
        assert_eq!(info.crc32, 0xDEAD_BEEF);
        assert_eq!(info.source_ip_addr, "10.0.0.7");

        assert!(FileInfo::from_query_response(&body[..39]).is_err());
    }
}
