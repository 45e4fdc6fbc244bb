//! Command codes carried in the header's command byte.

/// Closes a session.
pub const QUIT: u8 = 82;

/// Liveness probe.
pub const ACTIVE_TEST: u8 = 111;

/// Response command shared by trackers and storage nodes.
pub const RESP: u8 = 100;

/// Tracker commands.
pub mod tracker {
    pub const SERVER_LIST_GROUP: u8 = 91;
    pub const SERVER_LIST_STORAGE: u8 = 92;
    pub const SERVER_DELETE_STORAGE: u8 = 93;
    pub const QUERY_STORE_WITHOUT_GROUP_ONE: u8 = 101;
    pub const QUERY_FETCH_ONE: u8 = 102;
    pub const QUERY_UPDATE: u8 = 103;
    pub const QUERY_STORE_WITH_GROUP_ONE: u8 = 104;
    pub const QUERY_FETCH_ALL: u8 = 105;
    pub const QUERY_STORE_WITHOUT_GROUP_ALL: u8 = 106;
    pub const QUERY_STORE_WITH_GROUP_ALL: u8 = 107;
}

/// Storage commands.
pub mod storage {
    pub const UPLOAD_FILE: u8 = 11;
    pub const DELETE_FILE: u8 = 12;
    pub const SET_METADATA: u8 = 13;
    pub const DOWNLOAD_FILE: u8 = 14;
    pub const GET_METADATA: u8 = 15;
    pub const UPLOAD_SLAVE_FILE: u8 = 21;
    pub const QUERY_FILE_INFO: u8 = 22;
    pub const UPLOAD_APPENDER_FILE: u8 = 23;
    pub const APPEND_FILE: u8 = 24;
    pub const MODIFY_FILE: u8 = 34;
    pub const TRUNCATE_FILE: u8 = 36;
}
