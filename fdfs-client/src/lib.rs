//! # fdfs-client
//!
//! Client library for FastDFS.
//!
//! This crate provides:
//! - Tracker connection pool with round-robin selection and failover
//! - Tracker queries (store/fetch/update routing, group and storage listings)
//! - Storage operations (upload, download, append, modify, truncate, delete,
//!   metadata, file info)
//! - Streaming upload sources and download sinks
//! - Configuration loading from YAML, INI-style and properties files

pub mod config;
pub mod connection;
pub mod error;
pub mod storage;
pub mod tracker;
pub mod tracker_group;
pub mod transfer;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{ClientConfig, ConfigError, ConfigMap, HttpConfig};
pub use connection::{Connection, ConnectionConfig, Endpoint};
pub use error::ClientError;
pub use storage::StorageClient;
pub use tracker::{StorageServer, TrackerClient};
pub use tracker_group::TrackerGroup;
pub use transfer::{
    BufferSource, CallbackSink, DownloadSink, ReaderSource, UploadSink, UploadSource, WriterSink,
};
