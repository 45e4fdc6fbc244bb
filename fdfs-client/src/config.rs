//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via FDFS_CONFIG or --config)
//! 3. Environment variables
//!
//! Classic `client.conf` files (INI style, repeatable `tracker_server`) and
//! `fastdfs.*` properties files are also accepted.

use crate::connection::{ConnectionConfig, Endpoint};
use fdfs_protocol::Charset;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CHARSET: &str = "UTF-8";
pub const DEFAULT_SECRET_KEY: &str = "FastDFS1234567890";
pub const DEFAULT_TRACKER_HTTP_PORT: u16 = 80;

/// Charset assumed by `client.conf` files that leave it unset.
const INI_FALLBACK_CHARSET: &str = "ISO8859-1";

const INI_CONNECT_TIMEOUT: &str = "connect_timeout";
const INI_NETWORK_TIMEOUT: &str = "network_timeout";
const INI_CHARSET: &str = "charset";
const INI_ANTI_STEAL_TOKEN: &str = "http.anti_steal_token";
const INI_SECRET_KEY: &str = "http.secret_key";
const INI_TRACKER_HTTP_PORT: &str = "http.tracker_http_port";
const INI_TRACKER_SERVER: &str = "tracker_server";

const PROP_CONNECT_TIMEOUT: &str = "fastdfs.connect_timeout_in_seconds";
const PROP_NETWORK_TIMEOUT: &str = "fastdfs.network_timeout_in_seconds";
const PROP_CHARSET: &str = "fastdfs.charset";
const PROP_ANTI_STEAL_TOKEN: &str = "fastdfs.http_anti_steal_token";
const PROP_SECRET_KEY: &str = "fastdfs.http_secret_key";
const PROP_TRACKER_HTTP_PORT: &str = "fastdfs.http_tracker_http_port";
const PROP_TRACKER_SERVERS: &str = "fastdfs.tracker_servers";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Per read/write timeout in seconds.
    pub network_timeout_secs: u64,
    /// Charset used for text fields on the wire.
    pub charset: String,
    /// HTTP settings.
    pub http: HttpConfig,
    /// Tracker servers as `host:port`.
    pub tracker_servers: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            charset: DEFAULT_CHARSET.to_string(),
            http: HttpConfig::default(),
            tracker_servers: Vec::new(),
        }
    }
}

/// HTTP anti-steal token configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub anti_steal_token: bool,
    pub secret_key: String,
    pub tracker_http_port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            anti_steal_token: false,
            secret_key: DEFAULT_SECRET_KEY.to_string(),
            tracker_http_port: DEFAULT_TRACKER_HTTP_PORT,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("FDFS_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads a `client.conf` style file.
    pub fn from_ini_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let map = load_config(path)?;
        Self::from_ini_map(&map).map_err(|e| e.with_path(path))
    }

    /// Builds configuration from parsed `client.conf` entries.
    pub fn from_ini_map(map: &ConfigMap) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        // Negative timeouts fall back to the defaults.
        let connect = map.get_int(INI_CONNECT_TIMEOUT, DEFAULT_CONNECT_TIMEOUT_SECS as i64)?;
        config.connect_timeout_secs = u64::try_from(connect).unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);
        let network = map.get_int(INI_NETWORK_TIMEOUT, DEFAULT_NETWORK_TIMEOUT_SECS as i64)?;
        config.network_timeout_secs = u64::try_from(network).unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS);

        config.charset = match map.get(INI_CHARSET) {
            Some(charset) if !charset.is_empty() => charset.to_string(),
            _ => INI_FALLBACK_CHARSET.to_string(),
        };

        let trackers = map.get_all(INI_TRACKER_SERVER);
        if trackers.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "item \"{}\" not found",
                INI_TRACKER_SERVER
            )));
        }
        config.tracker_servers = trackers.to_vec();

        let port = map.get_int(INI_TRACKER_HTTP_PORT, DEFAULT_TRACKER_HTTP_PORT as i64)?;
        config.http.tracker_http_port = parse_port(INI_TRACKER_HTTP_PORT, port)?;
        config.http.anti_steal_token = map.get_bool(INI_ANTI_STEAL_TOKEN, false);
        if config.http.anti_steal_token {
            config.http.secret_key = map.get(INI_SECRET_KEY).unwrap_or_default().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    /// Loads a `fastdfs.*` properties file.
    pub fn from_properties_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let map = load_config(path)?;
        Self::from_properties_map(&map).map_err(|e| e.with_path(path))
    }

    /// Builds configuration from `fastdfs.*` properties.
    pub fn from_properties_map(map: &ConfigMap) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let trackers = map.get(PROP_TRACKER_SERVERS).unwrap_or_default();
        if trackers.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "configure item {} is required",
                PROP_TRACKER_SERVERS
            )));
        }
        config.tracker_servers = split_tracker_list(trackers);

        if let Some(value) = map.get_nonempty(PROP_CONNECT_TIMEOUT) {
            config.connect_timeout_secs = parse_value(PROP_CONNECT_TIMEOUT, value)?;
        }
        if let Some(value) = map.get_nonempty(PROP_NETWORK_TIMEOUT) {
            config.network_timeout_secs = parse_value(PROP_NETWORK_TIMEOUT, value)?;
        }
        if let Some(value) = map.get_nonempty(PROP_CHARSET) {
            config.charset = value.to_string();
        }
        if let Some(value) = map.get_nonempty(PROP_ANTI_STEAL_TOKEN) {
            config.http.anti_steal_token = parse_bool(value).ok_or_else(|| {
                ConfigError::ParseError(
                    PathBuf::new(),
                    format!("{}: invalid boolean \"{}\"", PROP_ANTI_STEAL_TOKEN, value),
                )
            })?;
        }
        if let Some(value) = map.get_nonempty(PROP_SECRET_KEY) {
            config.http.secret_key = value.to_string();
        }
        if let Some(value) = map.get_nonempty(PROP_TRACKER_HTTP_PORT) {
            config.http.tracker_http_port = parse_value(PROP_TRACKER_HTTP_PORT, value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(servers) = std::env::var("FDFS_TRACKER_SERVERS") {
            self.tracker_servers = split_tracker_list(&servers);
        }

        if let Ok(timeout) = std::env::var("FDFS_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Ok(timeout) = std::env::var("FDFS_NETWORK_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.network_timeout_secs = secs;
            }
        }

        if let Ok(charset) = std::env::var("FDFS_CHARSET") {
            self.charset = charset;
        }

        if let Ok(key) = std::env::var("FDFS_SECRET_KEY") {
            self.http.secret_key = key;
        }
    }

    /// Checks the charset and every tracker address.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.charset()?;
        for server in &self.tracker_servers {
            parse_endpoint(server)?;
        }
        Ok(())
    }

    /// Returns connect timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Returns network timeout as Duration.
    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_secs)
    }

    pub fn charset(&self) -> Result<Charset, ConfigError> {
        Charset::from_name(&self.charset)
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }

    /// Connection settings derived from the timeouts.
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig::new()
            .with_connect_timeout(self.connect_timeout())
            .with_network_timeout(self.network_timeout())
    }

    /// Parses the tracker list. At least one entry is required.
    pub fn tracker_endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        if self.tracker_servers.is_empty() {
            return Err(ConfigError::ValidationError(
                "no tracker servers configured".to_string(),
            ));
        }
        self.tracker_servers
            .iter()
            .map(|s| parse_endpoint(s))
            .collect()
    }

    /// Anti-steal token for `remote_filename` at unix time `ts`.
    pub fn http_token(&self, remote_filename: &str, ts: i64) -> Result<String, ConfigError> {
        let charset = self.charset()?;
        let encode = |s: &str| {
            charset
                .encode(s)
                .map_err(|e| ConfigError::ValidationError(e.to_string()))
        };
        Ok(fdfs_protocol::codec::get_token(
            &encode(remote_filename)?,
            ts,
            &encode(&self.http.secret_key)?,
        ))
    }

    /// Human-readable description of the effective settings.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "connect_timeout(s) = {}\n",
            self.connect_timeout_secs
        ));
        out.push_str(&format!(
            "network_timeout(s) = {}\n",
            self.network_timeout_secs
        ));
        out.push_str(&format!("charset = {}\n", self.charset));
        out.push_str(&format!(
            "anti_steal_token = {}\n",
            self.http.anti_steal_token
        ));
        out.push_str(&format!(
            "tracker_http_port = {}\n",
            self.http.tracker_http_port
        ));
        out.push_str(&format!(
            "tracker_servers = {}",
            self.tracker_servers.join(",")
        ));
        out
    }
}

/// Key/value entries read from a `client.conf` or properties file.
///
/// A key that appears more than once keeps every value in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigMap {
    entries: HashMap<String, Vec<String>>,
}

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `key = value` lines. Blank lines and `#` comments are skipped.
    pub fn parse(content: &str) -> Self {
        let mut map = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                map.insert(key.trim(), value.trim());
            }
        }
        map
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries
            .entry(key.into())
            .or_default()
            .push(value.into());
    }

    /// First value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values of `key`.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_nonempty(&self, key: &str) -> Option<&str> {
        self.get(key).map(str::trim).filter(|v| !v.is_empty())
    }

    fn get_int(&self, key: &str, default: i64) -> Result<i64, ConfigError> {
        match self.get_nonempty(key) {
            Some(value) => parse_value(key, value),
            None => Ok(default),
        }
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get_nonempty(key).and_then(parse_bool).unwrap_or(default)
    }
}

/// Reads a `key = value` file into a [`ConfigMap`].
pub fn load_config(path: impl AsRef<Path>) -> Result<ConfigMap, ConfigError> {
    let path = path.as_ref();
    let content =
        std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
    Ok(ConfigMap::parse(&content))
}

fn split_tracker_list(servers: &str) -> Vec<String> {
    servers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_endpoint(server: &str) -> Result<Endpoint, ConfigError> {
    server.trim().parse().map_err(|_| {
        ConfigError::ValidationError(format!(
            "invalid tracker server \"{}\", the correct format is host:port",
            server
        ))
    })
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e| {
        ConfigError::ParseError(PathBuf::new(), format!("{}: {} ({})", key, e, value))
    })
}

fn parse_port(key: &str, port: i64) -> Result<u16, ConfigError> {
    u16::try_from(port)
        .map_err(|_| ConfigError::ValidationError(format!("{} out of range: {}", key, port)))
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl ConfigError {
    /// Attaches the source file to parse errors raised from an in-memory map.
    fn with_path(self, path: &Path) -> Self {
        match self {
            ConfigError::ParseError(p, msg) if p.as_os_str().is_empty() => {
                ConfigError::ParseError(path.to_path_buf(), msg)
            }
            other => other,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_http_token() {
        let mut config = ClientConfig::default();
        config.http.secret_key = "s3cret".to_string();
        let token = config.http_token("M00/00/00/a.jpg", 1_600_000_000).unwrap();
        assert_eq!(
            token,
            fdfs_protocol::codec::md5_hex(b"M00/00/00/a.jpgs3cret1600000000")
        );
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(5));
        assert_eq!(config.network_timeout(), Duration::from_secs(30));
        assert_eq!(config.charset, "UTF-8");
        assert!(!config.http.anti_steal_token);
        assert_eq!(config.http.secret_key, "FastDFS1234567890");
        assert_eq!(config.http.tracker_http_port, 80);
        assert!(config.tracker_servers.is_empty());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = ClientConfig::default();
        config.tracker_servers = vec!["10.0.0.1:22122".to_string()];
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: ClientConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_yaml_partial() {
        let yaml = "network_timeout_secs: 10\ntracker_servers:\n  - 10.0.0.1:22122\n";
        let parsed: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.network_timeout_secs, 10);
        assert_eq!(parsed.connect_timeout_secs, 5);
        assert_eq!(parsed.tracker_servers.len(), 1);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "charset: ISO-8859-1").unwrap();
        writeln!(file, "tracker_servers: [\"127.0.0.1:22122\"]").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.charset().unwrap(), Charset::Latin1);
        assert_eq!(
            config.tracker_endpoints().unwrap(),
            vec![Endpoint::new("127.0.0.1", 22122)]
        );
    }

    #[test]
    fn test_missing_file() {
        let result = ClientConfig::from_file("/nonexistent/fdfs.yaml");
        assert!(matches!(result, Err(ConfigError::IoError(_, _))));
    }

    #[test]
    fn test_config_map_parse() {
        let map = ConfigMap::parse(
            "# comment\n\nconnect_timeout = 2\ntracker_server=10.0.0.1:22122\n tracker_server = 10.0.0.2:22122 \nbogus line\n",
        );
        assert_eq!(map.get("connect_timeout"), Some("2"));
        assert_eq!(
            map.get_all("tracker_server"),
            &["10.0.0.1:22122".to_string(), "10.0.0.2:22122".to_string()]
        );
        assert!(map.get_all("missing").is_empty());
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_from_ini_map() {
        let map = ConfigMap::parse(
            "connect_timeout = 2\nnetwork_timeout = -1\ntracker_server = 10.0.0.1:22122\ntracker_server = 10.0.0.2:22122\nhttp.tracker_http_port = 8080\nhttp.anti_steal_token = no\nhttp.secret_key = ignored\n",
        );
        let config = ClientConfig::from_ini_map(&map).unwrap();
        assert_eq!(config.connect_timeout_secs, 2);
        assert_eq!(config.network_timeout_secs, DEFAULT_NETWORK_TIMEOUT_SECS);
        assert_eq!(config.charset, "ISO8859-1");
        assert_eq!(config.tracker_servers.len(), 2);
        assert_eq!(config.http.tracker_http_port, 8080);
        assert!(!config.http.anti_steal_token);
        assert_eq!(config.http.secret_key, DEFAULT_SECRET_KEY);
    }

    #[test]
    fn test_ini_secret_key_with_token() {
        let map = ConfigMap::parse(
            "charset = UTF-8\ntracker_server = 10.0.0.1:22122\nhttp.anti_steal_token = true\nhttp.secret_key = s3cret\n",
        );
        let config = ClientConfig::from_ini_map(&map).unwrap();
        assert!(config.http.anti_steal_token);
        assert_eq!(config.http.secret_key, "s3cret");
        assert_eq!(config.charset, "UTF-8");
    }

    #[test]
    fn test_ini_requires_tracker() {
        let map = ConfigMap::parse("connect_timeout = 2\n");
        let result = ClientConfig::from_ini_map(&map);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_ini_invalid_tracker() {
        let map = ConfigMap::parse("tracker_server = 10.0.0.1\n");
        let result = ClientConfig::from_ini_map(&map);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_from_ini_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connect_timeout = abc").unwrap();
        writeln!(file, "tracker_server = 10.0.0.1:22122").unwrap();

        let result = ClientConfig::from_ini_file(file.path());
        match result {
            Err(ConfigError::ParseError(path, _)) => assert_eq!(path, file.path()),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_from_properties_map() {
        let map = ConfigMap::parse(
            "fastdfs.tracker_servers = 10.0.11.245:22122, 10.0.11.246:22122\nfastdfs.connect_timeout_in_seconds = 3\nfastdfs.http_anti_steal_token = true\nfastdfs.http_secret_key = key\nfastdfs.charset = UTF-8\n",
        );
        let config = ClientConfig::from_properties_map(&map).unwrap();
        assert_eq!(
            config.tracker_endpoints().unwrap(),
            vec![
                Endpoint::new("10.0.11.245", 22122),
                Endpoint::new("10.0.11.246", 22122)
            ]
        );
        assert_eq!(config.connect_timeout_secs, 3);
        assert_eq!(config.network_timeout_secs, 30);
        assert!(config.http.anti_steal_token);
        assert_eq!(config.http.secret_key, "key");
    }

    #[test]
    fn test_properties_require_trackers() {
        let map = ConfigMap::parse("fastdfs.charset = UTF-8\n");
        let result = ClientConfig::from_properties_map(&map);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_properties_bad_number() {
        let map = ConfigMap::parse(
            "fastdfs.tracker_servers = 10.0.0.1:22122\nfastdfs.network_timeout_in_seconds = soon\n",
        );
        let result = ClientConfig::from_properties_map(&map);
        assert!(matches!(result, Err(ConfigError::ParseError(_, _))));
    }

    #[test]
    fn test_unsupported_charset() {
        let config = ClientConfig {
            charset: "GB18030".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_tracker_endpoints_empty() {
        let result = ClientConfig::default().tracker_endpoints();
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_summary() {
        let config = ClientConfig {
            tracker_servers: vec!["a:1".to_string(), "b:2".to_string()],
            ..ClientConfig::default()
        };
        let summary = config.summary();
        assert!(summary.contains("charset = UTF-8"));
        assert!(summary.contains("tracker_servers = a:1,b:2"));
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::ValidationError("bad".to_string());
        assert_eq!(err.to_string(), "configuration validation failed: bad");
    }
}
