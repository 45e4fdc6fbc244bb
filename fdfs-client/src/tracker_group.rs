//! Tracker connection pool.
//!
//! Holds the ordered tracker list and a rotation cursor shared by every
//! caller. Each [`TrackerGroup::get_connection`] advances the cursor and
//! connects to that tracker; on failure every other tracker is tried in list
//! order. Only connecting is retried, never a request in flight.

use crate::config::ClientConfig;
use crate::connection::{Connection, ConnectionConfig, Endpoint};
use crate::error::ClientError;
use parking_lot::Mutex;

/// Ordered tracker endpoints with a round-robin cursor.
#[derive(Debug)]
pub struct TrackerGroup {
    endpoints: Vec<Endpoint>,
    /// Always in `0..endpoints.len()`.
    cursor: Mutex<usize>,
    config: ConnectionConfig,
}

impl TrackerGroup {
    /// Creates a group. The endpoint list must not be empty.
    pub fn new(endpoints: Vec<Endpoint>, config: ConnectionConfig) -> Result<Self, ClientError> {
        if endpoints.is_empty() {
            return Err(ClientError::NoTrackerAvailable);
        }
        Ok(Self {
            endpoints,
            cursor: Mutex::new(0),
            config,
        })
    }

    /// Builds a group from the configured tracker list and timeouts.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::new(config.tracker_endpoints()?, config.connection_config())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn connection_config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Current cursor position.
    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    /// Connects to the next tracker in rotation, failing over to the others.
    ///
    /// When a fallback tracker succeeds the cursor moves to it, unless another
    /// caller has already moved the cursor since this call advanced it.
    pub async fn get_connection(&self) -> Result<Connection, ClientError> {
        let current = {
            let mut cursor = self.cursor.lock();
            *cursor = (*cursor + 1) % self.endpoints.len();
            *cursor
        };

        let mut last_err = match self.get_connection_by_index(current).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                tracing::warn!(
                    "Connect to tracker {} failed: {}",
                    self.endpoints[current],
                    e
                );
                e
            }
        };

        for index in (0..self.endpoints.len()).filter(|&i| i != current) {
            match self.get_connection_by_index(index).await {
                Ok(conn) => {
                    self.settle_cursor(current, index);
                    tracing::debug!("Failed over to tracker {}", self.endpoints[index]);
                    return Ok(conn);
                }
                Err(e) => {
                    tracing::warn!(
                        "Connect to tracker {} failed: {}",
                        self.endpoints[index],
                        e
                    );
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    /// Parks the cursor on the fallback tracker `index`, unless it has moved
    /// away from `advanced` since this caller set it.
    fn settle_cursor(&self, advanced: usize, index: usize) {
        let mut cursor = self.cursor.lock();
        if *cursor == advanced {
            *cursor = index;
        }
    }

    /// Connects to the tracker at `index`. No retry, no cursor change.
    pub async fn get_connection_by_index(&self, index: usize) -> Result<Connection, ClientError> {
        let endpoint = self.endpoints.get(index).ok_or_else(|| {
            ClientError::InvalidArgument(format!(
                "tracker index {} out of range 0..{}",
                index,
                self.endpoints.len()
            ))
        })?;
        Connection::connect(endpoint, &self.config).await
    }
}
