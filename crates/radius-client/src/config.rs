//! Client and server settings

use crate::error::QueryError;
use radius_proto::USER_PASSWORD_MAX_LEN;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use thiserror::Error;

/// Server table capacity is rounded up to a multiple of this.
const SERVERS_ALLOC_STEP: usize = 4;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Per-server connection settings.
///
/// The four retransmission knobs follow RFC 2865 Section 9 vocabulary:
/// initial interval, per-try ceiling, aggregate duration budget, and try
/// count budget. A zero ceiling or budget means unbounded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Server address (host:port)
    pub address: SocketAddr,

    /// Shared secret for this server
    pub secret: String,

    /// Initial retransmission interval in milliseconds
    #[serde(default = "default_retrans_time_init")]
    pub retrans_time_init: u64,

    /// Maximum single retransmission interval in milliseconds (0 = unbounded)
    #[serde(default = "default_retrans_time_max")]
    pub retrans_time_max: u64,

    /// Total retransmission budget in milliseconds (0 = unbounded)
    #[serde(default = "default_retrans_duration_max")]
    pub retrans_duration_max: u64,

    /// Maximum number of tries per server (0 = unbounded)
    #[serde(default = "default_retrans_count_max")]
    pub retrans_count_max: usize,
}

fn default_retrans_time_init() -> u64 {
    1000
}

fn default_retrans_time_max() -> u64 {
    16_000
}

fn default_retrans_duration_max() -> u64 {
    45_000
}

fn default_retrans_count_max() -> usize {
    5
}

impl ServerSettings {
    pub fn new(address: SocketAddr, secret: impl Into<String>) -> Self {
        ServerSettings {
            address,
            secret: secret.into(),
            retrans_time_init: default_retrans_time_init(),
            retrans_time_max: default_retrans_time_max(),
            retrans_duration_max: default_retrans_duration_max(),
            retrans_count_max: default_retrans_count_max(),
        }
    }

    /// Validate settings before the server enters the table.
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.secret.is_empty() {
            return Err(QueryError::InvalidArgument("server secret is empty"));
        }
        if self.secret.len() >= USER_PASSWORD_MAX_LEN {
            return Err(QueryError::InvalidArgument("server secret too long"));
        }
        if self.retrans_time_init == 0 {
            return Err(QueryError::InvalidArgument("retrans_time_init is zero"));
        }
        Ok(())
    }

    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.as_bytes()
    }
}

/// Client-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Maximum number of configured servers
    #[serde(default = "default_servers_max")]
    pub servers_max: usize,

    /// Per-worker submission queue depth
    #[serde(default = "default_queue_max")]
    pub queue_max: usize,

    /// Per-worker, per-family socket pool floor
    #[serde(default = "default_sockets_min")]
    pub sockets_min: usize,

    /// Per-worker, per-family socket pool ceiling
    #[serde(default = "default_sockets_max")]
    pub sockets_max: usize,

    /// SO_SNDBUF hint for client sockets, bytes (best-effort)
    #[serde(default = "default_skt_buf")]
    pub skt_snd_buf: usize,

    /// SO_RCVBUF hint for client sockets, bytes (best-effort)
    #[serde(default = "default_skt_buf")]
    pub skt_rcv_buf: usize,

    /// NAS-Identifier appended to every Access-Request (optional)
    #[serde(default)]
    pub nas_identifier: Option<String>,

    /// Number of worker tasks (0 = one per available core)
    #[serde(default)]
    pub workers: usize,

    /// Configured upstream servers
    #[serde(default)]
    pub servers: Vec<ServerSettings>,
}

fn default_servers_max() -> usize {
    8
}

fn default_queue_max() -> usize {
    1024
}

fn default_sockets_min() -> usize {
    1
}

fn default_sockets_max() -> usize {
    4
}

fn default_skt_buf() -> usize {
    128 * 1024
}

impl Default for ClientSettings {
    fn default() -> Self {
        ClientSettings {
            servers_max: default_servers_max(),
            queue_max: default_queue_max(),
            sockets_min: default_sockets_min(),
            sockets_max: default_sockets_max(),
            skt_snd_buf: default_skt_buf(),
            skt_rcv_buf: default_skt_buf(),
            nas_identifier: None,
            workers: 0,
            servers: vec![],
        }
    }
}

impl ClientSettings {
    /// Load settings from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let settings: ClientSettings = serde_json::from_str(&contents)?;
        settings
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(settings)
    }

    /// Write settings to a JSON file
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Example configuration with one local server
    pub fn example() -> Self {
        ClientSettings {
            nas_identifier: Some("radius-client".to_string()),
            servers: vec![ServerSettings::new(
                "127.0.0.1:1812".parse().expect("valid literal"),
                "testing123",
            )],
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if let Some(ref nas) = self.nas_identifier {
            if nas.len() > 253 {
                return Err(QueryError::InvalidArgument("nas_identifier too long"));
            }
        }
        for server in &self.servers {
            server.validate()?;
        }
        Ok(())
    }

    /// Clamp settings into usable ranges: at least one socket per pool, a
    /// ceiling no lower than the floor, and server capacity rounded up to
    /// the allocation step.
    pub(crate) fn normalized(mut self) -> Self {
        if self.sockets_min == 0 {
            self.sockets_min = 1;
        }
        if self.sockets_max < self.sockets_min {
            self.sockets_max = self.sockets_min;
        }
        self.servers_max = self
            .servers_max
            .max(1)
            .next_multiple_of(SERVERS_ALLOC_STEP);
        if self.queue_max == 0 {
            self.queue_max = default_queue_max();
        }
        if self.workers == 0 {
            self.workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
        }
        self
    }
}
