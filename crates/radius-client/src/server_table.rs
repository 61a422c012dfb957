//! Shared table of configured upstream servers
//!
//! Insertion order is the failover order: a query scans forward from its
//! current index for the first enabled server. The table is the only state
//! shared between workers; every access holds the mutex for a short O(n)
//! scan over a small list.

use crate::config::ServerSettings;
use crate::error::QueryError;
use std::net::SocketAddr;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct Server {
    enabled: bool,
    settings: ServerSettings,
}

/// Mutex-guarded, insertion-ordered server list.
#[derive(Debug)]
pub struct ServerTable {
    servers: Mutex<Vec<Server>>,
    capacity: usize,
}

impl ServerTable {
    pub fn new(capacity: usize) -> Self {
        ServerTable {
            servers: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a server. New servers enter enabled.
    pub fn add(&self, settings: ServerSettings) -> Result<(), QueryError> {
        settings.validate()?;
        let mut servers = self.servers.lock().unwrap();
        if servers.len() >= self.capacity {
            return Err(QueryError::TooManyServers(self.capacity));
        }
        servers.push(Server {
            enabled: true,
            settings,
        });
        Ok(())
    }

    /// Remove the first server with the given address. Relative order of the
    /// survivors is preserved.
    pub fn remove_by_addr(&self, addr: SocketAddr) -> bool {
        let mut servers = self.servers.lock().unwrap();
        match servers.iter().position(|s| s.settings.address == addr) {
            Some(idx) => {
                servers.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Enable or disable a server without removing it from the table.
    pub fn set_enabled(&self, addr: SocketAddr, enabled: bool) -> bool {
        let mut servers = self.servers.lock().unwrap();
        match servers.iter_mut().find(|s| s.settings.address == addr) {
            Some(server) => {
                server.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.servers.lock().unwrap().clear();
    }

    /// Locate the first enabled server at or after `from_idx`.
    ///
    /// Returns the resolved index and a settings snapshot taken under the
    /// lock; the snapshot stays valid however the table changes afterwards.
    /// `Err(NoServers)` means the table is empty, `Err(ServersExhausted)`
    /// that no enabled server remains in the scan range.
    pub fn next_enabled(&self, from_idx: usize) -> Result<(usize, ServerSettings), QueryError> {
        let servers = self.servers.lock().unwrap();
        if servers.is_empty() {
            return Err(QueryError::NoServers);
        }
        servers
            .iter()
            .enumerate()
            .skip(from_idx)
            .find(|(_, s)| s.enabled)
            .map(|(idx, s)| (idx, s.settings.clone()))
            .ok_or(QueryError::ServersExhausted)
    }
}
