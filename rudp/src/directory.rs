//! Collaborator interfaces consulted before a connection exists.
//!
//! - [`Directory`] maps a logical peer name to a socket address.
//! - [`LeaseService`] hands out the local address to bind.
//!
//! Neither is touched again once the handshake starts.  The in-memory
//! implementations here are what the CLI uses.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("no address known for {0:?}")]
    NotFound(String),
    #[error("invalid host entry {0:?}; expected NAME=IP:PORT")]
    InvalidEntry(String),
    #[error("no address lease available")]
    NoLease,
}

/// Name-to-address resolution.
pub trait Directory {
    fn lookup(&self, name: &str) -> Result<SocketAddr, LookupError>;
}

/// Local address assignment.
pub trait LeaseService {
    fn request(&self) -> Result<IpAddr, LookupError>;
}

/// A fixed name table.  Names are case-insensitive; a name that already
/// parses as `IP:PORT` resolves to itself.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: HashMap<String, SocketAddr>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, addr: SocketAddr) {
        self.entries.insert(name.to_lowercase(), addr);
    }

    /// Build a table from `NAME=IP:PORT` entries.
    pub fn from_entries<I, S>(entries: I) -> Result<Self, LookupError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dir = Self::new();
        for entry in entries {
            let entry = entry.as_ref();
            let (name, addr) = entry
                .split_once('=')
                .ok_or_else(|| LookupError::InvalidEntry(entry.to_string()))?;
            let addr = addr
                .trim()
                .parse()
                .map_err(|_| LookupError::InvalidEntry(entry.to_string()))?;
            dir.insert(name.trim(), addr);
        }
        Ok(dir)
    }
}

impl Directory for StaticDirectory {
    fn lookup(&self, name: &str) -> Result<SocketAddr, LookupError> {
        if let Some(addr) = self.entries.get(&name.to_lowercase()) {
            log::debug!("[directory] {name} → {addr}");
            return Ok(*addr);
        }
        name.parse().map_err(|_| LookupError::NotFound(name.to_string()))
    }
}

/// Always grants the same address.
#[derive(Debug, Clone, Copy)]
pub struct FixedLease(pub IpAddr);

impl LeaseService for FixedLease {
    fn request(&self) -> Result<IpAddr, LookupError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_entries_resolve_case_insensitively() {
        let dir = StaticDirectory::from_entries(["Source=127.0.0.1:9000"]).unwrap();
        assert_eq!(dir.lookup("source").unwrap(), "127.0.0.1:9000".parse().unwrap());
        assert_eq!(dir.lookup("SOURCE").unwrap(), "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn literal_address_resolves_to_itself() {
        let dir = StaticDirectory::new();
        assert_eq!(dir.lookup("10.0.0.2:53").unwrap(), "10.0.0.2:53".parse().unwrap());
    }

    #[test]
    fn unknown_name_is_not_found() {
        let dir = StaticDirectory::new();
        assert_eq!(
            dir.lookup("nowhere"),
            Err(LookupError::NotFound("nowhere".into()))
        );
    }

    #[test]
    fn malformed_entries_rejected() {
        assert!(matches!(
            StaticDirectory::from_entries(["no-equals-sign"]),
            Err(LookupError::InvalidEntry(_))
        ));
        assert!(matches!(
            StaticDirectory::from_entries(["peer=not-an-addr"]),
            Err(LookupError::InvalidEntry(_))
        ));
    }

    #[test]
    fn fixed_lease_grants_its_address() {
        let lease = FixedLease("127.0.0.1".parse().unwrap());
        assert_eq!(lease.request().unwrap(), IpAddr::from([127, 0, 0, 1]));
    }
}
