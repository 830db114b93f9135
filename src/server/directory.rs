//! Static replica directory: replica identity -> network address, known
//! identically by every node and read-only after construction.

use std::collections::HashSet;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

use crate::utils::PaxstoreError;

/// Server replica ID type.
pub type ReplicaId = u8;

/// Address info of one replica's peer-to-peer RPC endpoint.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ReplicaInfo {
    id: ReplicaId,
    host: String,
    port: u16,
}

impl ReplicaInfo {
    pub fn new(id: ReplicaId, host: impl Into<String>, port: u16) -> Self {
        ReplicaInfo {
            id,
            host: host.into(),
            port,
        }
    }

    pub fn id(&self) -> ReplicaId {
        self.id
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the host name into a socket address.
    pub fn addr(&self) -> Result<SocketAddr, PaxstoreError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                PaxstoreError(format!(
                    "cannot resolve address of replica {}: '{}:{}'",
                    self.id, self.host, self.port
                ))
            })
    }
}

impl fmt::Display for ReplicaInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}@{}:{}", self.id, self.host, self.port)
    }
}

/// The full table of replicas. Replica `i` is the `i`-th entry.
#[derive(Debug, Clone)]
pub struct ReplicaDirectory {
    replicas: Vec<ReplicaInfo>,
}

impl ReplicaDirectory {
    /// Builds a directory from an ordered list of `host:port` strings.
    pub fn from_addrs<S: AsRef<str>>(
        addrs: &[S],
    ) -> Result<Self, PaxstoreError> {
        if addrs.is_empty() {
            return Err(PaxstoreError::msg("empty replica list"));
        }
        if addrs.len() > ReplicaId::MAX as usize {
            return Err(PaxstoreError(format!(
                "too many replicas {}",
                addrs.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut replicas = Vec::with_capacity(addrs.len());
        for (id, addr) in addrs.iter().enumerate() {
            let addr = addr.as_ref().trim();
            let (host, port) = addr.rsplit_once(':').ok_or_else(|| {
                PaxstoreError(format!("invalid replica address '{}'", addr))
            })?;
            if host.is_empty() {
                return Err(PaxstoreError(format!(
                    "invalid replica address '{}'",
                    addr
                )));
            }
            let port: u16 = port.parse()?;
            if !seen.insert((host.to_string(), port)) {
                return Err(PaxstoreError(format!(
                    "duplicate replica address '{}'",
                    addr
                )));
            }
            replicas.push(ReplicaInfo::new(id as ReplicaId, host, port));
        }

        Ok(ReplicaDirectory { replicas })
    }

    /// Cluster size (number of replicas).
    pub fn population(&self) -> u8 {
        self.replicas.len() as u8
    }

    /// Majority quorum size: floor(N/2) + 1.
    pub fn quorum_cnt(&self) -> u8 {
        self.population() / 2 + 1
    }

    /// Looks up the info of replica `id`.
    pub fn get(&self, id: ReplicaId) -> Option<&ReplicaInfo> {
        self.replicas.get(id as usize)
    }

    /// Iterates over all replicas, including self.
    pub fn iter(&self) -> impl Iterator<Item = &ReplicaInfo> {
        self.replicas.iter()
    }

    /// Iterates over all replicas other than `me`.
    pub fn peers_of(
        &self,
        me: ReplicaId,
    ) -> impl Iterator<Item = &ReplicaInfo> {
        self.replicas.iter().filter(move |r| r.id != me)
    }
}

#[cfg(test)]
mod directory_tests {
    use super::*;

    fn five() -> Result<ReplicaDirectory, PaxstoreError> {
        ReplicaDirectory::from_addrs(&[
            "127.0.0.1:52800",
            "127.0.0.1:52801",
            "127.0.0.1:52802",
            "localhost:52803",
            "127.0.0.1:52804",
        ])
    }

    #[test]
    fn quorum_sizes() -> Result<(), PaxstoreError> {
        assert_eq!(five()?.quorum_cnt(), 3);
        assert_eq!(ReplicaDirectory::from_addrs(&["a:1"])?.quorum_cnt(), 1);
        assert_eq!(
            ReplicaDirectory::from_addrs(&["a:1", "b:1"])?.quorum_cnt(),
            2
        );
        assert_eq!(
            ReplicaDirectory::from_addrs(&["a:1", "b:1", "c:1", "d:1"])?
                .quorum_cnt(),
            3
        );
        Ok(())
    }

    #[test]
    fn lookup_and_peers() -> Result<(), PaxstoreError> {
        let dir = five()?;
        assert_eq!(dir.population(), 5);
        let r3 = dir.get(3).unwrap();
        assert_eq!(r3.id(), 3);
        assert_eq!(r3.host(), "localhost");
        assert_eq!(r3.port(), 52803);
        assert!(dir.get(5).is_none());
        let peers: Vec<ReplicaId> = dir.peers_of(2).map(|r| r.id()).collect();
        assert_eq!(peers, vec![0, 1, 3, 4]);
        assert_eq!(dir.iter().count(), 5);
        Ok(())
    }

    #[test]
    fn resolve_addr() -> Result<(), PaxstoreError> {
        let dir = five()?;
        assert_eq!(dir.get(1).unwrap().addr()?, "127.0.0.1:52801".parse()?);
        Ok(())
    }

    #[test]
    fn invalid_tables() {
        let empty: [&str; 0] = [];
        assert!(ReplicaDirectory::from_addrs(&empty).is_err());
        assert!(ReplicaDirectory::from_addrs(&["nocolon"]).is_err());
        assert!(ReplicaDirectory::from_addrs(&[":123"]).is_err());
        assert!(ReplicaDirectory::from_addrs(&["host:notaport"]).is_err());
        assert!(
            ReplicaDirectory::from_addrs(&["host:1", "host:2", "host:1"])
                .is_err()
        );
    }
}
