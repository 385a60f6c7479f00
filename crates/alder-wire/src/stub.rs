//! Stubs: value-typed handles to a storage server's remote endpoints.
//!
//! A storage server exposes two endpoints: the storage endpoint serves
//! data reads and writes, the command endpoint serves create/delete/copy.
//! A stub is the endpoint's network address as a plain value; two stubs
//! are the same endpoint exactly when their addresses are equal, which is
//! what lets the naming server key its registry and replica sets by stub.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Handle to a storage server's data endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageStub {
    /// Externally routable hostname or address of the storage server.
    pub host: String,
    /// Port of the storage (data) listener.
    pub port: u16,
}

impl StorageStub {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for StorageStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Handle to a storage server's command endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandStub {
    /// Externally routable hostname or address of the storage server.
    pub host: String,
    /// Port of the command listener.
    pub port: u16,
}

impl CommandStub {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }
}

impl fmt::Display for CommandStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
