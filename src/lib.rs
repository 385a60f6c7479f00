//! Distributed filesystem coordination.
//!
//! An alder deployment is one *naming server* and any number of *storage
//! servers*. The naming server owns the directory tree and maps each file
//! to the storage servers holding its bytes; it arbitrates concurrent
//! access with hierarchical read/write locks and drives replication and
//! invalidation as a side effect of read/write traffic. Storage servers
//! hold the actual file data under a local directory and serve block
//! reads and writes directly to clients.
//!
//! The remote contract lives in `alder-wire`; the leaf value types and
//! the path lock live in `alder-core`. This crate provides the servers,
//! the TCP frame transport, typed RPC clients, and the two binaries.

pub mod client;
pub mod naming;
pub mod rpc;
pub mod storage;

pub use naming::NamingConfig;
pub use naming::NamingServer;
pub use storage::StorageConfig;
pub use storage::StorageServer;
