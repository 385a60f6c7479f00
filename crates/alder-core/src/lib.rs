//! Core value types for the alder distributed filesystem.
//!
//! This crate holds the leaf building blocks shared by the naming server,
//! the storage server, and the wire contract:
//!
//! - [`DfsPath`]: immutable filesystem paths with the locking total order
//! - [`DfsError`]: the domain error enum carried in wire responses
//! - [`PathLock`]: the writer-preferring per-path read/write lock

pub mod error;
pub mod path;
pub mod rwlock;

pub use error::DfsError;
pub use path::DfsPath;
pub use rwlock::PathLock;
