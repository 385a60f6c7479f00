//! Error types for filesystem operations.
//!
//! A single serializable enum covers every failure a client can observe.
//! Errors travel inside wire responses, so the type derives serde in
//! addition to the usual snafu machinery.

use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

/// Errors surfaced by filesystem operations, on either side of the wire.
#[derive(Debug, Snafu, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[snafu(visibility(pub))]
pub enum DfsError {
    /// A path string or component failed validation.
    #[snafu(display("bad path: {reason}"))]
    BadPath {
        /// What was wrong with the path.
        reason: String,
    },

    /// An argument other than a path failed validation.
    #[snafu(display("bad argument: {reason}"))]
    BadArgument {
        /// What was wrong with the argument.
        reason: String,
    },

    /// The named object does not exist.
    #[snafu(display("not found: {path}"))]
    NotFound {
        /// Canonical string form of the missing path.
        path: String,
    },

    /// The operation is not valid in the server's current state.
    #[snafu(display("illegal state: {reason}"))]
    IllegalState {
        /// Why the operation was rejected.
        reason: String,
    },

    /// A read or write range fell outside the file.
    #[snafu(display("range [{offset}, {offset}+{length}) out of bounds for {path} (size {size})"))]
    OutOfRange {
        /// Canonical string form of the file path.
        path: String,
        /// Requested starting offset.
        offset: u64,
        /// Requested length in bytes.
        length: u64,
        /// Current size of the file.
        size: u64,
    },

    /// The operation was unblocked by server shutdown.
    #[snafu(display("interrupted by shutdown"))]
    Stopped,

    /// A remote call could not be delivered or completed.
    #[snafu(display("transport failure: {reason}"))]
    Transport {
        /// Description of the transport-level failure.
        reason: String,
    },

    /// An invariant violation was caught at runtime. Indicates a bug,
    /// not a retryable condition.
    #[snafu(display("internal error: {reason}"))]
    Internal {
        /// Description of the violated invariant.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = DfsError::NotFound { path: "/a/b".to_string() };
        assert_eq!(err.to_string(), "not found: /a/b");

        let err = DfsError::OutOfRange {
            path: "/f".to_string(),
            offset: 10,
            length: 5,
            size: 8,
        };
        assert_eq!(err.to_string(), "range [10, 10+5) out of bounds for /f (size 8)");
    }

    #[test]
    fn stopped_is_comparable() {
        assert_eq!(DfsError::Stopped, DfsError::Stopped);
        assert_ne!(DfsError::Stopped, DfsError::Internal { reason: "x".to_string() });
    }
}
