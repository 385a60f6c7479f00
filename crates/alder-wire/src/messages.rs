//! Request and response messages for the four remote interfaces.

use alder_core::DfsError;
use alder_core::DfsPath;
use serde::Deserialize;
use serde::Serialize;

use crate::stub::CommandStub;
use crate::stub::StorageStub;

/// Well-known port of the naming server's client (Service) interface.
pub const SERVICE_PORT: u16 = 8080;

/// Well-known port of the naming server's Registration interface.
pub const REGISTRATION_PORT: u16 = 8090;

/// Maximum size of a single frame on any interface.
///
/// Bounds both decode buffers and, transitively, the data chunk size a
/// storage read or write may carry.
pub const MAX_MESSAGE_SIZE: u32 = 8 * 1024 * 1024;

// ============================================================================
// Service (client → naming)
// ============================================================================

/// Client operations against the naming server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceRequest {
    /// Acquire the hierarchical lock on `path`, shared or exclusive.
    Lock { path: DfsPath, exclusive: bool },
    /// Release the hierarchical lock on `path`.
    Unlock { path: DfsPath, exclusive: bool },
    /// Whether `path` names a directory.
    IsDirectory { path: DfsPath },
    /// List the child names of a directory.
    List { path: DfsPath },
    /// Create an empty file on some registered storage server.
    CreateFile { path: DfsPath },
    /// Create a directory in the naming server's tree.
    CreateDirectory { path: DfsPath },
    /// Delete a file or directory tree everywhere.
    Delete { path: DfsPath },
    /// Pick a storage server holding the file's data.
    GetStorage { path: DfsPath },
}

/// Responses to [`ServiceRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceResponse {
    /// The lock was granted.
    Locked,
    /// The lock was released.
    Unlocked,
    /// Answer to `IsDirectory`.
    IsDirectory { directory: bool },
    /// Child names of the listed directory. Order is unspecified.
    List { entries: Vec<String> },
    /// Whether `CreateFile` / `CreateDirectory` created the object.
    Created { created: bool },
    /// Whether `Delete` removed data on any storage server.
    Deleted { deleted: bool },
    /// A replica chosen uniformly at random for `GetStorage`.
    Storage { stub: StorageStub },
    /// The operation failed.
    Error { error: DfsError },
}

// ============================================================================
// Registration (storage → naming)
// ============================================================================

/// Storage-server operations against the naming server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationRequest {
    /// Announce a storage server and the files it already holds.
    Register {
        storage: StorageStub,
        command: CommandStub,
        paths: Vec<DfsPath>,
    },
}

/// Responses to [`RegistrationRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationResponse {
    /// Registration succeeded. `duplicates` lists announced files the
    /// naming server already knew; the storage server must delete its
    /// local copies of them.
    Registered { duplicates: Vec<DfsPath> },
    /// Registration failed.
    Error { error: DfsError },
}

// ============================================================================
// Command (naming → storage)
// ============================================================================

/// Naming-server operations against a storage server's command endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandRequest {
    /// Create an empty file, synthesizing parent directories.
    Create { path: DfsPath },
    /// Delete a file or directory tree from local storage.
    Delete { path: DfsPath },
    /// Fetch a copy of `path` from another storage server.
    Copy { path: DfsPath, source: StorageStub },
}

/// Responses to [`CommandRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandResponse {
    /// Whether the command took effect.
    Done { success: bool },
    /// The command failed.
    Error { error: DfsError },
}

// ============================================================================
// Storage (client → storage)
// ============================================================================

/// Client data operations against a storage server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageRequest {
    /// Size of a file in bytes.
    Size { path: DfsPath },
    /// Read `length` bytes starting at `offset`.
    Read { path: DfsPath, offset: u64, length: u32 },
    /// Write `data` starting at `offset`. Extends the file when
    /// `offset` equals the current size.
    Write { path: DfsPath, offset: u64, data: Vec<u8> },
}

/// Responses to [`StorageRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageResponse {
    /// Answer to `Size`.
    Size { size: u64 },
    /// Bytes read by `Read`.
    Data { data: Vec<u8> },
    /// `Write` completed.
    Written,
    /// The operation failed.
    Error { error: DfsError },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> DfsPath {
        DfsPath::parse(s).expect("valid path")
    }

    fn round_trip<T>(value: &T) -> T
    where
        T: Serialize + for<'de> Deserialize<'de>,
    {
        let bytes = postcard::to_stdvec(value).expect("serialize");
        postcard::from_bytes(&bytes).expect("deserialize")
    }

    #[test]
    fn service_messages_round_trip() {
        let requests = vec![
            ServiceRequest::Lock { path: path("/a/b"), exclusive: true },
            ServiceRequest::Unlock { path: path("/a/b"), exclusive: false },
            ServiceRequest::IsDirectory { path: path("/") },
            ServiceRequest::List { path: path("/dir") },
            ServiceRequest::CreateFile { path: path("/dir/file") },
            ServiceRequest::CreateDirectory { path: path("/dir/sub") },
            ServiceRequest::Delete { path: path("/dir") },
            ServiceRequest::GetStorage { path: path("/dir/file") },
        ];
        for request in &requests {
            assert_eq!(&round_trip(request), request);
        }

        let responses = vec![
            ServiceResponse::Locked,
            ServiceResponse::List { entries: vec!["a".to_string(), "b".to_string()] },
            ServiceResponse::Storage { stub: StorageStub::new("host", 7000) },
            ServiceResponse::Error { error: DfsError::NotFound { path: "/x".to_string() } },
        ];
        for response in &responses {
            assert_eq!(&round_trip(response), response);
        }
    }

    #[test]
    fn registration_messages_round_trip() {
        let request = RegistrationRequest::Register {
            storage: StorageStub::new("s1", 7000),
            command: CommandStub::new("s1", 7001),
            paths: vec![path("/a/b.txt"), path("/c")],
        };
        assert_eq!(round_trip(&request), request);

        let response = RegistrationResponse::Registered { duplicates: vec![path("/a/b.txt")] };
        assert_eq!(round_trip(&response), response);
    }

    #[test]
    fn command_and_storage_messages_round_trip() {
        let command = CommandRequest::Copy {
            path: path("/a/b.txt"),
            source: StorageStub::new("s2", 7100),
        };
        assert_eq!(round_trip(&command), command);

        let write = StorageRequest::Write {
            path: path("/a/b.txt"),
            offset: 4096,
            data: vec![0xAB; 32],
        };
        assert_eq!(round_trip(&write), write);

        let out_of_range = StorageResponse::Error {
            error: DfsError::OutOfRange {
                path: "/a/b.txt".to_string(),
                offset: 100,
                length: 10,
                size: 50,
            },
        };
        assert_eq!(round_trip(&out_of_range), out_of_range);
    }

    #[test]
    fn paths_serialize_as_canonical_strings() {
        // The on-the-wire path syntax is the canonical string form.
        let bytes = postcard::to_stdvec(&path("/a/b")).expect("serialize");
        let text: String = postcard::from_bytes(&bytes).expect("postcard string");
        assert_eq!(text, "/a/b");
    }
}
