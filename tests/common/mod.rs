//! Shared fixtures for integration tests: an in-process naming server on
//! ephemeral ports, and storage servers over temp directories.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use alder::client::ServiceClient;
use alder::NamingConfig;
use alder::NamingServer;
use alder::StorageConfig;
use alder::StorageServer;
use tempfile::TempDir;

pub struct Cluster {
    pub naming: NamingServer,
    pub service: ServiceClient,
    pub registration_port: u16,
}

/// Start a naming server on ephemeral ports and return a service client
/// bound to it.
pub async fn start_naming() -> Cluster {
    let naming = NamingServer::new(NamingConfig {
        service_port: 0,
        registration_port: 0,
        ..NamingConfig::default()
    });
    naming.start().await.expect("naming server must start");
    let service_port = naming.service_addr().expect("service bound").port();
    let registration_port = naming.registration_addr().expect("registration bound").port();
    Cluster {
        naming,
        service: ServiceClient::new("127.0.0.1", service_port),
        registration_port,
    }
}

pub struct StorageFixture {
    pub server: StorageServer,
    pub root: TempDir,
}

/// Start a storage server over a fresh temp directory, seeded with the
/// given files, registered against the cluster.
pub async fn start_storage(cluster: &Cluster, files: &[(&str, &[u8])]) -> StorageFixture {
    let root = tempfile::tempdir().expect("tempdir");
    for (path, contents) in files {
        let local = root.path().join(path.trim_start_matches('/'));
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).expect("create parents");
        }
        std::fs::write(&local, contents).expect("seed file");
    }

    let server = StorageServer::new(StorageConfig {
        naming_port: cluster.registration_port,
        ..StorageConfig::new(root.path(), "127.0.0.1")
    });
    server.start().await.expect("storage server must start");
    StorageFixture { server, root }
}

impl StorageFixture {
    pub fn local_file(&self, path: &str) -> std::path::PathBuf {
        self.root.path().join(path.trim_start_matches('/'))
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.local_file(path).is_file()
    }
}

/// Poll until the condition holds, failing after a few seconds.
pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for: {what}");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// True when `dir` contains no entries at all.
pub fn dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}
