//! The naming server: hierarchical locking and the Service and
//! Registration facades.
//!
//! Locking walks the target's subpath chain top-down: every ancestor is
//! taken shared, the target itself shared or exclusive per the request.
//! Because every agent walks chains in the paths' total order, lock
//! acquisition cannot deadlock. Holding every ancestor shared means a
//! concurrent delete or create on any ancestor (which takes its parent
//! exclusively) must wait, so the tree above an in-flight operation
//! cannot shift underneath it.
//!
//! Two side effects ride on lock acquisition. A shared grant on a
//! read-hot file seeds a background replication task. An exclusive grant
//! on a file with more than one replica runs the invalidation pass
//! synchronously: one replica is kept and every other storage server is
//! told to delete its copy, so the writer's result cannot survive next
//! to stale data.

use std::net::SocketAddr;
use std::sync::Arc;

use alder_core::error::IllegalStateSnafu;
use alder_core::error::InternalSnafu;
use alder_core::error::NotFoundSnafu;
use alder_core::DfsError;
use alder_core::DfsPath;
use alder_core::PathLock;
use alder_wire::CommandStub;
use alder_wire::RegistrationRequest;
use alder_wire::RegistrationResponse;
use alder_wire::ServiceRequest;
use alder_wire::ServiceResponse;
use alder_wire::StorageStub;
use alder_wire::REGISTRATION_PORT;
use alder_wire::SERVICE_PORT;
use anyhow::Context;
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::client::CommandClient;
use crate::naming::index::DirectoryIndex;
use crate::naming::registry::StorageRegistry;
use crate::naming::replication::ReplicationDriver;
use crate::rpc;

/// Cumulative read grants after which a shared lock on a file seeds a
/// replication task.
pub(crate) const REPLICATION_READ_THRESHOLD: u64 = 20;

/// Configuration for the naming server.
#[derive(Debug, Clone)]
pub struct NamingConfig {
    /// Port of the client Service interface. Zero picks an ephemeral
    /// port (useful in tests).
    pub service_port: u16,
    /// Port of the storage-server Registration interface.
    pub registration_port: u16,
    /// Maximum concurrent connections per listener.
    pub max_connections: u32,
    /// Maximum concurrent background replication tasks.
    pub max_replication_tasks: usize,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            service_port: SERVICE_PORT,
            registration_port: REGISTRATION_PORT,
            max_connections: 64,
            max_replication_tasks: 32,
        }
    }
}

type StoppedHook = Box<dyn FnOnce(Option<anyhow::Error>) + Send>;

/// The naming server. Holds no file data; owns the directory tree, the
/// storage registry, and all path locks.
pub struct NamingServer {
    inner: Arc<NamingInner>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    service_addr: Mutex<Option<SocketAddr>>,
    registration_addr: Mutex<Option<SocketAddr>>,
}

struct NamingInner {
    config: NamingConfig,
    index: Arc<DirectoryIndex>,
    registry: StorageRegistry,
    replicator: ReplicationDriver,
    cancel: CancellationToken,
    on_stopped: Mutex<Option<StoppedHook>>,
}

impl NamingServer {
    pub fn new(config: NamingConfig) -> Self {
        let replicator = ReplicationDriver::new(config.max_replication_tasks);
        Self {
            inner: Arc::new(NamingInner {
                config,
                index: Arc::new(DirectoryIndex::new()),
                registry: StorageRegistry::new(),
                replicator,
                cancel: CancellationToken::new(),
                on_stopped: Mutex::new(None),
            }),
            listeners: Mutex::new(Vec::new()),
            service_addr: Mutex::new(None),
            registration_addr: Mutex::new(None),
        }
    }

    /// Install the shutdown hook, invoked exactly once when the server
    /// has fully stopped: with `None` after a clean [`stop`], with the
    /// root cause after an abnormal listener failure.
    ///
    /// [`stop`]: NamingServer::stop
    pub fn on_stopped(&self, hook: impl FnOnce(Option<anyhow::Error>) + Send + 'static) {
        *self.inner.on_stopped.lock() = Some(Box::new(hook));
    }

    /// Bind both interfaces and start serving.
    pub async fn start(&self) -> anyhow::Result<()> {
        let config = &self.inner.config;
        let service_listener = TcpListener::bind(("0.0.0.0", config.service_port))
            .await
            .with_context(|| format!("failed to bind service port {}", config.service_port))?;
        let registration_listener = TcpListener::bind(("0.0.0.0", config.registration_port))
            .await
            .with_context(|| format!("failed to bind registration port {}", config.registration_port))?;

        let service_addr = service_listener.local_addr().context("service listener address")?;
        let registration_addr =
            registration_listener.local_addr().context("registration listener address")?;
        *self.service_addr.lock() = Some(service_addr);
        *self.registration_addr.lock() = Some(registration_addr);
        info!(%service_addr, %registration_addr, "naming server listening");

        let service_task = {
            let inner = Arc::clone(&self.inner);
            let handler = {
                let inner = Arc::clone(&self.inner);
                move |request: ServiceRequest| {
                    let inner = Arc::clone(&inner);
                    async move { handle_service(inner, request).await }
                }
            };
            let cancel = self.inner.cancel.clone();
            let max_connections = config.max_connections;
            tokio::spawn(async move {
                if let Err(err) =
                    rpc::serve(service_listener, cancel, max_connections, handler).await
                {
                    error!(error = %err, "service listener failed");
                    inner.cancel.cancel();
                    inner.notify_stopped(Some(err));
                }
            })
        };

        let registration_task = {
            let inner = Arc::clone(&self.inner);
            let handler = {
                let inner = Arc::clone(&self.inner);
                move |request: RegistrationRequest| {
                    let inner = Arc::clone(&inner);
                    async move { handle_registration(inner, request).await }
                }
            };
            let cancel = self.inner.cancel.clone();
            let max_connections = config.max_connections;
            tokio::spawn(async move {
                if let Err(err) =
                    rpc::serve(registration_listener, cancel, max_connections, handler).await
                {
                    error!(error = %err, "registration listener failed");
                    inner.cancel.cancel();
                    inner.notify_stopped(Some(err));
                }
            })
        };

        self.listeners.lock().extend([service_task, registration_task]);
        Ok(())
    }

    /// Stop the server: refuse new calls, unblock every waiting lock
    /// operation with `Stopped`, drain both listeners, then fire the
    /// shutdown hook. The server cannot be restarted.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        for lock in self.inner.index.all_locks() {
            lock.interrupt();
        }
        let handles: Vec<JoinHandle<()>> = self.listeners.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.notify_stopped(None);
        info!("naming server stopped");
    }

    /// Actual address of the Service listener, once started.
    pub fn service_addr(&self) -> Option<SocketAddr> {
        *self.service_addr.lock()
    }

    /// Actual address of the Registration listener, once started.
    pub fn registration_addr(&self) -> Option<SocketAddr> {
        *self.registration_addr.lock()
    }
}

async fn handle_service(inner: Arc<NamingInner>, request: ServiceRequest) -> ServiceResponse {
    match request {
        ServiceRequest::Lock { path, exclusive } => match inner.lock_path(&path, exclusive).await {
            Ok(()) => ServiceResponse::Locked,
            Err(error) => ServiceResponse::Error { error },
        },
        ServiceRequest::Unlock { path, exclusive } => match inner.unlock_path(&path, exclusive) {
            Ok(()) => ServiceResponse::Unlocked,
            Err(error) => ServiceResponse::Error { error },
        },
        ServiceRequest::IsDirectory { path } => match inner.is_directory_op(&path).await {
            Ok(directory) => ServiceResponse::IsDirectory { directory },
            Err(error) => ServiceResponse::Error { error },
        },
        ServiceRequest::List { path } => match inner.list_op(&path).await {
            Ok(entries) => ServiceResponse::List { entries },
            Err(error) => ServiceResponse::Error { error },
        },
        ServiceRequest::CreateFile { path } => match inner.create_file_op(&path).await {
            Ok(created) => ServiceResponse::Created { created },
            Err(error) => ServiceResponse::Error { error },
        },
        ServiceRequest::CreateDirectory { path } => match inner.create_directory_op(&path).await {
            Ok(created) => ServiceResponse::Created { created },
            Err(error) => ServiceResponse::Error { error },
        },
        ServiceRequest::Delete { path } => match inner.delete_op(&path).await {
            Ok(deleted) => ServiceResponse::Deleted { deleted },
            Err(error) => ServiceResponse::Error { error },
        },
        ServiceRequest::GetStorage { path } => match inner.get_storage_op(&path) {
            Ok(stub) => ServiceResponse::Storage { stub },
            Err(error) => ServiceResponse::Error { error },
        },
    }
}

async fn handle_registration(
    inner: Arc<NamingInner>,
    request: RegistrationRequest,
) -> RegistrationResponse {
    match request {
        RegistrationRequest::Register { storage, command, paths } => {
            match inner.register_storage(storage, command, paths).await {
                Ok(duplicates) => RegistrationResponse::Registered { duplicates },
                Err(error) => RegistrationResponse::Error { error },
            }
        }
    }
}

impl NamingInner {
    fn notify_stopped(&self, cause: Option<anyhow::Error>) {
        if let Some(hook) = self.on_stopped.lock().take() {
            hook(cause);
        }
    }

    /// Acquire the subpath chain of `path`: every ancestor shared, the
    /// target itself exclusive when requested. On failure the already
    /// acquired prefix is rolled back.
    async fn acquire_chain(
        &self,
        path: &DfsPath,
        exclusive: bool,
    ) -> Result<Vec<Arc<PathLock>>, DfsError> {
        let chain = self.index.chain_locks(path)?;
        let last = chain.len() - 1;
        for (position, lock) in chain.iter().enumerate() {
            let grant = if position == last && exclusive {
                lock.acquire_write().await
            } else {
                lock.acquire_read().await
            };
            if let Err(error) = grant {
                for held in &chain[..position] {
                    held.release_read();
                }
                return Err(error);
            }
        }
        Ok(chain)
    }

    /// Release a chain in the same direction it was acquired.
    fn release_chain(&self, chain: &[Arc<PathLock>], exclusive: bool) {
        let last = chain.len() - 1;
        for (position, lock) in chain.iter().enumerate() {
            if position == last && exclusive {
                lock.release_write();
            } else {
                lock.release_read();
            }
        }
    }

    /// The client-facing `lock` operation, with its two side effects.
    async fn lock_path(&self, path: &DfsPath, exclusive: bool) -> Result<(), DfsError> {
        let chain = self.acquire_chain(path, exclusive).await?;
        if exclusive {
            if let Err(error) = self.invalidate_stale_replicas(path).await {
                self.release_chain(&chain, true);
                return Err(error);
            }
        } else {
            self.maybe_seed_replication(path, &chain[chain.len() - 1]);
        }
        Ok(())
    }

    /// The client-facing `unlock` operation.
    fn unlock_path(&self, path: &DfsPath, exclusive: bool) -> Result<(), DfsError> {
        let chain = self.index.chain_locks(path).map_err(|_| DfsError::BadArgument {
            reason: format!("cannot unlock unknown path {path}"),
        })?;
        self.release_chain(&chain, exclusive);
        Ok(())
    }

    /// Seed a replication task if the freshly granted shared lock is on
    /// a read-hot file and some registered server lacks a replica.
    fn maybe_seed_replication(&self, path: &DfsPath, lock: &Arc<PathLock>) {
        if !self.index.is_file(path) {
            return;
        }
        if lock.reads_granted() < REPLICATION_READ_THRESHOLD {
            return;
        }
        let Some(replicas) = self.index.replicas(path) else {
            return;
        };
        let Some((storage, command)) = self.registry.pick_absent(&replicas) else {
            return;
        };
        debug!(path = %path, target = %storage, "seeding replication task");
        self.replicator.spawn(Arc::clone(&self.index), path.clone(), storage, command, replicas);
    }

    /// The invalidation pass: shrink an exclusively locked file's
    /// replica list to its first element, deleting every other copy.
    ///
    /// Removals are recorded even when a remote delete fails; any
    /// failure then surfaces as an internal error, because a stale
    /// replica surviving an exclusive grant breaks the write contract.
    async fn invalidate_stale_replicas(&self, path: &DfsPath) -> Result<(), DfsError> {
        if path.is_root() {
            return Ok(());
        }
        let Some(replicas) = self.index.replicas(path) else {
            return Ok(());
        };
        if replicas.len() <= 1 {
            return Ok(());
        }

        let stale = replicas[1..].to_vec();
        let mut first_failure: Option<String> = None;
        for stub in &stale {
            let Some(command) = self.registry.command_for(stub) else {
                first_failure
                    .get_or_insert_with(|| format!("no command endpoint registered for {stub}"));
                continue;
            };
            match CommandClient::for_stub(&command).delete(path).await {
                Ok(_) => {}
                Err(err) => {
                    warn!(path = %path, replica = %stub, error = %err, "failed to invalidate replica");
                    first_failure.get_or_insert_with(|| format!("invalidating {stub}: {err}"));
                }
            }
        }
        self.index.remove_replicas(path, &stale);

        match first_failure {
            None => Ok(()),
            Some(reason) => {
                InternalSnafu { reason: format!("replica invalidation failed: {reason}") }.fail()
            }
        }
    }

    async fn is_directory_op(&self, path: &DfsPath) -> Result<bool, DfsError> {
        if path.is_root() {
            return Ok(true);
        }
        if !self.index.contains(path) {
            return NotFoundSnafu { path: path.to_string() }.fail();
        }
        let parent = path.parent()?;
        let chain = self.acquire_chain(&parent, false).await?;
        let result = if self.index.contains(path) {
            Ok(self.index.is_directory(path))
        } else {
            NotFoundSnafu { path: path.to_string() }.fail()
        };
        self.release_chain(&chain, false);
        result
    }

    async fn list_op(&self, path: &DfsPath) -> Result<Vec<String>, DfsError> {
        if !self.index.is_directory(path) {
            return NotFoundSnafu { path: path.to_string() }.fail();
        }
        let chain = self.acquire_chain(path, false).await?;
        let listing = (|| {
            let children = self
                .index
                .children(path)
                .ok_or_else(|| DfsError::NotFound { path: path.to_string() })?;
            let mut entries = Vec::with_capacity(children.len());
            for child in &children {
                let name = child.last().map_err(|_| DfsError::Internal {
                    reason: format!("directory {path} lists root as a child"),
                })?;
                entries.push(name.to_string());
            }
            Ok(entries)
        })();
        self.release_chain(&chain, false);
        listing
    }

    async fn create_file_op(&self, path: &DfsPath) -> Result<bool, DfsError> {
        if path.is_root() {
            return Ok(false);
        }
        let parent = path.parent()?;
        if !self.index.is_directory(&parent) {
            return NotFoundSnafu { path: parent.to_string() }.fail();
        }
        let chain = self.acquire_chain(&parent, true).await?;
        let created = self.create_file_locked(path, &parent).await;
        self.release_chain(&chain, true);
        created
    }

    async fn create_file_locked(&self, path: &DfsPath, parent: &DfsPath) -> Result<bool, DfsError> {
        if !self.index.is_directory(parent) {
            return NotFoundSnafu { path: parent.to_string() }.fail();
        }
        let Some((storage, command)) = self.registry.pick_any() else {
            return IllegalStateSnafu { reason: "no storage servers are registered" }.fail();
        };
        if self.index.contains(path) {
            return Ok(false);
        }
        let created = CommandClient::for_stub(&command).create(path).await?;
        if created {
            self.index.insert_file(path, storage.clone());
            debug!(path = %path, storage = %storage, "created file");
        }
        Ok(created)
    }

    async fn create_directory_op(&self, path: &DfsPath) -> Result<bool, DfsError> {
        if path.is_root() {
            return Ok(false);
        }
        let parent = path.parent()?;
        if !self.index.is_directory(&parent) {
            return NotFoundSnafu { path: parent.to_string() }.fail();
        }
        let chain = self.acquire_chain(&parent, true).await?;
        let created = if !self.index.is_directory(&parent) {
            NotFoundSnafu { path: parent.to_string() }.fail()
        } else if self.index.contains(path) {
            Ok(false)
        } else {
            self.index.insert_directory(path);
            debug!(path = %path, "created directory");
            Ok(true)
        };
        self.release_chain(&chain, true);
        created
    }

    async fn delete_op(&self, path: &DfsPath) -> Result<bool, DfsError> {
        if path.is_root() {
            return Ok(false);
        }
        if !self.index.contains(path) {
            return NotFoundSnafu { path: path.to_string() }.fail();
        }
        let parent = path.parent()?;
        if !self.index.contains(&parent) {
            return NotFoundSnafu { path: parent.to_string() }.fail();
        }
        let chain = self.acquire_chain(&parent, true).await?;
        let deleted = self.delete_locked(path).await;
        self.release_chain(&chain, true);
        deleted
    }

    /// Delete `path` on every registered storage server, then drop the
    /// whole subtree from the index.
    ///
    /// Local removal is recorded even when a remote delete fails; the
    /// first failure still surfaces to the client afterwards.
    async fn delete_locked(&self, path: &DfsPath) -> Result<bool, DfsError> {
        if !self.index.contains(path) {
            return NotFoundSnafu { path: path.to_string() }.fail();
        }
        let mut deleted_any = false;
        let mut first_failure: Option<DfsError> = None;
        for command in self.registry.distinct_commands() {
            match CommandClient::for_stub(&command).delete(path).await {
                Ok(deleted) => deleted_any |= deleted,
                Err(err) => {
                    warn!(path = %path, command = %command, error = %err, "remote delete failed");
                    first_failure.get_or_insert(err);
                }
            }
        }
        self.index.remove_subtree(path);
        match first_failure {
            None => Ok(deleted_any),
            Some(error) => Err(error),
        }
    }

    fn get_storage_op(&self, path: &DfsPath) -> Result<StorageStub, DfsError> {
        let mut replicas = self
            .index
            .replicas(path)
            .ok_or_else(|| DfsError::NotFound { path: path.to_string() })?;
        if replicas.is_empty() {
            return InternalSnafu { reason: format!("file {path} has an empty replica list") }.fail();
        }
        let chosen = rand::rng().random_range(0..replicas.len());
        Ok(replicas.swap_remove(chosen))
    }

    async fn register_storage(
        &self,
        storage: StorageStub,
        command: CommandStub,
        paths: Vec<DfsPath>,
    ) -> Result<Vec<DfsPath>, DfsError> {
        self.registry.insert(storage.clone(), command)?;

        // The splice must not interleave with facade mutations of the
        // tree; the root write lock is the serializer.
        let root_lock = self
            .index
            .lock_handle(&DfsPath::root())
            .ok_or_else(|| DfsError::Internal { reason: "root lock missing".to_string() })?;
        root_lock.acquire_write().await?;
        let duplicates = self.index.register_paths(&storage, &paths);
        root_lock.release_write();

        info!(
            storage = %storage,
            announced = paths.len(),
            duplicates = duplicates.len(),
            "storage server registered"
        );
        Ok(duplicates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inner() -> Arc<NamingInner> {
        let config = NamingConfig::default();
        let replicator = ReplicationDriver::new(config.max_replication_tasks);
        Arc::new(NamingInner {
            config,
            index: Arc::new(DirectoryIndex::new()),
            registry: StorageRegistry::new(),
            replicator,
            cancel: CancellationToken::new(),
            on_stopped: Mutex::new(None),
        })
    }

    fn p(s: &str) -> DfsPath {
        DfsPath::parse(s).expect("valid path")
    }

    #[tokio::test]
    async fn create_directory_then_duplicate() {
        let inner = inner();
        assert_eq!(inner.create_directory_op(&p("/docs")).await, Ok(true));
        assert_eq!(inner.create_directory_op(&p("/docs")).await, Ok(false));
        assert_eq!(inner.is_directory_op(&p("/docs")).await, Ok(true));
    }

    #[tokio::test]
    async fn create_directory_requires_parent() {
        let inner = inner();
        assert!(matches!(
            inner.create_directory_op(&p("/missing/sub")).await,
            Err(DfsError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn create_file_without_storage_servers_is_illegal_state() {
        let inner = inner();
        assert!(matches!(
            inner.create_file_op(&p("/a")).await,
            Err(DfsError::IllegalState { .. })
        ));
    }

    #[tokio::test]
    async fn delete_root_returns_false() {
        let inner = inner();
        assert_eq!(inner.delete_op(&DfsPath::root()).await, Ok(false));
    }

    #[tokio::test]
    async fn registration_synthesizes_tree_and_reports_duplicates() {
        let inner = inner();
        let s1 = StorageStub::new("s1", 7000);
        let c1 = CommandStub::new("s1", 7001);
        let dups = inner
            .register_storage(s1.clone(), c1, vec![p("/a/b.txt"), p("/a/c.txt")])
            .await
            .unwrap();
        assert!(dups.is_empty());
        assert_eq!(inner.is_directory_op(&p("/a")).await, Ok(true));
        assert_eq!(inner.is_directory_op(&p("/a/b.txt")).await, Ok(false));

        let mut listing = inner.list_op(&p("/a")).await.unwrap();
        listing.sort();
        assert_eq!(listing, vec!["b.txt".to_string(), "c.txt".to_string()]);

        // A second server announcing the same file must give it up.
        let s2 = StorageStub::new("s2", 7000);
        let c2 = CommandStub::new("s2", 7001);
        let dups = inner
            .register_storage(s2.clone(), c2, vec![p("/a/b.txt"), p("/d.txt")])
            .await
            .unwrap();
        assert_eq!(dups, vec![p("/a/b.txt")]);
        assert_eq!(inner.index.replicas(&p("/a/b.txt")).unwrap(), vec![s1]);
        assert_eq!(inner.index.replicas(&p("/d.txt")).unwrap(), vec![s2]);
    }

    #[tokio::test]
    async fn double_registration_is_illegal_state() {
        let inner = inner();
        let s1 = StorageStub::new("s1", 7000);
        let c1 = CommandStub::new("s1", 7001);
        inner.register_storage(s1.clone(), c1.clone(), vec![]).await.unwrap();
        assert!(matches!(
            inner.register_storage(s1, c1, vec![]).await,
            Err(DfsError::IllegalState { .. })
        ));
    }

    #[tokio::test]
    async fn lock_unknown_path_is_not_found() {
        let inner = inner();
        assert!(matches!(
            inner.lock_path(&p("/nope"), false).await,
            Err(DfsError::NotFound { .. })
        ));
        assert!(matches!(
            inner.unlock_path(&p("/nope"), false),
            Err(DfsError::BadArgument { .. })
        ));
    }

    #[tokio::test]
    async fn lock_and_unlock_walk_the_chain() {
        let inner = inner();
        inner.create_directory_op(&p("/a")).await.unwrap();
        inner.create_directory_op(&p("/a/b")).await.unwrap();

        inner.lock_path(&p("/a/b"), true).await.unwrap();
        let root_lock = inner.index.lock_handle(&DfsPath::root()).unwrap();
        let target_lock = inner.index.lock_handle(&p("/a/b")).unwrap();
        assert!(root_lock.is_read_locked());
        assert!(target_lock.is_write_locked());

        inner.unlock_path(&p("/a/b"), true).unwrap();
        assert!(!root_lock.is_read_locked());
        assert!(!target_lock.is_write_locked());
    }

    #[tokio::test]
    async fn get_storage_requires_a_file() {
        let inner = inner();
        inner.create_directory_op(&p("/dir")).await.unwrap();
        assert!(matches!(
            inner.get_storage_op(&p("/dir")),
            Err(DfsError::NotFound { .. })
        ));
        assert!(matches!(
            inner.get_storage_op(&p("/ghost")),
            Err(DfsError::NotFound { .. })
        ));
    }
}
