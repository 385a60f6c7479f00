//! The storage server.
//!
//! Serves the contents of one local directory. Clients read and write
//! file bytes through the Storage interface; the naming server drives
//! create/delete/copy through the Command interface. On start the server
//! announces every file under its root to the naming server, deletes the
//! duplicates the naming server rejects, and prunes directories those
//! deletions leave empty.
//!
//! Local operations are serialized by one async mutex, so a copy in
//! progress cannot interleave with a client write to the same file.

use std::io::ErrorKind;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use alder_core::error::InternalSnafu;
use alder_core::error::NotFoundSnafu;
use alder_core::error::OutOfRangeSnafu;
use alder_core::DfsError;
use alder_core::DfsPath;
use alder_wire::CommandRequest;
use alder_wire::CommandResponse;
use alder_wire::CommandStub;
use alder_wire::StorageRequest;
use alder_wire::StorageResponse;
use alder_wire::StorageStub;
use alder_wire::REGISTRATION_PORT;
use anyhow::Context;
use parking_lot::Mutex;
use tokio::fs;
use tokio::fs::OpenOptions;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncSeekExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::client::RegistrationClient;
use crate::client::StorageClient;
use crate::rpc;

/// Chunk size for server-to-server copies. Must leave room inside the
/// frame size limit.
const COPY_CHUNK_SIZE: u32 = 1024 * 1024;

/// Configuration for a storage server.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Local directory whose contents this server exposes.
    pub root: PathBuf,
    /// Externally routable hostname placed into this server's stubs.
    pub hostname: String,
    /// Port for the Storage (data) interface. Zero picks an ephemeral
    /// port.
    pub storage_port: u16,
    /// Port for the Command interface. Zero picks an ephemeral port.
    pub command_port: u16,
    /// Hostname of the naming server.
    pub naming_host: String,
    /// Registration port of the naming server.
    pub naming_port: u16,
    /// Maximum concurrent connections per listener.
    pub max_connections: u32,
}

impl StorageConfig {
    /// Configuration with ephemeral ports, registering against a naming
    /// server on localhost.
    pub fn new(root: impl Into<PathBuf>, hostname: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            hostname: hostname.into(),
            storage_port: 0,
            command_port: 0,
            naming_host: "127.0.0.1".to_string(),
            naming_port: REGISTRATION_PORT,
            max_connections: 64,
        }
    }
}

type StoppedHook = Box<dyn FnOnce(Option<anyhow::Error>) + Send>;

/// A storage server rooted at one local directory.
pub struct StorageServer {
    inner: Arc<StorageInner>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    stubs: Mutex<Option<(StorageStub, CommandStub)>>,
}

struct StorageInner {
    config: StorageConfig,
    /// Serializes all local file operations.
    ops: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    on_stopped: Mutex<Option<StoppedHook>>,
}

impl StorageServer {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            inner: Arc::new(StorageInner {
                config,
                ops: tokio::sync::Mutex::new(()),
                cancel: CancellationToken::new(),
                on_stopped: Mutex::new(None),
            }),
            listeners: Mutex::new(Vec::new()),
            stubs: Mutex::new(None),
        }
    }

    /// Install the shutdown hook, invoked exactly once when the server
    /// has fully stopped.
    pub fn on_stopped(&self, hook: impl FnOnce(Option<anyhow::Error>) + Send + 'static) {
        *self.inner.on_stopped.lock() = Some(Box::new(hook));
    }

    /// Bind both interfaces, register with the naming server, and serve.
    ///
    /// Returns this server's stubs. Duplicate files rejected by the
    /// naming server are deleted locally, and directories left empty by
    /// those deletions are pruned.
    pub async fn start(&self) -> anyhow::Result<(StorageStub, CommandStub)> {
        let config = &self.inner.config;

        let storage_listener = TcpListener::bind(("0.0.0.0", config.storage_port))
            .await
            .with_context(|| format!("failed to bind storage port {}", config.storage_port))?;
        let command_listener = TcpListener::bind(("0.0.0.0", config.command_port))
            .await
            .with_context(|| format!("failed to bind command port {}", config.command_port))?;

        let storage_stub = StorageStub::new(
            config.hostname.clone(),
            storage_listener.local_addr().context("storage listener address")?.port(),
        );
        let command_stub = CommandStub::new(
            config.hostname.clone(),
            command_listener.local_addr().context("command listener address")?.port(),
        );

        let storage_task = {
            let inner = Arc::clone(&self.inner);
            let handler = {
                let inner = Arc::clone(&self.inner);
                move |request: StorageRequest| {
                    let inner = Arc::clone(&inner);
                    async move { handle_storage(inner, request).await }
                }
            };
            let cancel = self.inner.cancel.clone();
            let max_connections = config.max_connections;
            tokio::spawn(async move {
                if let Err(err) =
                    rpc::serve(storage_listener, cancel, max_connections, handler).await
                {
                    error!(error = %err, "storage listener failed");
                    inner.cancel.cancel();
                    inner.notify_stopped(Some(err));
                }
            })
        };

        let command_task = {
            let inner = Arc::clone(&self.inner);
            let handler = {
                let inner = Arc::clone(&self.inner);
                move |request: CommandRequest| {
                    let inner = Arc::clone(&inner);
                    async move { handle_command(inner, request).await }
                }
            };
            let cancel = self.inner.cancel.clone();
            let max_connections = config.max_connections;
            tokio::spawn(async move {
                if let Err(err) =
                    rpc::serve(command_listener, cancel, max_connections, handler).await
                {
                    error!(error = %err, "command listener failed");
                    inner.cancel.cancel();
                    inner.notify_stopped(Some(err));
                }
            })
        };
        self.listeners.lock().extend([storage_task, command_task]);

        let files = match DfsPath::list_local_tree(&config.root) {
            Ok(files) => files,
            Err(err) => {
                self.inner.cancel.cancel();
                return Err(err).context("failed to list the storage root");
            }
        };
        let registration = RegistrationClient::new(config.naming_host.clone(), config.naming_port);
        let duplicates = match registration
            .register(storage_stub.clone(), command_stub.clone(), files)
            .await
        {
            Ok(duplicates) => duplicates,
            Err(err) => {
                self.inner.cancel.cancel();
                return Err(err).context("failed to register with the naming server");
            }
        };

        // Duplicates already belong to another storage server; give up
        // the local copies and prune directories that empty out.
        {
            let _guard = self.inner.ops.lock().await;
            for path in &duplicates {
                let _ = self.inner.delete_local(path).await;
            }
        }
        if let Err(err) = prune_empty_directories(&config.root) {
            warn!(error = %err, root = %config.root.display(), "failed to prune empty directories");
        }

        *self.stubs.lock() = Some((storage_stub.clone(), command_stub.clone()));
        info!(
            storage = %storage_stub,
            command = %command_stub,
            duplicates = duplicates.len(),
            "storage server registered"
        );
        Ok((storage_stub, command_stub))
    }

    /// Stop the server: refuse new calls, drain both listeners, fire
    /// the shutdown hook. The server cannot be restarted.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        let handles: Vec<JoinHandle<()>> = self.listeners.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        self.inner.notify_stopped(None);
        info!("storage server stopped");
    }

    /// This server's stubs, once started.
    pub fn stubs(&self) -> Option<(StorageStub, CommandStub)> {
        self.stubs.lock().clone()
    }
}

async fn handle_storage(inner: Arc<StorageInner>, request: StorageRequest) -> StorageResponse {
    let _guard = inner.ops.lock().await;
    match request {
        StorageRequest::Size { path } => match inner.size_of(&path).await {
            Ok(size) => StorageResponse::Size { size },
            Err(error) => StorageResponse::Error { error },
        },
        StorageRequest::Read { path, offset, length } => {
            match inner.read_at(&path, offset, length).await {
                Ok(data) => StorageResponse::Data { data },
                Err(error) => StorageResponse::Error { error },
            }
        }
        StorageRequest::Write { path, offset, data } => {
            match inner.write_at(&path, offset, &data).await {
                Ok(()) => StorageResponse::Written,
                Err(error) => StorageResponse::Error { error },
            }
        }
    }
}

async fn handle_command(inner: Arc<StorageInner>, request: CommandRequest) -> CommandResponse {
    let _guard = inner.ops.lock().await;
    let result = match request {
        CommandRequest::Create { path } => inner.create_local(&path).await,
        CommandRequest::Delete { path } => inner.delete_local(&path).await,
        CommandRequest::Copy { path, source } => inner.copy_from(&path, &source).await,
    };
    match result {
        Ok(success) => CommandResponse::Done { success },
        Err(error) => CommandResponse::Error { error },
    }
}

impl StorageInner {
    fn local_path(&self, path: &DfsPath) -> PathBuf {
        let mut local = self.config.root.clone();
        for component in path.components() {
            local.push(component);
        }
        local
    }

    async fn size_of(&self, path: &DfsPath) -> Result<u64, DfsError> {
        match fs::metadata(self.local_path(path)).await {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            _ => NotFoundSnafu { path: path.to_string() }.fail(),
        }
    }

    async fn read_at(&self, path: &DfsPath, offset: u64, length: u32) -> Result<Vec<u8>, DfsError> {
        let size = self.size_of(path).await?;
        let end = offset.saturating_add(u64::from(length));
        if end > size {
            return OutOfRangeSnafu {
                path: path.to_string(),
                offset,
                length: u64::from(length),
                size,
            }
            .fail();
        }

        let local = self.local_path(path);
        let mut file = fs::File::open(&local)
            .await
            .map_err(|err| io_failure(path, "open for read", &err))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| io_failure(path, "seek", &err))?;
        let mut data = vec![0u8; length as usize];
        file.read_exact(&mut data)
            .await
            .map_err(|err| io_failure(path, "read", &err))?;
        Ok(data)
    }

    async fn write_at(&self, path: &DfsPath, offset: u64, data: &[u8]) -> Result<(), DfsError> {
        let size = self.size_of(path).await?;
        // Writing at the current end extends the file; past the end is
        // an error.
        if offset > size {
            return OutOfRangeSnafu {
                path: path.to_string(),
                offset,
                length: data.len() as u64,
                size,
            }
            .fail();
        }

        let local = self.local_path(path);
        let mut file = OpenOptions::new()
            .write(true)
            .open(&local)
            .await
            .map_err(|err| io_failure(path, "open for write", &err))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|err| io_failure(path, "seek", &err))?;
        file.write_all(data).await.map_err(|err| io_failure(path, "write", &err))?;
        file.flush().await.map_err(|err| io_failure(path, "flush", &err))?;
        Ok(())
    }

    async fn create_local(&self, path: &DfsPath) -> Result<bool, DfsError> {
        if path.is_root() {
            return Ok(false);
        }
        let local = self.local_path(path);
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| io_failure(path, "create parent directories", &err))?;
        }
        match OpenOptions::new().write(true).create_new(true).open(&local).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(io_failure(path, "create", &err)),
        }
    }

    async fn delete_local(&self, path: &DfsPath) -> Result<bool, DfsError> {
        if path.is_root() {
            return Ok(false);
        }
        let local = self.local_path(path);
        let meta = match fs::metadata(&local).await {
            Ok(meta) => meta,
            Err(_) => return Ok(false),
        };
        let removed = if meta.is_dir() {
            fs::remove_dir_all(&local).await
        } else {
            fs::remove_file(&local).await
        };
        match removed {
            Ok(()) => Ok(true),
            Err(err) => {
                debug!(path = %path, error = %err, "local delete failed");
                Ok(false)
            }
        }
    }

    /// Fetch a full copy of `path` from another storage server.
    ///
    /// Streams the file in bounded chunks and verifies each chunk by
    /// reading it back before reporting success.
    async fn copy_from(&self, path: &DfsPath, source: &StorageStub) -> Result<bool, DfsError> {
        let source_client = StorageClient::for_stub(source);
        let total = source_client.size(path).await?;

        self.delete_local(path).await?;
        if !self.create_local(path).await? {
            return InternalSnafu { reason: format!("could not recreate {path} locally") }.fail();
        }

        let mut offset = 0u64;
        let mut verified = true;
        while offset < total {
            let length = u64::min(total - offset, u64::from(COPY_CHUNK_SIZE)) as u32;
            let data = source_client.read(path, offset, length).await?;
            self.write_at(path, offset, &data).await?;
            let readback = self.read_at(path, offset, length).await?;
            verified = verified && readback == data;
            offset += u64::from(length);
        }
        debug!(path = %path, source = %source, bytes = total, verified, "copied file");
        Ok(verified)
    }

    fn notify_stopped(&self, cause: Option<anyhow::Error>) {
        if let Some(hook) = self.on_stopped.lock().take() {
            hook(cause);
        }
    }
}

fn io_failure(path: &DfsPath, operation: &str, err: &std::io::Error) -> DfsError {
    DfsError::Internal { reason: format!("{operation} failed for {path}: {err}") }
}

/// Remove directories that contain no files anywhere beneath them.
/// The root itself is kept. Returns whether `dir` ended up empty.
fn prune_empty_directories(dir: &Path) -> std::io::Result<bool> {
    let mut empty = true;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if prune_empty_directories(&entry.path())? {
                std::fs::remove_dir(entry.path())?;
            } else {
                empty = false;
            }
        } else {
            empty = false;
        }
    }
    Ok(empty)
}
