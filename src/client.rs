//! Typed clients for the four remote interfaces.
//!
//! Thin wrappers over [`rpc::call`]: each method sends one request frame,
//! reads one response frame, unwraps the interface's `Error` variant into
//! a [`DfsError`], and rejects any other mismatched variant as a protocol
//! bug.

use alder_core::DfsError;
use alder_core::DfsPath;
use alder_wire::CommandRequest;
use alder_wire::CommandResponse;
use alder_wire::CommandStub;
use alder_wire::RegistrationRequest;
use alder_wire::RegistrationResponse;
use alder_wire::ServiceRequest;
use alder_wire::ServiceResponse;
use alder_wire::StorageRequest;
use alder_wire::StorageResponse;
use alder_wire::StorageStub;

use crate::rpc;

fn unexpected(interface: &str, operation: &str) -> DfsError {
    DfsError::Internal {
        reason: format!("unexpected {interface} response variant for {operation}"),
    }
}

/// Client for the naming server's Service interface.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    host: String,
    port: u16,
}

impl ServiceClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    async fn call(&self, request: ServiceRequest) -> Result<ServiceResponse, DfsError> {
        let response: ServiceResponse = rpc::call(&self.host, self.port, &request).await?;
        match response {
            ServiceResponse::Error { error } => Err(error),
            other => Ok(other),
        }
    }

    pub async fn lock(&self, path: &DfsPath, exclusive: bool) -> Result<(), DfsError> {
        match self.call(ServiceRequest::Lock { path: path.clone(), exclusive }).await? {
            ServiceResponse::Locked => Ok(()),
            _ => Err(unexpected("Service", "Lock")),
        }
    }

    pub async fn unlock(&self, path: &DfsPath, exclusive: bool) -> Result<(), DfsError> {
        match self.call(ServiceRequest::Unlock { path: path.clone(), exclusive }).await? {
            ServiceResponse::Unlocked => Ok(()),
            _ => Err(unexpected("Service", "Unlock")),
        }
    }

    pub async fn is_directory(&self, path: &DfsPath) -> Result<bool, DfsError> {
        match self.call(ServiceRequest::IsDirectory { path: path.clone() }).await? {
            ServiceResponse::IsDirectory { directory } => Ok(directory),
            _ => Err(unexpected("Service", "IsDirectory")),
        }
    }

    pub async fn list(&self, path: &DfsPath) -> Result<Vec<String>, DfsError> {
        match self.call(ServiceRequest::List { path: path.clone() }).await? {
            ServiceResponse::List { entries } => Ok(entries),
            _ => Err(unexpected("Service", "List")),
        }
    }

    pub async fn create_file(&self, path: &DfsPath) -> Result<bool, DfsError> {
        match self.call(ServiceRequest::CreateFile { path: path.clone() }).await? {
            ServiceResponse::Created { created } => Ok(created),
            _ => Err(unexpected("Service", "CreateFile")),
        }
    }

    pub async fn create_directory(&self, path: &DfsPath) -> Result<bool, DfsError> {
        match self.call(ServiceRequest::CreateDirectory { path: path.clone() }).await? {
            ServiceResponse::Created { created } => Ok(created),
            _ => Err(unexpected("Service", "CreateDirectory")),
        }
    }

    pub async fn delete(&self, path: &DfsPath) -> Result<bool, DfsError> {
        match self.call(ServiceRequest::Delete { path: path.clone() }).await? {
            ServiceResponse::Deleted { deleted } => Ok(deleted),
            _ => Err(unexpected("Service", "Delete")),
        }
    }

    pub async fn get_storage(&self, path: &DfsPath) -> Result<StorageStub, DfsError> {
        match self.call(ServiceRequest::GetStorage { path: path.clone() }).await? {
            ServiceResponse::Storage { stub } => Ok(stub),
            _ => Err(unexpected("Service", "GetStorage")),
        }
    }
}

/// Client for the naming server's Registration interface.
#[derive(Debug, Clone)]
pub struct RegistrationClient {
    host: String,
    port: u16,
}

impl RegistrationClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port }
    }

    /// Announce a storage server. Returns the duplicate paths the storage
    /// server must delete locally.
    pub async fn register(
        &self,
        storage: StorageStub,
        command: CommandStub,
        paths: Vec<DfsPath>,
    ) -> Result<Vec<DfsPath>, DfsError> {
        let request = RegistrationRequest::Register { storage, command, paths };
        let response: RegistrationResponse = rpc::call(&self.host, self.port, &request).await?;
        match response {
            RegistrationResponse::Registered { duplicates } => Ok(duplicates),
            RegistrationResponse::Error { error } => Err(error),
        }
    }
}

/// Client for a storage server's Command interface.
#[derive(Debug, Clone)]
pub struct CommandClient {
    stub: CommandStub,
}

impl CommandClient {
    pub fn for_stub(stub: &CommandStub) -> Self {
        Self { stub: stub.clone() }
    }

    async fn call(&self, request: CommandRequest) -> Result<bool, DfsError> {
        let response: CommandResponse = rpc::call(&self.stub.host, self.stub.port, &request).await?;
        match response {
            CommandResponse::Done { success } => Ok(success),
            CommandResponse::Error { error } => Err(error),
        }
    }

    pub async fn create(&self, path: &DfsPath) -> Result<bool, DfsError> {
        self.call(CommandRequest::Create { path: path.clone() }).await
    }

    pub async fn delete(&self, path: &DfsPath) -> Result<bool, DfsError> {
        self.call(CommandRequest::Delete { path: path.clone() }).await
    }

    pub async fn copy(&self, path: &DfsPath, source: &StorageStub) -> Result<bool, DfsError> {
        self.call(CommandRequest::Copy { path: path.clone(), source: source.clone() }).await
    }
}

/// Client for a storage server's Storage (data) interface.
#[derive(Debug, Clone)]
pub struct StorageClient {
    stub: StorageStub,
}

impl StorageClient {
    pub fn for_stub(stub: &StorageStub) -> Self {
        Self { stub: stub.clone() }
    }

    async fn call(&self, request: StorageRequest) -> Result<StorageResponse, DfsError> {
        let response: StorageResponse = rpc::call(&self.stub.host, self.stub.port, &request).await?;
        match response {
            StorageResponse::Error { error } => Err(error),
            other => Ok(other),
        }
    }

    pub async fn size(&self, path: &DfsPath) -> Result<u64, DfsError> {
        match self.call(StorageRequest::Size { path: path.clone() }).await? {
            StorageResponse::Size { size } => Ok(size),
            _ => Err(unexpected("Storage", "Size")),
        }
    }

    pub async fn read(&self, path: &DfsPath, offset: u64, length: u32) -> Result<Vec<u8>, DfsError> {
        match self.call(StorageRequest::Read { path: path.clone(), offset, length }).await? {
            StorageResponse::Data { data } => Ok(data),
            _ => Err(unexpected("Storage", "Read")),
        }
    }

    pub async fn write(&self, path: &DfsPath, offset: u64, data: Vec<u8>) -> Result<(), DfsError> {
        match self.call(StorageRequest::Write { path: path.clone(), offset, data }).await? {
            StorageResponse::Written => Ok(()),
            _ => Err(unexpected("Storage", "Write")),
        }
    }
}
