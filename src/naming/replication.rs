//! Background replication of read-hot files.
//!
//! The locking engine seeds a task here whenever a file's cumulative
//! read count crosses the replication threshold and some registered
//! server does not yet hold a replica. Tasks run on a bounded pool and
//! must never block the client that seeded them: the seed is a
//! constant-time spawn, and the copy happens after the seeding request
//! has returned.
//!
//! A task that fails for any reason is dropped: the file stays
//! under-replicated and a later read seeds a fresh attempt. A task that
//! races with an exclusive lock may be undone immediately by the write
//! path's invalidation pass; that is acceptable too.

use std::sync::Arc;

use alder_core::DfsPath;
use alder_wire::CommandStub;
use alder_wire::StorageStub;
use rand::Rng;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::client::CommandClient;
use crate::naming::index::DirectoryIndex;

pub(crate) struct ReplicationDriver {
    permits: Arc<Semaphore>,
}

impl ReplicationDriver {
    pub fn new(max_tasks: usize) -> Self {
        Self { permits: Arc::new(Semaphore::new(max_tasks)) }
    }

    /// Spawn one copy-to-new-replica task.
    ///
    /// `sources` is a snapshot of the file's replica list at seed time;
    /// the copy pulls from one of them, chosen uniformly at random. On
    /// success the target joins the replica list and the path's read
    /// counter resets. When the pool is saturated the task is dropped.
    pub fn spawn(
        &self,
        index: Arc<DirectoryIndex>,
        path: DfsPath,
        target_storage: StorageStub,
        target_command: CommandStub,
        sources: Vec<StorageStub>,
    ) {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                debug!(path = %path, "replication pool saturated, dropping task");
                return;
            }
        };

        tokio::spawn(async move {
            let _permit = permit;
            let source = {
                if sources.is_empty() {
                    return;
                }
                let chosen = rand::rng().random_range(0..sources.len());
                sources[chosen].clone()
            };

            match CommandClient::for_stub(&target_command).copy(&path, &source).await {
                Ok(true) => {
                    // The file may have been deleted while the copy ran;
                    // only a still-known file gains the replica.
                    if index.add_replica(&path, target_storage.clone()) {
                        if let Some(lock) = index.lock_handle(&path) {
                            lock.reset_read_count();
                        }
                        debug!(path = %path, target = %target_storage, "replicated file");
                    }
                }
                Ok(false) => {
                    debug!(path = %path, target = %target_storage, "replication copy reported failure");
                }
                Err(error) => {
                    debug!(path = %path, target = %target_storage, %error, "replication copy failed");
                }
            }
        });
    }
}
