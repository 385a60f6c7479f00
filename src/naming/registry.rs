//! The storage registry: every registered storage server and its two
//! remote endpoints.
//!
//! Keyed by storage stub (value equality on the network address). A stub
//! registers at most once and is never removed; storage servers are
//! assumed stable for the naming server's lifetime.

use std::collections::HashMap;

use alder_core::DfsError;
use alder_wire::CommandStub;
use alder_wire::StorageStub;
use parking_lot::Mutex;
use rand::Rng;

pub(crate) struct StorageRegistry {
    registered: Mutex<HashMap<StorageStub, CommandStub>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self { registered: Mutex::new(HashMap::new()) }
    }

    /// Record a newly registered storage server. Fails if the storage
    /// stub is already registered.
    pub fn insert(&self, storage: StorageStub, command: CommandStub) -> Result<(), DfsError> {
        let mut registered = self.registered.lock();
        if registered.contains_key(&storage) {
            return Err(DfsError::IllegalState {
                reason: format!("storage server {storage} is already registered"),
            });
        }
        registered.insert(storage, command);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.registered.lock().is_empty()
    }

    /// The command endpoint paired with a storage stub.
    pub fn command_for(&self, storage: &StorageStub) -> Option<CommandStub> {
        self.registered.lock().get(storage).cloned()
    }

    /// Pick any registered server uniformly at random.
    pub fn pick_any(&self) -> Option<(StorageStub, CommandStub)> {
        let registered = self.registered.lock();
        pick_uniform(registered.iter().map(|(s, c)| (s.clone(), c.clone())).collect())
    }

    /// Pick, uniformly at random, a registered server that is not in the
    /// given replica list. Returns `None` when every server already
    /// holds a replica.
    pub fn pick_absent(&self, replicas: &[StorageStub]) -> Option<(StorageStub, CommandStub)> {
        let registered = self.registered.lock();
        let candidates: Vec<(StorageStub, CommandStub)> = registered
            .iter()
            .filter(|(storage, _)| !replicas.contains(storage))
            .map(|(s, c)| (s.clone(), c.clone()))
            .collect();
        pick_uniform(candidates)
    }

    /// Every distinct registered command endpoint.
    pub fn distinct_commands(&self) -> Vec<CommandStub> {
        let registered = self.registered.lock();
        let mut commands: Vec<CommandStub> = Vec::new();
        for command in registered.values() {
            if !commands.contains(command) {
                commands.push(command.clone());
            }
        }
        commands
    }
}

fn pick_uniform<T>(mut candidates: Vec<T>) -> Option<T> {
    if candidates.is_empty() {
        return None;
    }
    let index = rand::rng().random_range(0..candidates.len());
    Some(candidates.swap_remove(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(n: u16) -> (StorageStub, CommandStub) {
        (StorageStub::new("host", 7000 + n), CommandStub::new("host", 8000 + n))
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = StorageRegistry::new();
        let (storage, command) = server(1);
        registry.insert(storage.clone(), command.clone()).unwrap();
        assert!(matches!(
            registry.insert(storage, command),
            Err(DfsError::IllegalState { .. })
        ));
    }

    #[test]
    fn pick_absent_skips_existing_replicas() {
        let registry = StorageRegistry::new();
        let (s1, c1) = server(1);
        let (s2, c2) = server(2);
        registry.insert(s1.clone(), c1).unwrap();
        registry.insert(s2.clone(), c2.clone()).unwrap();

        let picked = registry.pick_absent(std::slice::from_ref(&s1)).unwrap();
        assert_eq!(picked, (s2.clone(), c2));
        assert!(registry.pick_absent(&[s1, s2]).is_none());
    }

    #[test]
    fn distinct_commands_deduplicates() {
        let registry = StorageRegistry::new();
        let (s1, c1) = server(1);
        let (s2, _) = server(2);
        registry.insert(s1, c1.clone()).unwrap();
        // A second storage endpoint backed by the same command endpoint.
        registry.insert(s2, c1.clone()).unwrap();

        assert_eq!(registry.distinct_commands(), vec![c1]);
    }

    #[test]
    fn empty_registry_has_no_candidates() {
        let registry = StorageRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.pick_any().is_none());
        assert!(registry.pick_absent(&[]).is_none());
    }
}
