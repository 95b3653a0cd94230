//! Process-local artifact store.
//!
//! Artifacts declared by a job are read from the controller's disk into
//! this store before any remote work begins; during the step the store is
//! only read. Blobs are shared, never copied per host.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Default)]
pub struct ArtifactStore {
    blobs: RwLock<HashMap<String, Arc<Vec<u8>>>>,
}

impl ArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, name: impl Into<String>, bytes: Vec<u8>) {
        self.blobs
            .write()
            .expect("artifact store poisoned")
            .insert(name.into(), Arc::new(bytes));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Vec<u8>>> {
        self.blobs
            .read()
            .expect("artifact store poisoned")
            .get(name)
            .cloned()
    }

    /// Drop every blob; called when the run ends.
    pub fn clear(&self) {
        self.blobs
            .write()
            .expect("artifact store poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_and_shares_blobs() {
        let store = ArtifactStore::new();
        store.store("bin", vec![1, 2, 3]);

        let a = store.get("bin").unwrap();
        let b = store.get("bin").unwrap();
        assert_eq!(*a, vec![1, 2, 3]);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn missing_names_return_none() {
        let store = ArtifactStore::new();
        assert!(store.get("ghost").is_none());
    }

    #[test]
    fn clear_drops_everything() {
        let store = ArtifactStore::new();
        store.store("bin", vec![0]);
        store.clear();
        assert!(store.get("bin").is_none());
    }
}
