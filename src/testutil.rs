//! Shared fixtures for unit tests.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;

use crate::artifacts::ArtifactStore;
use crate::registry;
use crate::runtime::Runtime;
use crate::ssh::{discard, Client, Host};

pub(crate) fn test_host(name: &str) -> Host {
    Host {
        name: name.to_string(),
        address: "10.0.0.9".to_string(),
        user: "root".to_string(),
        key_path: PathBuf::from("/dev/null"),
    }
}

pub(crate) struct RuntimeBuilder {
    client: Arc<dyn Client>,
    artifacts: Arc<ArtifactStore>,
    registries: Arc<registry::Manager>,
    env: HashMap<String, String>,
    cancel: CancellationToken,
}

impl RuntimeBuilder {
    pub fn new(client: Arc<dyn Client>) -> Self {
        RuntimeBuilder {
            client,
            artifacts: Arc::new(ArtifactStore::new()),
            registries: Arc::new(
                registry::Manager::from_config(&IndexMap::new()).expect("empty config"),
            ),
            env: HashMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn artifacts(mut self, artifacts: Arc<ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn registries(mut self, registries: Arc<registry::Manager>) -> Self {
        self.registries = registries;
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn build(self) -> Runtime {
        Runtime::new(
            self.client,
            self.artifacts,
            self.registries,
            self.env,
            "hades-test".to_string(),
            "plan".to_string(),
            "workers".to_string(),
            test_host("app-1"),
            self.cancel,
            discard(),
            discard(),
        )
    }
}
