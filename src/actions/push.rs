//! Publish a job artifact to a registry.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{log_line, Action, Outcome};
use crate::error::{HadesError, Result};
use crate::runtime::Runtime;
use crate::schema::PushSpec;

pub struct PushAction {
    spec: PushSpec,
}

impl PushAction {
    pub fn from_spec(spec: PushSpec) -> Self {
        PushAction { spec }
    }
}

#[async_trait]
impl Action for PushAction {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome> {
        let registry = rt.registries.get(&self.spec.registry)?;
        let blob = rt.artifacts.get(&self.spec.artifact).ok_or_else(|| {
            HadesError::config(format!("artifact {:?} is not loaded", self.spec.artifact))
        })?;

        registry
            .push(&self.spec.name, &self.spec.tag, (*blob).clone())
            .await?;

        log_line(
            &rt.log_out,
            &format!(
                "Pushed artifact {} to {}/{}:{}",
                self.spec.artifact, self.spec.registry, self.spec.name, self.spec.tag
            ),
        )?;
        Ok(Outcome::Done)
    }

    fn describe(&self, _env: &HashMap<String, String>) -> String {
        format!(
            "push: artifact={} to {}/{}:{}",
            self.spec.artifact, self.spec.registry, self.spec.name, self.spec.tag
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::registry::Manager;
    use crate::schema::RegistryConfig;
    use crate::ssh::mock::MockClient;
    use crate::testutil::RuntimeBuilder;
    use indexmap::IndexMap;
    use std::sync::Arc;

    fn local_registry(dir: &tempfile::TempDir) -> Arc<Manager> {
        let mut configs: IndexMap<String, RegistryConfig> = IndexMap::new();
        configs.insert(
            "blobs".to_string(),
            serde_yaml::from_str(&format!("type: local\npath: {}\n", dir.path().display()))
                .unwrap(),
        );
        Arc::new(Manager::from_config(&configs).unwrap())
    }

    #[tokio::test]
    async fn pushes_the_declared_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::new());
        store.store("bin", b"app-bytes".to_vec());

        let rt = RuntimeBuilder::new(Arc::new(MockClient::new()))
            .artifacts(store)
            .registries(local_registry(&dir))
            .build();

        let spec: PushSpec =
            serde_yaml::from_str("registry: blobs\nartifact: bin\nname: app\ntag: v1\n").unwrap();
        PushAction::from_spec(spec).execute(&rt).await.unwrap();

        let stored = std::fs::read(dir.path().join("app").join("v1")).unwrap();
        assert_eq!(stored, b"app-bytes");
    }

    #[tokio::test]
    async fn missing_artifact_fails() {
        let dir = tempfile::tempdir().unwrap();
        let rt = RuntimeBuilder::new(Arc::new(MockClient::new()))
            .registries(local_registry(&dir))
            .build();

        let spec: PushSpec =
            serde_yaml::from_str("registry: blobs\nartifact: ghost\nname: app\ntag: v1\n").unwrap();
        let err = PushAction::from_spec(spec).execute(&rt).await.unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
