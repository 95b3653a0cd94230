//! Registry backends for `push` and `pull` actions.
//!
//! The core passes a registry name, an artifact or remote name, and a tag;
//! storage semantics live entirely behind the [`Registry`] trait. The
//! `local` backend stores blobs under `<path>/<name>/<tag>` on the
//! controller's filesystem.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::{HadesError, Result};
use crate::schema::RegistryConfig;

#[async_trait]
pub trait Registry: Send + Sync {
    async fn push(&self, name: &str, tag: &str, bytes: Vec<u8>) -> Result<()>;
    async fn pull(&self, name: &str, tag: &str) -> Result<Vec<u8>>;
}

/// Instantiated backends keyed by registry name.
#[derive(Default)]
pub struct Manager {
    registries: HashMap<String, Arc<dyn Registry>>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("registries", &self.registries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Manager {
    pub fn from_config(configs: &IndexMap<String, RegistryConfig>) -> Result<Self> {
        let mut registries: HashMap<String, Arc<dyn Registry>> = HashMap::new();
        for (name, config) in configs {
            let backend: Arc<dyn Registry> = match config.kind.as_str() {
                "local" => {
                    let path = config.path.as_deref().ok_or_else(|| {
                        HadesError::config(format!("registry {name:?}: local type requires path"))
                    })?;
                    Arc::new(LocalRegistry {
                        root: PathBuf::from(path),
                    })
                }
                other => {
                    return Err(HadesError::config(format!(
                        "registry {name:?}: unsupported type {other:?}"
                    )))
                }
            };
            registries.insert(name.clone(), backend);
        }
        Ok(Manager { registries })
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Registry>> {
        self.registries
            .get(name)
            .cloned()
            .ok_or_else(|| HadesError::config(format!("registry {name:?} not configured")))
    }
}

/// Directory-backed registry on the controller.
struct LocalRegistry {
    root: PathBuf,
}

impl LocalRegistry {
    fn blob_path(&self, name: &str, tag: &str) -> PathBuf {
        self.root.join(name).join(tag)
    }
}

#[async_trait]
impl Registry for LocalRegistry {
    async fn push(&self, name: &str, tag: &str, bytes: Vec<u8>) -> Result<()> {
        let path = self.blob_path(name, tag);
        let parent = path.parent().expect("blob path has a parent");
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|err| HadesError::io(format!("creating {}", parent.display()), err))?;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|err| HadesError::io(format!("writing {}", path.display()), err))
    }

    async fn pull(&self, name: &str, tag: &str) -> Result<Vec<u8>> {
        let path = self.blob_path(name, tag);
        tokio::fs::read(&path)
            .await
            .map_err(|err| HadesError::io(format!("reading {}", path.display()), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(path: &str) -> IndexMap<String, RegistryConfig> {
        let yaml = format!(
            r#"
artifacts:
  type: local
  path: {path}
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[tokio::test]
    async fn local_registry_round_trips_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::from_config(&local_config(dir.path().to_str().unwrap())).unwrap();
        let registry = manager.get("artifacts").unwrap();

        registry
            .push("app", "v1.0", b"binary".to_vec())
            .await
            .unwrap();
        let bytes = registry.pull("app", "v1.0").await.unwrap();
        assert_eq!(bytes, b"binary");
    }

    #[tokio::test]
    async fn pulling_a_missing_tag_fails() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Manager::from_config(&local_config(dir.path().to_str().unwrap())).unwrap();
        let registry = manager.get("artifacts").unwrap();
        assert!(registry.pull("app", "v9").await.is_err());
    }

    #[test]
    fn unsupported_type_is_a_config_error() {
        let configs: IndexMap<String, RegistryConfig> = serde_yaml::from_str(
            r#"
remote:
  type: s3
  bucket: blobs
"#,
        )
        .unwrap();
        let err = Manager::from_config(&configs).unwrap_err();
        assert!(err.to_string().contains("unsupported type"));
    }

    #[test]
    fn unknown_registry_name_is_reported() {
        let manager = Manager::from_config(&IndexMap::new()).unwrap();
        assert!(manager.get("nope").is_err());
    }
}
