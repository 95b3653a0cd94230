//! File placement with content-addressed idempotence.
//!
//! The source is a local file or a declared artifact. Before writing, the
//! remote checksum is probed with `sha256sum`; a matching hash skips the
//! copy entirely. A failing probe (the tool may not exist on the host)
//! degrades to an unconditional copy.

use std::collections::HashMap;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{format_size, log_line, Action, Outcome};
use crate::envmap::substitute_env;
use crate::error::{HadesError, Result};
use crate::runtime::Runtime;
use crate::schema::CopySpec;
use crate::ssh::{capture, captured_string, discard, Session};

pub struct CopyAction {
    spec: CopySpec,
}

impl CopyAction {
    pub fn from_spec(spec: CopySpec) -> Self {
        CopyAction { spec }
    }

    async fn source_bytes(&self, rt: &Runtime) -> Result<(Vec<u8>, String)> {
        if let Some(artifact) = &self.spec.artifact {
            let blob = rt.artifacts.get(artifact).ok_or_else(|| {
                HadesError::config(format!("artifact {artifact:?} is not loaded"))
            })?;
            return Ok(((*blob).clone(), format!("artifact:{artifact}")));
        }
        if let Some(src) = &self.spec.src {
            let bytes = tokio::fs::read(src)
                .await
                .map_err(|err| HadesError::io(format!("reading source {src}"), err))?;
            return Ok((bytes, src.clone()));
        }
        Err(HadesError::config("copy has neither src nor artifact"))
    }
}

#[async_trait]
impl Action for CopyAction {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome> {
        let (bytes, src_desc) = self.source_bytes(rt).await?;
        let local_hash = sha256_hex(&bytes);
        let size = format_size(bytes.len());
        let dst = substitute_env(&self.spec.dst, &rt.env)?;

        let session = rt.transport.connect(&rt.host).await?;

        if let Some(remote_hash) = remote_checksum(session.as_ref(), rt, &dst).await? {
            if remote_hash == local_hash {
                log_line(
                    &rt.log_out,
                    &format!("Skipping {dst} ({size}, already up to date)"),
                )?;
                return Ok(Outcome::Skipped(format!("{dst}, {size} already up to date")));
            }
        }

        session
            .copy_file(&rt.cancel, bytes, &dst, self.spec.mode)
            .await?;
        log_line(&rt.log_out, &format!("Copied {src_desc} to {dst} ({size})"))?;
        Ok(Outcome::Done)
    }

    fn describe(&self, env: &HashMap<String, String>) -> String {
        let dst = substitute_env(&self.spec.dst, env).unwrap_or_else(|_| self.spec.dst.clone());
        match &self.spec.artifact {
            Some(artifact) => format!(
                "copy: artifact={artifact} to={dst} (mode: {:o}, verify checksum)",
                self.spec.mode
            ),
            None => format!(
                "copy: {} to {dst} (mode: {:o}, verify checksum)",
                self.spec.src.as_deref().unwrap_or("?"),
                self.spec.mode
            ),
        }
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Probe the remote checksum. `None` means unknown: the file is absent,
/// or the checksum tool is missing, or the probe itself failed; all three
/// fall back to an unconditional copy. Cancellation still propagates.
async fn remote_checksum(
    session: &dyn Session,
    rt: &Runtime,
    dst: &str,
) -> Result<Option<String>> {
    let (sink, buffer) = capture();
    let probe = format!("sha256sum {dst} 2>/dev/null || echo NOTFOUND");
    match session.run(&rt.cancel, &probe, sink, discard()).await {
        Ok(0) => {
            let output = captured_string(&buffer);
            let output = output.trim();
            if output.is_empty() || output == "NOTFOUND" {
                return Ok(None);
            }
            Ok(output.split_whitespace().next().map(str::to_string))
        }
        Ok(_) => Ok(None),
        Err(HadesError::Cancelled) => Err(HadesError::Cancelled),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ArtifactStore;
    use crate::ssh::mock::{MockClient, MockResponse};
    use crate::testutil::RuntimeBuilder;
    use std::io::Write as _;
    use std::sync::Arc;

    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn artifact_store(name: &str, bytes: &[u8]) -> Arc<ArtifactStore> {
        let store = Arc::new(ArtifactStore::new());
        store.store(name, bytes.to_vec());
        store
    }

    #[tokio::test]
    async fn matching_remote_hash_skips_the_copy() {
        let mock = Arc::new(MockClient::new());
        mock.rule(
            "sha256sum",
            MockResponse::ok(format!("{HELLO_SHA256}  /etc/motd\n")),
        );
        let rt = RuntimeBuilder::new(mock.clone())
            .artifacts(artifact_store("motd", b"hello"))
            .build();

        let spec: CopySpec =
            serde_yaml::from_str("artifact: motd\ndst: /etc/motd\n").unwrap();
        let outcome = CopyAction::from_spec(spec).execute(&rt).await.unwrap();

        assert!(matches!(outcome, Outcome::Skipped(_)));
        assert!(mock.placed().is_empty(), "no file may be written");
        // No mv either: the probe is the only command.
        assert_eq!(mock.commands().len(), 1);
    }

    #[tokio::test]
    async fn differing_hash_places_the_file() {
        let mock = Arc::new(MockClient::new());
        mock.rule("sha256sum", MockResponse::ok("deadbeef  /etc/motd\n"));
        let rt = RuntimeBuilder::new(mock.clone())
            .artifacts(artifact_store("motd", b"hello"))
            .build();

        let spec: CopySpec =
            serde_yaml::from_str("artifact: motd\ndst: /etc/motd\nmode: \"0600\"\n").unwrap();
        let outcome = CopyAction::from_spec(spec).execute(&rt).await.unwrap();

        assert_eq!(outcome, Outcome::Done);
        let placed = mock.placed();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].path, "/etc/motd");
        assert_eq!(placed[0].content, b"hello");
        assert_eq!(placed[0].mode, 0o600);
    }

    #[tokio::test]
    async fn failing_probe_falls_back_to_unconditional_copy() {
        let mock = Arc::new(MockClient::new());
        mock.rule("sha256sum", MockResponse::error());
        let rt = RuntimeBuilder::new(mock.clone())
            .artifacts(artifact_store("motd", b"hello"))
            .build();

        let spec: CopySpec =
            serde_yaml::from_str("artifact: motd\ndst: /etc/motd\n").unwrap();
        let outcome = CopyAction::from_spec(spec).execute(&rt).await.unwrap();

        assert_eq!(outcome, Outcome::Done);
        assert_eq!(mock.placed().len(), 1);
    }

    #[tokio::test]
    async fn notfound_probe_output_copies_without_skipping() {
        let mock = Arc::new(MockClient::new());
        mock.rule("sha256sum", MockResponse::ok("NOTFOUND\n"));
        let rt = RuntimeBuilder::new(mock.clone())
            .artifacts(artifact_store("motd", b"hello"))
            .build();

        let spec: CopySpec =
            serde_yaml::from_str("artifact: motd\ndst: /etc/motd\n").unwrap();
        CopyAction::from_spec(spec).execute(&rt).await.unwrap();
        assert_eq!(mock.placed().len(), 1);
    }

    #[tokio::test]
    async fn destination_expands_environment_references() {
        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock.clone())
            .artifacts(artifact_store("bin", b"app"))
            .env("TAG", "v1.2")
            .build();

        let spec: CopySpec =
            serde_yaml::from_str("artifact: bin\ndst: /app/releases/${TAG}/app\n").unwrap();
        CopyAction::from_spec(spec).execute(&rt).await.unwrap();
        assert_eq!(mock.placed()[0].path, "/app/releases/v1.2/app");
    }

    #[tokio::test]
    async fn copies_a_local_source_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("motd");
        let mut file = std::fs::File::create(&src).unwrap();
        file.write_all(b"welcome").unwrap();

        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock.clone()).build();

        let spec: CopySpec = serde_yaml::from_str(&format!(
            "src: {}\ndst: /etc/motd\n",
            src.display()
        ))
        .unwrap();
        CopyAction::from_spec(spec).execute(&rt).await.unwrap();
        assert_eq!(mock.placed()[0].content, b"welcome");
    }

    #[test]
    fn hello_hashes_to_the_known_digest() {
        assert_eq!(sha256_hex(b"hello"), HELLO_SHA256);
    }

    #[test]
    fn describe_names_source_and_destination() {
        let spec: CopySpec =
            serde_yaml::from_str("src: tpl/apt-caddy.list\ndst: /etc/apt/caddy.list\n").unwrap();
        let description = CopyAction::from_spec(spec).describe(&HashMap::new());
        assert!(description.contains("tpl/apt-caddy.list"));
        assert!(description.contains("/etc/apt/caddy.list"));
        assert!(description.contains("verify checksum"));
    }
}
