//! Loopback transport for jobs flagged `local: true`.
//!
//! Commands run through `sh -c` on the controller; file placement follows
//! the same staging contract as the SSH path (temp file under `/tmp`,
//! chmod, rename) so actions behave identically on both transports.

use std::io::Write as _;
use std::os::unix::fs::PermissionsExt;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{staging_path, Client, Host, Session, Sink};
use crate::error::{HadesError, Result};

#[derive(Debug, Default)]
pub struct LocalClient;

impl LocalClient {
    pub fn new() -> Self {
        LocalClient
    }
}

#[async_trait]
impl Client for LocalClient {
    async fn connect(&self, _host: &Host) -> Result<Box<dyn Session>> {
        Ok(Box::new(LocalSession))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct LocalSession;

#[async_trait]
impl Session for LocalSession {
    async fn run(
        &self,
        cancel: &CancellationToken,
        cmd: &str,
        stdout: Sink,
        stderr: Sink,
    ) -> Result<i32> {
        if cancel.is_cancelled() {
            return Err(HadesError::Cancelled);
        }

        let mut command = tokio::process::Command::new("sh");
        command.arg("-c").arg(cmd);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(HadesError::Cancelled),
            res = command.output() => {
                res.map_err(|err| HadesError::io("spawning local command", err))?
            }
        };

        write_sink(&stdout, &output.stdout)?;
        write_sink(&stderr, &output.stderr)?;

        Ok(output.status.code().unwrap_or(-1))
    }

    async fn copy_file(
        &self,
        cancel: &CancellationToken,
        content: Vec<u8>,
        remote_path: &str,
        mode: u32,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(HadesError::Cancelled);
        }

        let tmp = staging_path(remote_path);
        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|err| HadesError::io(format!("writing {tmp}"), err))?;
        tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|err| HadesError::io(format!("chmod {tmp}"), err))?;

        // Rename is atomic on one filesystem; fall back to copy+remove when
        // /tmp sits on a different device.
        if tokio::fs::rename(&tmp, remote_path).await.is_err() {
            tokio::fs::copy(&tmp, remote_path)
                .await
                .map_err(|err| HadesError::io(format!("placing {remote_path}"), err))?;
            tokio::fs::set_permissions(remote_path, std::fs::Permissions::from_mode(mode))
                .await
                .map_err(|err| HadesError::io(format!("chmod {remote_path}"), err))?;
            tokio::fs::remove_file(&tmp)
                .await
                .map_err(|err| HadesError::io(format!("removing {tmp}"), err))?;
        }

        Ok(())
    }
}

fn write_sink(sink: &Sink, bytes: &[u8]) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut out = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    out.write_all(bytes)
        .map_err(|err| HadesError::io("writing log sink", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::{capture, captured_string, discard};
    use std::path::PathBuf;

    fn host() -> Host {
        Host {
            name: "controller".into(),
            address: "127.0.0.1".into(),
            user: "root".into(),
            key_path: PathBuf::new(),
        }
    }

    #[tokio::test]
    async fn run_captures_stdout_and_status() {
        let client = LocalClient::new();
        let session = client.connect(&host()).await.unwrap();
        let cancel = CancellationToken::new();

        let (out, buf) = capture();
        let status = session
            .run(&cancel, "printf hello; exit 3", out, discard())
            .await
            .unwrap();
        assert_eq!(status, 3);
        assert_eq!(captured_string(&buf), "hello");
    }

    #[tokio::test]
    async fn copy_file_places_content_with_mode() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("app.conf");

        let client = LocalClient::new();
        let session = client.connect(&host()).await.unwrap();
        let cancel = CancellationToken::new();

        session
            .copy_file(&cancel, b"listen 8080\n".to_vec(), dst.to_str().unwrap(), 0o600)
            .await
            .unwrap();

        let placed = std::fs::read_to_string(&dst).unwrap();
        assert_eq!(placed, "listen 8080\n");
        let mode = std::fs::metadata(&dst).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn cancelled_token_refuses_new_work() {
        let client = LocalClient::new();
        let session = client.connect(&host()).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session
            .run(&cancel, "true", discard(), discard())
            .await
            .unwrap_err();
        assert!(matches!(err, HadesError::Cancelled));
    }
}
