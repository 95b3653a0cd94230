//! Transport layer: pooled SSH connections, short-lived sessions, and a
//! loopback implementation for jobs that run on the controller.
//!
//! Actions are transport-agnostic: they see only the [`Client`] and
//! [`Session`] traits. The SSH implementation pools one connection per
//! `user@address` and hands out cheap sessions backed by fresh channels;
//! the loopback implementation runs commands through `sh -c` and writes
//! files with the same temp-then-rename contract.

pub mod local;
pub mod mock;
pub mod pool;
pub mod remote;

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

pub use local::LocalClient;
pub use remote::{HostKeyPolicy, SshClient};

/// Host descriptor from inventory. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    pub name: String,
    /// Network address as written in inventory; may carry a port.
    pub address: String,
    pub user: String,
    pub key_path: PathBuf,
}

impl Host {
    /// Address to dial; defaults the port to 22 when absent.
    pub fn dial_addr(&self) -> String {
        if self.address.contains(':') {
            self.address.clone()
        } else {
            format!("{}:22", self.address)
        }
    }

    /// Connection pool key.
    pub fn pool_key(&self) -> String {
        format!("{}@{}", self.user, self.dial_addr())
    }
}

/// Byte sink for remote stdout/stderr. Each `write` call lands the whole
/// buffer under one lock, so a structured message is never interleaved.
pub type Sink = Arc<Mutex<dyn Write + Send>>;

/// A sink backed by an in-memory buffer, for callers that need to inspect
/// command output.
pub fn capture() -> (Sink, Arc<Mutex<Vec<u8>>>) {
    let buffer: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
    let sink: Sink = buffer.clone();
    (sink, buffer)
}

/// Read back a capture buffer as lossy UTF-8.
pub fn captured_string(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    let bytes = buffer.lock().expect("capture buffer poisoned");
    String::from_utf8_lossy(&bytes).into_owned()
}

/// A sink that discards everything.
pub fn discard() -> Sink {
    Arc::new(Mutex::new(std::io::sink()))
}

/// Lends short-lived sessions on pooled connections.
#[async_trait]
pub trait Client: Send + Sync {
    /// Return a session for `host`, reusing the pooled connection when one
    /// exists. Concurrent calls for the same pool key perform at most one
    /// dial.
    async fn connect(&self, host: &Host) -> Result<Box<dyn Session>>;

    /// Close every pooled connection, surfacing the first close error.
    async fn close(&self) -> Result<()>;
}

/// A short-lived execution session. Each method allocates fresh transport
/// resources; connection lifetime is owned by the [`Client`].
#[async_trait]
pub trait Session: Send + Sync {
    /// Execute a command, streaming output into the sinks. Returns the
    /// remote exit status; callers decide whether non-zero is fatal.
    async fn run(
        &self,
        cancel: &CancellationToken,
        cmd: &str,
        stdout: Sink,
        stderr: Sink,
    ) -> Result<i32>;

    /// Place `content` at `remote_path` atomically: stream into a temp
    /// file under `/tmp` named after the destination's basename, chmod it
    /// to `mode`, then `mv` onto the destination.
    async fn copy_file(
        &self,
        cancel: &CancellationToken,
        content: Vec<u8>,
        remote_path: &str,
        mode: u32,
    ) -> Result<()>;
}

/// Temp path used by atomic placement, derived from the destination's
/// basename.
pub(crate) fn staging_path(remote_path: &str) -> String {
    let base = remote_path.rsplit('/').next().unwrap_or(remote_path);
    format!("/tmp/hades-{base}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dial_addr_defaults_port_22() {
        let host = Host {
            name: "a".into(),
            address: "10.0.0.1".into(),
            user: "root".into(),
            key_path: PathBuf::new(),
        };
        assert_eq!(host.dial_addr(), "10.0.0.1:22");

        let host = Host {
            address: "10.0.0.1:2222".into(),
            ..host
        };
        assert_eq!(host.dial_addr(), "10.0.0.1:2222");
    }

    #[test]
    fn pool_key_is_user_at_address() {
        let host = Host {
            name: "a".into(),
            address: "10.0.0.1".into(),
            user: "deploy".into(),
            key_path: PathBuf::new(),
        };
        assert_eq!(host.pool_key(), "deploy@10.0.0.1:22");
    }

    #[test]
    fn staging_path_uses_destination_basename() {
        assert_eq!(staging_path("/etc/caddy/Caddyfile"), "/tmp/hades-Caddyfile");
        assert_eq!(staging_path("plain"), "/tmp/hades-plain");
    }
}
