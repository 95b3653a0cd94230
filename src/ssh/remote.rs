//! SSH transport over libssh2.
//!
//! One established connection per `user@address`, created on first use and
//! owned by the client until shutdown. Sessions are short-lived: every
//! `run` and every sub-step of `copy_file` opens a fresh channel on the
//! pooled connection. libssh2 is a blocking library, so channel work runs
//! on the blocking thread pool; cancellation is observed between
//! operations, and an in-flight remote command may still complete after
//! cancellation (the remote `cat`/`mv` is not killed).

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{CheckResult, HostKeyType, KnownHostFileKind, KnownHostKeyFormat};
use tokio_util::sync::CancellationToken;

use super::pool::KeyedPool;
use super::{staging_path, Client, Host, Session, Sink};
use crate::error::{HadesError, Result};

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Host-key verification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostKeyPolicy {
    /// Verify against `~/.ssh/known_hosts`; record unknown hosts on first
    /// contact. Mismatches always refuse.
    #[default]
    TrustOnFirstUse,
    /// Verify against `~/.ssh/known_hosts`; refuse unknown hosts.
    Strict,
}

type SharedConn = Arc<Mutex<ssh2::Session>>;

/// Pooled SSH client. One live transport connection per pool key.
pub struct SshClient {
    policy: HostKeyPolicy,
    known_hosts_path: PathBuf,
    pool: KeyedPool<SharedConn>,
}

impl SshClient {
    pub fn new(policy: HostKeyPolicy) -> Self {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/root".to_string());
        SshClient {
            policy,
            known_hosts_path: Path::new(&home).join(".ssh").join("known_hosts"),
            pool: KeyedPool::new(),
        }
    }

    async fn dial(policy: HostKeyPolicy, known_hosts: PathBuf, host: Host) -> Result<SharedConn> {
        tokio::task::spawn_blocking(move || dial_blocking(policy, &known_hosts, &host))
            .await
            .map_err(|err| HadesError::transport(format!("dial task failed: {err}")))?
    }
}

#[async_trait]
impl Client for SshClient {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Session>> {
        let key = host.pool_key();
        let policy = self.policy;
        let known_hosts = self.known_hosts_path.clone();
        let dial_host = host.clone();
        let conn = self
            .pool
            .get_or_init(&key, move || Self::dial(policy, known_hosts, dial_host))
            .await?;

        Ok(Box::new(SshSession { conn }))
    }

    async fn close(&self) -> Result<()> {
        let mut first_err = None;
        for (key, conn) in self.pool.drain().await {
            let res = tokio::task::spawn_blocking(move || {
                let sess = lock_conn(&conn);
                sess.disconnect(None, "shutting down", None)
            })
            .await;
            match res {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if first_err.is_none() {
                        first_err = Some(HadesError::transport(format!(
                            "closing connection {key}: {err}"
                        )));
                    }
                }
                Err(err) => {
                    if first_err.is_none() {
                        first_err =
                            Some(HadesError::transport(format!("close task failed: {err}")));
                    }
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn lock_conn(conn: &SharedConn) -> std::sync::MutexGuard<'_, ssh2::Session> {
    conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn dial_blocking(policy: HostKeyPolicy, known_hosts: &Path, host: &Host) -> Result<SharedConn> {
    let addr = host.dial_addr();
    let socket_addr = addr
        .to_socket_addrs()
        .map_err(|err| HadesError::transport(format!("resolving {addr}: {err}")))?
        .next()
        .ok_or_else(|| HadesError::transport(format!("no address for {addr}")))?;

    let tcp = TcpStream::connect_timeout(&socket_addr, DIAL_TIMEOUT)
        .map_err(|err| HadesError::transport(format!("connecting to {addr}: {err}")))?;

    let mut sess = ssh2::Session::new()
        .map_err(|err| HadesError::transport(format!("creating session: {err}")))?;
    sess.set_tcp_stream(tcp);
    sess.handshake()
        .map_err(|err| HadesError::transport(format!("handshake with {addr}: {err}")))?;

    verify_host_key(policy, known_hosts, &sess, host)?;

    sess.userauth_pubkey_file(&host.user, None, &host.key_path, None)
        .map_err(|err| {
            HadesError::transport(format!(
                "public-key auth as {}@{addr} with {}: {err}",
                host.user,
                host.key_path.display()
            ))
        })?;
    if !sess.authenticated() {
        return Err(HadesError::transport(format!(
            "authentication rejected for {}@{addr}",
            host.user
        )));
    }

    Ok(Arc::new(Mutex::new(sess)))
}

fn verify_host_key(
    policy: HostKeyPolicy,
    known_hosts_path: &Path,
    sess: &ssh2::Session,
    host: &Host,
) -> Result<()> {
    let (key, key_type) = sess
        .host_key()
        .ok_or_else(|| HadesError::transport(format!("{}: no host key presented", host.name)))?;

    let mut known = sess
        .known_hosts()
        .map_err(|err| HadesError::transport(format!("known_hosts init: {err}")))?;
    if known_hosts_path.exists() {
        known
            .read_file(known_hosts_path, KnownHostFileKind::OpenSSH)
            .map_err(|err| {
                HadesError::transport(format!(
                    "reading {}: {err}",
                    known_hosts_path.display()
                ))
            })?;
    }

    let dial_addr = host.dial_addr();
    let (hostname, port) = split_host_port(&dial_addr);
    match known.check_port(hostname, port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(HadesError::transport(format!(
            "host key mismatch for {hostname}; remove the stale entry from {} if the host was reinstalled",
            known_hosts_path.display()
        ))),
        CheckResult::NotFound | CheckResult::Failure => match policy {
            HostKeyPolicy::Strict => Err(HadesError::transport(format!(
                "unknown host key for {hostname} (strict checking)"
            ))),
            HostKeyPolicy::TrustOnFirstUse => {
                known
                    .add(hostname, key, "added by hades", key_format(key_type))
                    .map_err(|err| {
                        HadesError::transport(format!("recording host key: {err}"))
                    })?;
                if let Some(parent) = known_hosts_path.parent() {
                    std::fs::create_dir_all(parent).map_err(|err| {
                        HadesError::io(format!("creating {}", parent.display()), err)
                    })?;
                }
                known
                    .write_file(known_hosts_path, KnownHostFileKind::OpenSSH)
                    .map_err(|err| {
                        HadesError::transport(format!(
                            "writing {}: {err}",
                            known_hosts_path.display()
                        ))
                    })?;
                Ok(())
            }
        },
    }
}

fn key_format(key_type: HostKeyType) -> KnownHostKeyFormat {
    match key_type {
        HostKeyType::Rsa => KnownHostKeyFormat::SshRsa,
        HostKeyType::Dss => KnownHostKeyFormat::SshDss,
        HostKeyType::Ecdsa256 => KnownHostKeyFormat::Ecdsa256,
        HostKeyType::Ecdsa384 => KnownHostKeyFormat::Ecdsa384,
        HostKeyType::Ecdsa521 => KnownHostKeyFormat::Ecdsa521,
        HostKeyType::Ed25519 => KnownHostKeyFormat::Ed25519,
        HostKeyType::Unknown => KnownHostKeyFormat::Unknown,
    }
}

fn split_host_port(addr: &str) -> (&str, u16) {
    match addr.rsplit_once(':') {
        Some((hostname, port)) => (hostname, port.parse().unwrap_or(22)),
        None => (addr, 22),
    }
}

/// A lightweight handle on the pooled connection. Every operation opens a
/// fresh channel.
struct SshSession {
    conn: SharedConn,
}

#[async_trait]
impl Session for SshSession {
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

        let conn = self.conn.clone();
        let cmd = cmd.to_string();
        let task = tokio::task::spawn_blocking(move || run_blocking(&conn, &cmd, stdout, stderr));

        tokio::select! {
            _ = cancel.cancelled() => Err(HadesError::Cancelled),
            res = task => {
                res.map_err(|err| HadesError::transport(format!("run task failed: {err}")))?
            }
        }
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

        let conn = self.conn.clone();
        let remote_path = remote_path.to_string();
        let task =
            tokio::task::spawn_blocking(move || copy_blocking(&conn, &content, &remote_path, mode));

        tokio::select! {
            _ = cancel.cancelled() => Err(HadesError::Cancelled),
            res = task => {
                res.map_err(|err| HadesError::transport(format!("copy task failed: {err}")))?
            }
        }
    }
}

fn run_blocking(conn: &SharedConn, cmd: &str, stdout: Sink, stderr: Sink) -> Result<i32> {
    let sess = lock_conn(conn);
    let mut channel = sess
        .channel_session()
        .map_err(|err| HadesError::transport(format!("opening channel: {err}")))?;
    channel
        .exec(cmd)
        .map_err(|err| HadesError::transport(format!("exec: {err}")))?;

    // libssh2 buffers the other stream internally, so draining stdout and
    // then stderr cannot deadlock.
    pump(&mut channel, &stdout)?;
    pump(&mut channel.stderr(), &stderr)?;

    channel
        .wait_close()
        .map_err(|err| HadesError::transport(format!("waiting for close: {err}")))?;
    channel
        .exit_status()
        .map_err(|err| HadesError::transport(format!("exit status: {err}")))
}

fn pump(reader: &mut dyn Read, sink: &Sink) -> Result<()> {
    let mut buf = [0u8; 8192];
    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|err| HadesError::transport(format!("reading channel: {err}")))?;
        if n == 0 {
            return Ok(());
        }
        let mut out = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        out.write_all(&buf[..n])
            .map_err(|err| HadesError::io("writing log sink", err))?;
    }
}

fn copy_blocking(conn: &SharedConn, content: &[u8], remote_path: &str, mode: u32) -> Result<()> {
    let tmp = staging_path(remote_path);
    let sess = lock_conn(conn);

    // Stream the bytes into the staging file and set its mode.
    let mut channel = sess
        .channel_session()
        .map_err(|err| HadesError::transport(format!("opening channel: {err}")))?;
    channel
        .exec(&format!("cat > {tmp} && chmod {mode:o} {tmp}"))
        .map_err(|err| HadesError::transport(format!("starting remote write: {err}")))?;
    channel
        .write_all(content)
        .map_err(|err| HadesError::transport(format!("streaming to {tmp}: {err}")))?;
    channel
        .send_eof()
        .map_err(|err| HadesError::transport(format!("closing stdin: {err}")))?;
    channel
        .wait_eof()
        .map_err(|err| HadesError::transport(format!("waiting for eof: {err}")))?;
    channel
        .wait_close()
        .map_err(|err| HadesError::transport(format!("waiting for close: {err}")))?;
    let status = channel
        .exit_status()
        .map_err(|err| HadesError::transport(format!("exit status: {err}")))?;
    if status != 0 {
        return Err(HadesError::transport(format!(
            "remote write to {tmp} exited with status {status}"
        )));
    }

    // Rename into place on a second channel.
    let mut mv = sess
        .channel_session()
        .map_err(|err| HadesError::transport(format!("opening channel: {err}")))?;
    mv.exec(&format!("mv {tmp} {remote_path}"))
        .map_err(|err| HadesError::transport(format!("mv: {err}")))?;
    mv.wait_close()
        .map_err(|err| HadesError::transport(format!("waiting for close: {err}")))?;
    let status = mv
        .exit_status()
        .map_err(|err| HadesError::transport(format!("exit status: {err}")))?;
    if status != 0 {
        return Err(HadesError::transport(format!(
            "mv {tmp} {remote_path} exited with status {status}"
        )));
    }

    Ok(())
}
