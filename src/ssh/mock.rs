//! Scripted transport double for engine and action tests.
//!
//! `MockClient` records every dial, command, and file placement, and
//! answers commands from substring-matched rules. No network is touched.

use std::io::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Client, Host, Session, Sink};
use crate::error::{HadesError, Result};

/// Canned response for a command rule.
#[derive(Debug, Clone, Default)]
pub struct MockResponse {
    pub stdout: String,
    pub status: i32,
    /// Simulate a session failure instead of an exit status.
    pub error: bool,
    /// Hold the command open, simulating a slow remote.
    pub delay_ms: u64,
}

impl MockResponse {
    pub fn ok(stdout: impl Into<String>) -> Self {
        MockResponse {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn status(status: i32) -> Self {
        MockResponse {
            status,
            ..Default::default()
        }
    }

    pub fn error() -> Self {
        MockResponse {
            error: true,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }
}

/// A file placed through the mock transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedFile {
    pub host: String,
    pub path: String,
    pub content: Vec<u8>,
    pub mode: u32,
}

#[derive(Default)]
struct MockState {
    rules: Vec<(String, MockResponse)>,
    commands: Vec<(String, String)>,
    placed: Vec<PlacedFile>,
}

/// Shared scripted transport.
#[derive(Clone, Default)]
pub struct MockClient {
    state: Arc<Mutex<MockState>>,
    dials: Arc<AtomicUsize>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer commands containing `pattern` with `response`. Rules match
    /// in insertion order; unmatched commands succeed with empty output.
    pub fn rule(&self, pattern: impl Into<String>, response: MockResponse) {
        self.state
            .lock()
            .expect("mock state poisoned")
            .rules
            .push((pattern.into(), response));
    }

    /// Every `(host, command)` executed, in arrival order.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .commands
            .clone()
    }

    /// Every file placed via `copy_file`.
    pub fn placed(&self) -> Vec<PlacedFile> {
        self.state
            .lock()
            .expect("mock state poisoned")
            .placed
            .clone()
    }

    pub fn dial_count(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Client for MockClient {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Session>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockSession {
            host: host.name.clone(),
            state: self.state.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct MockSession {
    host: String,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Session for MockSession {
    async fn run(
        &self,
        cancel: &CancellationToken,
        cmd: &str,
        stdout: Sink,
        _stderr: Sink,
    ) -> Result<i32> {
        if cancel.is_cancelled() {
            return Err(HadesError::Cancelled);
        }

        let response = {
            let mut state = self.state.lock().expect("mock state poisoned");
            state.commands.push((self.host.clone(), cmd.to_string()));
            state
                .rules
                .iter()
                .find(|(pattern, _)| cmd.contains(pattern))
                .map(|(_, response)| response.clone())
                .unwrap_or_default()
        };

        if response.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(response.delay_ms)).await;
        }
        if response.error {
            return Err(HadesError::transport(format!(
                "scripted failure for {cmd:?}"
            )));
        }
        if !response.stdout.is_empty() {
            let mut out = stdout.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            out.write_all(response.stdout.as_bytes())
                .map_err(|err| HadesError::io("writing mock stdout", err))?;
        }
        Ok(response.status)
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
        let mut state = self.state.lock().expect("mock state poisoned");
        state.placed.push(PlacedFile {
            host: self.host.clone(),
            path: remote_path.to_string(),
            content,
            mode,
        });
        Ok(())
    }
}
