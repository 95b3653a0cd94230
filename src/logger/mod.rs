//! Per-host log streams and the run event log.
//!
//! Every run creates `.hades/logs/<run id>/` with one plain-text log per
//! host and one JSONL event stream for the whole run. Host log writes are
//! atomic per message: both sinks of a host share one file lock.

pub mod events;

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{HadesError, Result};
use crate::ssh::Sink;

pub use events::{EventLog, RunEvent};

/// Default root for run logs.
pub fn log_root() -> PathBuf {
    Path::new(".hades").join("logs")
}

/// Root directory for a run's logs: `.hades/logs/<run id>`.
pub fn run_log_dir(run_id: &str) -> PathBuf {
    log_root().join(run_id)
}

/// Log stream for a single host.
pub struct HostLog {
    host: String,
    file: Arc<Mutex<File>>,
    path: PathBuf,
}

impl HostLog {
    pub fn create(log_dir: &Path, host: &str) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .map_err(|err| HadesError::io(format!("creating {}", log_dir.display()), err))?;
        let path = log_dir.join(format!("{host}.log"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| HadesError::io(format!("opening {}", path.display()), err))?;
        Ok(HostLog {
            host: host.to_string(),
            file: Arc::new(Mutex::new(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn stdout(&self) -> Sink {
        Arc::new(Mutex::new(HostLogWriter {
            file: self.file.clone(),
        }))
    }

    pub fn stderr(&self) -> Sink {
        Arc::new(Mutex::new(HostLogWriter {
            file: self.file.clone(),
        }))
    }

    /// Separator written before each action so a host log reads as a
    /// sequence of clearly delimited sections.
    pub fn action_delimiter(
        &self,
        job: &str,
        kind: &str,
        name: Option<&str>,
        index: usize,
    ) -> Result<()> {
        let title = match name {
            Some(name) => format!("{job} [{index}] {kind} ({name})"),
            None => format!("{job} [{index}] {kind}"),
        };
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(file, "----- {title} -----")
            .map_err(|err| HadesError::io(format!("writing {}.log", self.host), err))
    }
}

/// Writes land whole under the shared file lock, so concurrent stdout and
/// stderr never interleave inside one message.
struct HostLogWriter {
    file: Arc<Mutex<File>>,
}

impl Write for HostLogWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn host_log_collects_both_sinks_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = HostLog::create(dir.path(), "app-1").unwrap();

        log.action_delimiter("deploy", "run", Some("Release"), 3)
            .unwrap();
        {
            let out = log.stdout();
            let mut out = out.lock().unwrap();
            out.write_all(b"hello\n").unwrap();
        }
        {
            let err = log.stderr();
            let mut err = err.lock().unwrap();
            err.write_all(b"warn\n").unwrap();
        }

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert!(content.contains("----- deploy [3] run (Release) -----"));
        assert!(content.contains("hello"));
        assert!(content.contains("warn"));
    }

    #[test]
    fn run_log_dir_is_per_run() {
        assert_eq!(
            run_log_dir("hades-x"),
            PathBuf::from(".hades/logs/hades-x")
        );
    }
}
