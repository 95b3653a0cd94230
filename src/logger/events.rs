//! Append-only JSONL event stream for a run.
//!
//! One `events.jsonl` per run, next to the host logs. Events are
//! timestamped and self-describing so a run can be audited after the
//! console scrollback is gone.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::{HadesError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        plan: String,
        run_id: String,
    },
    StepStarted {
        step: String,
        job: String,
    },
    ArtifactLoaded {
        name: String,
        path: String,
        bytes: usize,
    },
    JobSkipped {
        host: String,
        job: String,
    },
    ActionStarted {
        host: String,
        label: String,
    },
    ActionCompleted {
        host: String,
        label: String,
    },
    ActionSkipped {
        host: String,
        label: String,
        reason: String,
    },
    ActionFailed {
        host: String,
        label: String,
        error: String,
    },
    RunCompleted {
        run_id: String,
        duration_seconds: f64,
    },
    RunFailed {
        run_id: String,
        step: String,
        host: String,
        error: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// Current UTC timestamp in ISO 8601.
pub fn now_iso8601() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

pub struct EventLog {
    file: Mutex<File>,
}

impl EventLog {
    pub fn create(log_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(log_dir)
            .map_err(|err| HadesError::io(format!("creating {}", log_dir.display()), err))?;
        let path = log_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| HadesError::io(format!("opening {}", path.display()), err))?;
        Ok(EventLog {
            file: Mutex::new(file),
        })
    }

    /// Append one event. Failures are reported but callers typically treat
    /// the event log as best-effort.
    pub fn append(&self, event: RunEvent) -> Result<()> {
        let stamped = TimestampedEvent {
            ts: now_iso8601(),
            event,
        };
        let json = serde_json::to_string(&stamped)
            .map_err(|err| HadesError::config(format!("serializing event: {err}")))?;
        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        writeln!(file, "{json}").map_err(|err| HadesError::io("writing events.jsonl", err))
    }
}
