//! Action catalog.
//!
//! Each action kind implements [`Action`]: an async `execute` against the
//! per-host runtime, and a `describe` used by dry runs. Construction from
//! the schema happens in [`build`]; the validator has already guaranteed
//! exactly one populated variant.

mod copy;
mod gpg;
pub mod guard;
mod mkdir;
mod pull;
mod push;
mod run;
mod template;
mod wait;

use std::collections::HashMap;
use std::io::Write as _;

use async_trait::async_trait;

use crate::error::{HadesError, Result};
use crate::runtime::Runtime;
use crate::schema;
use crate::ssh::Sink;

pub use copy::CopyAction;
pub use gpg::GpgAction;
pub use mkdir::MkdirAction;
pub use pull::PullAction;
pub use push::PushAction;
pub use run::RunAction;
pub use template::TemplateAction;
pub use wait::WaitAction;

/// How an action finished. `Skipped` carries the operator-facing reason
/// (for copy, that the destination already matches the source).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Skipped(String),
}

#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome>;

    /// One-line self-description for dry runs, with `${VAR}` references
    /// resolved against `env` where that is safe.
    fn describe(&self, env: &HashMap<String, String>) -> String;
}

/// Construct the concrete action from its populated variant.
pub fn build(spec: &schema::Action) -> Result<Box<dyn Action>> {
    if let Some(cmd) = &spec.run {
        return Ok(Box::new(RunAction::new(cmd.clone())));
    }
    if let Some(copy) = &spec.copy {
        return Ok(Box::new(CopyAction::from_spec(copy.clone())));
    }
    if let Some(template) = &spec.template {
        return Ok(Box::new(TemplateAction::from_spec(template.clone())));
    }
    if let Some(mkdir) = &spec.mkdir {
        return Ok(Box::new(MkdirAction::from_spec(mkdir.clone())));
    }
    if let Some(gpg) = &spec.gpg {
        return Ok(Box::new(GpgAction::from_spec(gpg.clone())));
    }
    if let Some(push) = &spec.push {
        return Ok(Box::new(PushAction::from_spec(push.clone())));
    }
    if let Some(pull) = &spec.pull {
        return Ok(Box::new(PullAction::from_spec(pull.clone())));
    }
    if let Some(wait) = &spec.wait {
        return Ok(Box::new(WaitAction::from_spec(wait.clone())));
    }
    Err(HadesError::config("action has no populated variant"))
}

/// Write one line to a host log sink.
pub(crate) fn log_line(sink: &Sink, message: &str) -> Result<()> {
    let mut out = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    writeln!(out, "{message}").map_err(|err| HadesError::io("writing log sink", err))
}

/// Human-readable size: bytes below 1 KiB, then KiB, then MiB.
pub(crate) fn format_size(size: usize) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let size_f = size as f64;
    if size_f < KIB {
        format!("{size} bytes")
    } else if size_f < MIB {
        format!("{:.2} KiB", size_f / KIB)
    } else {
        format!("{:.2} MiB", size_f / MIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_format_in_binary_units() {
        assert_eq!(format_size(5), "5 bytes");
        assert_eq!(format_size(2048), "2.00 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MiB");
    }

    #[test]
    fn build_dispatches_every_variant() {
        let yaml = r#"
jobs:
  all:
    artifacts:
      bin:
        path: build/app
    actions:
      - run: echo hi
      - copy: { src: ./a, dst: /b }
      - template: { src: ./t, dst: /c }
      - mkdir: { path: /d }
      - gpg: { src: "https://example.com/key", path: /e }
      - push: { registry: r, artifact: bin, name: app, tag: v1 }
      - pull: { registry: r, name: app, tag: v1, to: /f }
      - wait: { message: hold, timeout: 1s }
"#;
        let file: schema::ConfigFile = serde_yaml::from_str(yaml).unwrap();
        for action in &file.jobs["all"].actions {
            assert!(build(action).is_ok(), "failed to build {}", action.kind());
        }
    }
}
