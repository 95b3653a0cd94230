//! YAML schema for jobs, plans, registries, hosts, and targets.
//!
//! These types mirror the five top-level keys consumed from
//! `*.hades.yml` files. Structural validation lives here too: every
//! action must populate exactly one variant, every step must reference a
//! known job, and artifact references must be declared by the enclosing
//! job. The loader merges files; the validator rejects what the executor
//! must never see.

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{HadesError, Result};
use crate::rollout;

// ============================================================================
// File root
// ============================================================================

/// Merged view of every configuration file in a directory tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub jobs: IndexMap<String, Job>,

    #[serde(default)]
    pub plans: IndexMap<String, Plan>,

    #[serde(default)]
    pub registries: IndexMap<String, RegistryConfig>,

    #[serde(default)]
    pub hosts: IndexMap<String, HostDef>,

    #[serde(default)]
    pub targets: IndexMap<String, Vec<String>>,
}

impl ConfigFile {
    /// A file with none of the consumed keys is ignored during merge.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
            && self.plans.is_empty()
            && self.registries.is_empty()
            && self.hosts.is_empty()
            && self.targets.is_empty()
    }
}

// ============================================================================
// Jobs and actions
// ============================================================================

/// Reusable sequence of actions with defaults, guard, and artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Job {
    /// Run on the controller instead of a remote host.
    #[serde(default)]
    pub local: bool,

    #[serde(default)]
    pub guard: Option<Guard>,

    /// Declared environment names with optional defaults. A declared name
    /// with no default must be provided by a plan, step, or CLI overlay.
    #[serde(default)]
    pub env: IndexMap<String, Option<String>>,

    /// Named byte blobs loaded from the controller's disk before the job
    /// runs.
    #[serde(default)]
    pub artifacts: IndexMap<String, ArtifactDef>,

    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Predicate command gating job execution per host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Guard {
    #[serde(rename = "if")]
    pub if_cmd: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactDef {
    pub path: String,
}

/// One unit of side-effecting work. Exactly one variant field may be
/// populated; the validator enforces this at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Action {
    /// Optional human name used in logging.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub run: Option<String>,

    #[serde(default)]
    pub copy: Option<CopySpec>,

    #[serde(default)]
    pub template: Option<TemplateSpec>,

    #[serde(default)]
    pub mkdir: Option<MkdirSpec>,

    #[serde(default)]
    pub gpg: Option<GpgSpec>,

    #[serde(default)]
    pub push: Option<PushSpec>,

    #[serde(default)]
    pub pull: Option<PullSpec>,

    #[serde(default)]
    pub wait: Option<WaitSpec>,
}

impl Action {
    /// Number of populated variant fields.
    pub fn populated(&self) -> usize {
        [
            self.run.is_some(),
            self.copy.is_some(),
            self.template.is_some(),
            self.mkdir.is_some(),
            self.gpg.is_some(),
            self.push.is_some(),
            self.pull.is_some(),
            self.wait.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }

    /// The kind label of the populated variant.
    pub fn kind(&self) -> &'static str {
        if self.run.is_some() {
            "run"
        } else if self.copy.is_some() {
            "copy"
        } else if self.template.is_some() {
            "template"
        } else if self.mkdir.is_some() {
            "mkdir"
        } else if self.gpg.is_some() {
            "gpg"
        } else if self.push.is_some() {
            "push"
        } else if self.pull.is_some() {
            "pull"
        } else if self.wait.is_some() {
            "wait"
        } else {
            "unknown"
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopySpec {
    /// Local source path. Mutually exclusive with `artifact`.
    #[serde(default)]
    pub src: Option<String>,

    /// Destination path on the host; `${VAR}` references are expanded
    /// against the merged environment.
    pub dst: String,

    /// Artifact name declared by the enclosing job.
    #[serde(default)]
    pub artifact: Option<String>,

    #[serde(default = "default_file_mode", deserialize_with = "de_mode")]
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// Source path on the controller.
    pub src: String,

    /// Destination path on the host.
    pub dst: String,

    #[serde(default = "default_file_mode", deserialize_with = "de_mode")]
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkdirSpec {
    pub path: String,

    #[serde(default = "default_dir_mode", deserialize_with = "de_mode")]
    pub mode: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpgSpec {
    /// URL of the keyring to download.
    pub src: String,

    /// Destination path on the host.
    pub path: String,

    #[serde(default = "default_file_mode", deserialize_with = "de_mode")]
    pub mode: u32,

    /// Convert an ASCII-armored keyring to binary with `gpg --dearmor`.
    #[serde(default)]
    pub dearmor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushSpec {
    pub registry: String,
    pub artifact: String,
    pub name: String,
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullSpec {
    pub registry: String,
    pub name: String,
    pub tag: String,

    /// Destination path on the host.
    pub to: String,

    #[serde(default = "default_file_mode", deserialize_with = "de_mode")]
    pub mode: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WaitSpec {
    #[serde(default)]
    pub message: Option<String>,

    /// Humantime duration string, e.g. `30s` or `2m`. Defaults to 10s.
    #[serde(default)]
    pub timeout: Option<String>,
}

// ============================================================================
// Plans
// ============================================================================

/// Ordered list of steps executed in sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    /// Plan-level environment overlay, applied above job defaults and
    /// below step overlays.
    #[serde(default)]
    pub env: IndexMap<String, String>,

    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Binding of one job to one or more target groups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Display name; the job name is used when omitted.
    #[serde(default)]
    pub name: Option<String>,

    pub job: String,

    pub targets: Vec<String>,

    #[serde(default)]
    pub env: IndexMap<String, String>,

    /// Rollout spec: empty, an integer, or a percentage like `40%`.
    #[serde(default)]
    pub parallelism: String,

    /// Canary cap applied before batch partitioning. Zero means no limit.
    #[serde(default)]
    pub limit: usize,
}

impl Step {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.job)
    }
}

// ============================================================================
// Registries
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub bucket: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default)]
    pub params: IndexMap<String, String>,
}

// ============================================================================
// Hosts
// ============================================================================

/// Host entry as written in inventory YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDef {
    pub addr: String,

    /// SSH port; an explicit port inside `addr` wins.
    #[serde(default)]
    pub port: Option<u16>,

    pub user: String,

    pub identity_file: String,
}

// ============================================================================
// File modes
// ============================================================================

fn default_file_mode() -> u32 {
    0o644
}

fn default_dir_mode() -> u32 {
    0o755
}

/// Accept `mode: "0644"` (octal string) or `mode: 0644` (bare number whose
/// decimal digits are read as octal, the way every operator writes modes).
fn de_mode<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ModeRepr {
        Number(u64),
        Text(String),
    }

    let digits = match ModeRepr::deserialize(deserializer)? {
        ModeRepr::Number(n) => n.to_string(),
        ModeRepr::Text(s) => s,
    };

    u32::from_str_radix(digits.trim_start_matches("0o"), 8)
        .map_err(|_| D::Error::custom(format!("invalid file mode {digits:?}")))
}

// ============================================================================
// Validation
// ============================================================================

/// Check the merged file for structural correctness. Everything rejected
/// here would otherwise surface mid-run on a remote host.
pub fn validate(file: &ConfigFile) -> Result<()> {
    for (plan_name, plan) in &file.plans {
        for (idx, step) in plan.steps.iter().enumerate() {
            if !file.jobs.contains_key(&step.job) {
                return Err(HadesError::config(format!(
                    "plan {plan_name:?} step {idx} references unknown job {:?}",
                    step.job
                )));
            }
            if step.targets.is_empty() {
                return Err(HadesError::config(format!(
                    "plan {plan_name:?} step {idx} has no targets"
                )));
            }
            rollout::validate_spec(&step.parallelism).map_err(|err| {
                HadesError::config(format!("plan {plan_name:?} step {idx}: {err}"))
            })?;
        }
    }

    for (job_name, job) in &file.jobs {
        for (idx, action) in job.actions.iter().enumerate() {
            validate_action(file, job_name, job, idx, action)?;
        }
    }

    Ok(())
}

fn validate_action(
    file: &ConfigFile,
    job_name: &str,
    job: &Job,
    idx: usize,
    action: &Action,
) -> Result<()> {
    match action.populated() {
        0 => {
            return Err(HadesError::config(format!(
                "job {job_name:?} action {idx} has no action type set"
            )))
        }
        1 => {}
        n => {
            return Err(HadesError::config(format!(
                "job {job_name:?} action {idx} has {n} action types set, expected exactly one"
            )))
        }
    }

    if let Some(copy) = &action.copy {
        match (&copy.src, &copy.artifact) {
            (Some(_), Some(_)) | (None, None) => {
                return Err(HadesError::config(format!(
                    "job {job_name:?} action {idx}: copy requires exactly one of src or artifact"
                )));
            }
            (_, Some(artifact)) if !job.artifacts.contains_key(artifact) => {
                return Err(HadesError::config(format!(
                    "job {job_name:?} action {idx}: artifact {artifact:?} is not declared by the job"
                )));
            }
            _ => {}
        }
    }

    if let Some(push) = &action.push {
        if !job.artifacts.contains_key(&push.artifact) {
            return Err(HadesError::config(format!(
                "job {job_name:?} action {idx}: artifact {:?} is not declared by the job",
                push.artifact
            )));
        }
        if !file.registries.contains_key(&push.registry) {
            return Err(HadesError::config(format!(
                "job {job_name:?} action {idx}: unknown registry {:?}",
                push.registry
            )));
        }
    }

    if let Some(pull) = &action.pull {
        if !file.registries.contains_key(&pull.registry) {
            return Err(HadesError::config(format!(
                "job {job_name:?} action {idx}: unknown registry {:?}",
                pull.registry
            )));
        }
    }

    if let Some(wait) = &action.wait {
        if let Some(timeout) = &wait.timeout {
            humantime::parse_duration(timeout).map_err(|err| {
                HadesError::config(format!(
                    "job {job_name:?} action {idx}: invalid wait timeout {timeout:?}: {err}"
                ))
            })?;
        }
    }

    Ok(())
}
