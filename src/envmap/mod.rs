//! Environment layering and `${VAR}` expansion.
//!
//! One substitution scanner serves every consumer: environment values are
//! expanded against the controller's process environment at load time, and
//! action fields (destination paths, template bodies, guard commands) are
//! expanded against the merged per-host environment at run time. The
//! missing-name policy is the only difference between the two uses.

use std::collections::HashMap;

use crate::error::{HadesError, Result};
use crate::schema::Job;
use crate::ssh::Host;

/// Names under this prefix are injected by the runner and may never be
/// declared by user configuration.
pub const RESERVED_PREFIX: &str = "HADES_";

/// What to do when a `${VAR}` reference has no value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnMissing {
    /// Collect the name and fail with the full list.
    Fail,
    /// Leave the reference untouched (used for `run` commands, which may
    /// rely on remote-side shell variables).
    Keep,
}

/// Expand `${VAR}` references in `text` using `lookup`. Returns the
/// expanded string, or the sorted list of missing names under
/// [`OnMissing::Fail`].
pub fn substitute(
    text: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
    on_missing: OnMissing,
) -> std::result::Result<String, Vec<String>> {
    let mut result = String::with_capacity(text.len());
    let mut missing = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if end > 0 => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => result.push_str(&value),
                    None => match on_missing {
                        OnMissing::Fail => missing.push(name.to_string()),
                        OnMissing::Keep => {
                            result.push_str("${");
                            result.push_str(name);
                            result.push('}');
                        }
                    },
                }
                rest = &after[end + 1..];
            }
            // Unclosed or empty reference: emit verbatim and move on.
            _ => {
                result.push_str("${");
                rest = after;
            }
        }
    }
    result.push_str(rest);

    if missing.is_empty() {
        Ok(result)
    } else {
        missing.sort();
        missing.dedup();
        Err(missing)
    }
}

/// Expand `${VAR}` in `text` against an environment map, failing with a
/// ConfigError that lists every missing name.
pub fn substitute_env(text: &str, env: &HashMap<String, String>) -> Result<String> {
    substitute(text, &|name| env.get(name).cloned(), OnMissing::Fail).map_err(|missing| {
        HadesError::config(format!(
            "missing environment variables: {}",
            missing.join(", ")
        ))
    })
}

/// Reject any user-supplied key under the reserved prefix.
pub fn reject_reserved<'a>(keys: impl Iterator<Item = &'a String>) -> Result<()> {
    let mut reserved: Vec<&str> = keys
        .filter(|key| key.starts_with(RESERVED_PREFIX))
        .map(String::as_str)
        .collect();
    if reserved.is_empty() {
        return Ok(());
    }
    reserved.sort_unstable();
    reserved.dedup();
    Err(HadesError::config(format!(
        "user environment may not define {RESERVED_PREFIX}* variables: {}",
        reserved.join(", ")
    )))
}

/// Expand every value of a user map against the controller's process
/// environment, collecting all missing names into one error.
pub fn expand_from_process(env: HashMap<String, String>) -> Result<HashMap<String, String>> {
    let mut expanded = HashMap::with_capacity(env.len());
    let mut all_missing = Vec::new();

    for (key, value) in env {
        match substitute(&value, &|name| std::env::var(name).ok(), OnMissing::Fail) {
            Ok(resolved) => {
                expanded.insert(key, resolved);
            }
            Err(missing) => all_missing.extend(missing),
        }
    }

    if all_missing.is_empty() {
        Ok(expanded)
    } else {
        all_missing.sort();
        all_missing.dedup();
        Err(HadesError::config(format!(
            "missing OS environment variables: {}",
            all_missing.join(", ")
        )))
    }
}

/// Compute the step-scoped environment for a job: job defaults, then the
/// plan, step, and CLI overlays right-biased, reserved prefix rejected,
/// `${VAR}` values expanded from the process environment, and every
/// declared-but-unset name reported.
pub fn resolve_step_env(
    job: &Job,
    layers: &[&indexmap::IndexMap<String, String>],
    cli_env: &HashMap<String, String>,
) -> Result<HashMap<String, String>> {
    let mut merged: HashMap<String, String> = job
        .env
        .iter()
        .filter_map(|(key, default)| default.clone().map(|value| (key.clone(), value)))
        .collect();

    for layer in layers {
        for (key, value) in layer.iter() {
            merged.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in cli_env {
        merged.insert(key.clone(), value.clone());
    }

    reject_reserved(
        job.env
            .keys()
            .chain(layers.iter().flat_map(|layer| layer.keys()))
            .chain(cli_env.keys()),
    )?;

    let merged = expand_from_process(merged)?;

    let mut unset: Vec<&str> = job
        .env
        .keys()
        .filter(|name| !merged.contains_key(*name))
        .map(String::as_str)
        .collect();
    if !unset.is_empty() {
        unset.sort_unstable();
        return Err(HadesError::config(format!(
            "job declares environment variables with no value: {}",
            unset.join(", ")
        )));
    }

    Ok(merged)
}

/// Inject the reserved run metadata. Called last, after every user layer,
/// so no merge path can shadow these names.
pub fn inject_reserved(
    env: &mut HashMap<String, String>,
    run_id: &str,
    plan: &str,
    target: &str,
    host: &Host,
) {
    env.insert("HADES_RUN_ID".to_string(), run_id.to_string());
    env.insert("HADES_PLAN".to_string(), plan.to_string());
    env.insert("HADES_TARGET".to_string(), target.to_string());
    env.insert("HADES_HOST_NAME".to_string(), host.name.clone());
    env.insert("HADES_HOST_ADDR".to_string(), host.address.clone());
}
