//! Configuration discovery and merging.
//!
//! Recursively scans a directory for `*.hades.yml` / `*.hades.yaml`
//! files, parses each, and merges them into one [`ConfigFile`]. Files
//! that parse but contain none of the consumed top-level keys are
//! skipped; a duplicate name across files is a load error.

use std::path::Path;

use walkdir::WalkDir;

use crate::error::{HadesError, Result};
use crate::schema::ConfigFile;

const EXTENSIONS: [&str; 2] = [".hades.yml", ".hades.yaml"];

/// Whether a path looks like a hades configuration file.
pub fn has_config_extension(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| EXTENSIONS.iter().any(|ext| name.ends_with(ext)))
        .unwrap_or(false)
}

/// Parse one configuration file.
pub fn load_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| HadesError::io(format!("reading {}", path.display()), err))?;
    serde_yaml::from_str(&content)
        .map_err(|err| HadesError::config(format!("parsing {}: {err}", path.display())))
}

/// Recursively load and merge every configuration file under `root`.
pub fn load_directory(root: &Path) -> Result<ConfigFile> {
    let mut merged = ConfigFile::default();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry =
            entry.map_err(|err| HadesError::config(format!("scanning {}: {err}", root.display())))?;
        if !entry.file_type().is_file() || !has_config_extension(entry.path()) {
            continue;
        }

        let file = load_file(entry.path())?;
        if file.is_empty() {
            tracing::debug!("skipping {}: no hades keys", entry.path().display());
            continue;
        }
        merge_into(&mut merged, file, entry.path())?;
    }

    Ok(merged)
}

fn merge_into(merged: &mut ConfigFile, file: ConfigFile, path: &Path) -> Result<()> {
    for (name, job) in file.jobs {
        if merged.jobs.contains_key(&name) {
            return Err(duplicate("job", &name, path));
        }
        merged.jobs.insert(name, job);
    }
    for (name, plan) in file.plans {
        if merged.plans.contains_key(&name) {
            return Err(duplicate("plan", &name, path));
        }
        merged.plans.insert(name, plan);
    }
    for (name, registry) in file.registries {
        if merged.registries.contains_key(&name) {
            return Err(duplicate("registry", &name, path));
        }
        merged.registries.insert(name, registry);
    }
    for (name, host) in file.hosts {
        if merged.hosts.contains_key(&name) {
            return Err(duplicate("host", &name, path));
        }
        merged.hosts.insert(name, host);
    }
    for (name, target) in file.targets {
        if merged.targets.contains_key(&name) {
            return Err(duplicate("target", &name, path));
        }
        merged.targets.insert(name, target);
    }
    Ok(())
}

fn duplicate(kind: &str, name: &str, path: &Path) -> HadesError {
    HadesError::config(format!(
        "duplicate {kind} {name:?} found in {}",
        path.display()
    ))
}
