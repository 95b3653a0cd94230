//! Inventory: named hosts and ordered target groups.
//!
//! Built from the merged configuration; every target must reference a
//! defined host, checked at load time so a bad group name can never
//! surface mid-rollout.

use indexmap::IndexMap;

use crate::error::{HadesError, Result};
use crate::schema::ConfigFile;
use crate::ssh::Host;

#[derive(Debug)]
pub struct Inventory {
    hosts: IndexMap<String, Host>,
    targets: IndexMap<String, Vec<String>>,
}

impl Inventory {
    pub fn from_config(file: &ConfigFile) -> Result<Self> {
        let mut hosts = IndexMap::with_capacity(file.hosts.len());
        for (name, def) in &file.hosts {
            let address = if def.addr.contains(':') {
                def.addr.clone()
            } else if let Some(port) = def.port {
                format!("{}:{port}", def.addr)
            } else {
                def.addr.clone()
            };
            hosts.insert(
                name.clone(),
                Host {
                    name: name.clone(),
                    address,
                    user: def.user.clone(),
                    key_path: expand_tilde(&def.identity_file),
                },
            );
        }

        for (target, members) in &file.targets {
            if members.is_empty() {
                return Err(HadesError::inventory(format!(
                    "target {target:?} has no hosts"
                )));
            }
            for member in members {
                if !hosts.contains_key(member) {
                    return Err(HadesError::inventory(format!(
                        "target {target:?} references undefined host {member:?}"
                    )));
                }
            }
        }

        Ok(Inventory {
            hosts,
            targets: file.targets.clone(),
        })
    }

    /// Hosts of a target group, in inventory order.
    pub fn resolve_target(&self, name: &str) -> Result<Vec<Host>> {
        let members = self
            .targets
            .get(name)
            .ok_or_else(|| HadesError::inventory(format!("target {name:?} not found")))?;

        Ok(members
            .iter()
            .map(|member| {
                self.hosts
                    .get(member)
                    .cloned()
                    .expect("membership checked at load")
            })
            .collect())
    }

    pub fn has_target(&self, name: &str) -> bool {
        self.targets.contains_key(name)
    }

    pub fn all_hosts(&self) -> Vec<Host> {
        self.hosts.values().cloned().collect()
    }
}

/// Expand a leading `~/` against `$HOME`; used for `identity_file`.
fn expand_tilde(path: &str) -> std::path::PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return std::path::Path::new(&home).join(rest);
        }
    }
    std::path::PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> ConfigFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn resolves_targets_in_inventory_order() {
        let file = config(
            r#"
hosts:
  web-2:
    addr: 10.0.0.2
    user: root
    identity_file: /keys/id
  web-1:
    addr: 10.0.0.1
    user: root
    identity_file: /keys/id
targets:
  web: [web-2, web-1]
"#,
        );
        let inv = Inventory::from_config(&file).unwrap();
        let hosts = inv.resolve_target("web").unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].name, "web-2");
        assert_eq!(hosts[1].name, "web-1");
    }

    #[test]
    fn unknown_target_is_an_inventory_error() {
        let file = config("hosts: {}\ntargets: {}\n");
        let inv = Inventory::from_config(&file).unwrap();
        let err = inv.resolve_target("nope").unwrap_err();
        assert!(matches!(err, HadesError::Inventory(_)));
    }

    #[test]
    fn target_with_undefined_host_fails_at_load() {
        let file = config(
            r#"
hosts:
  web-1:
    addr: 10.0.0.1
    user: root
    identity_file: /keys/id
targets:
  web: [web-1, ghost]
"#,
        );
        let err = Inventory::from_config(&file).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn empty_target_group_fails_at_load() {
        let file = config(
            r#"
hosts:
  web-1:
    addr: 10.0.0.1
    user: root
    identity_file: /keys/id
targets:
  web: []
"#,
        );
        let err = Inventory::from_config(&file).unwrap_err();
        assert!(err.to_string().contains("no hosts"));
    }

    #[test]
    fn port_key_lands_in_address_unless_addr_has_one() {
        let file = config(
            r#"
hosts:
  a:
    addr: 10.0.0.1
    port: 2222
    user: root
    identity_file: /keys/id
  b:
    addr: 10.0.0.2:2200
    port: 9
    user: root
    identity_file: /keys/id
targets:
  all: [a, b]
"#,
        );
        let inv = Inventory::from_config(&file).unwrap();
        let hosts = inv.resolve_target("all").unwrap();
        assert_eq!(hosts[0].address, "10.0.0.1:2222");
        assert_eq!(hosts[1].address, "10.0.0.2:2200");
    }
}
