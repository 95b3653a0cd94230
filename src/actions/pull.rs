//! Fetch a blob from a registry and place it on the host.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{format_size, log_line, Action, Outcome};
use crate::envmap::substitute_env;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::schema::PullSpec;

pub struct PullAction {
    spec: PullSpec,
}

impl PullAction {
    pub fn from_spec(spec: PullSpec) -> Self {
        PullAction { spec }
    }
}

#[async_trait]
impl Action for PullAction {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome> {
        let registry = rt.registries.get(&self.spec.registry)?;
        let bytes = registry.pull(&self.spec.name, &self.spec.tag).await?;
        let size = format_size(bytes.len());
        let to = substitute_env(&self.spec.to, &rt.env)?;

        let session = rt.transport.connect(&rt.host).await?;
        session
            .copy_file(&rt.cancel, bytes, &to, self.spec.mode)
            .await?;

        log_line(
            &rt.log_out,
            &format!(
                "Pulled {}/{}:{} to {to} ({size})",
                self.spec.registry, self.spec.name, self.spec.tag
            ),
        )?;
        Ok(Outcome::Done)
    }

    fn describe(&self, env: &HashMap<String, String>) -> String {
        let to = substitute_env(&self.spec.to, env).unwrap_or_else(|_| self.spec.to.clone());
        format!(
            "pull: {}/{}:{} to {to} (mode: {:o})",
            self.spec.registry, self.spec.name, self.spec.tag, self.spec.mode
        )
    }
}
