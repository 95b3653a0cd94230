//! Directory creation on a host.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{Action, Outcome};
use crate::envmap::substitute_env;
use crate::error::{HadesError, Result};
use crate::runtime::Runtime;
use crate::schema::MkdirSpec;

pub struct MkdirAction {
    spec: MkdirSpec,
}

impl MkdirAction {
    pub fn from_spec(spec: MkdirSpec) -> Self {
        MkdirAction { spec }
    }
}

#[async_trait]
impl Action for MkdirAction {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome> {
        let path = substitute_env(&self.spec.path, &rt.env)?;
        let mode = self.spec.mode;
        let session = rt.transport.connect(&rt.host).await?;
        let status = session
            .run(
                &rt.cancel,
                &format!("mkdir -p {path} && chmod {mode:o} {path}"),
                rt.log_out.clone(),
                rt.log_err.clone(),
            )
            .await?;
        if status != 0 {
            return Err(HadesError::transport(format!(
                "mkdir {path} exited with status {status}"
            )));
        }
        Ok(Outcome::Done)
    }

    fn describe(&self, env: &HashMap<String, String>) -> String {
        let path = substitute_env(&self.spec.path, env).unwrap_or_else(|_| self.spec.path.clone());
        format!("mkdir: {path} (mode: {:o})", self.spec.mode)
    }
}
