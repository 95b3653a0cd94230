//! Controller-side template rendering.
//!
//! The source file is read on the controller, `${VAR}` references are
//! substituted from the merged environment (a missing name is an error),
//! and the result is atomically placed on the host. No checksum
//! short-circuit: rendered output legitimately differs between runs.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{format_size, log_line, Action, Outcome};
use crate::envmap::{self, substitute_env, OnMissing};
use crate::error::{HadesError, Result};
use crate::runtime::Runtime;
use crate::schema::TemplateSpec;

pub struct TemplateAction {
    spec: TemplateSpec,
}

impl TemplateAction {
    pub fn from_spec(spec: TemplateSpec) -> Self {
        TemplateAction { spec }
    }
}

#[async_trait]
impl Action for TemplateAction {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome> {
        let source = tokio::fs::read_to_string(&self.spec.src)
            .await
            .map_err(|err| HadesError::io(format!("reading template {}", self.spec.src), err))?;

        let rendered = envmap::substitute(&source, &|name| rt.env.get(name).cloned(), OnMissing::Fail)
            .map_err(|missing| {
                HadesError::config(format!(
                    "template {}: missing variables: {}",
                    self.spec.src,
                    missing.join(", ")
                ))
            })?;
        let dst = substitute_env(&self.spec.dst, &rt.env)?;

        let session = rt.transport.connect(&rt.host).await?;
        let bytes = rendered.into_bytes();
        let size = format_size(bytes.len());
        session
            .copy_file(&rt.cancel, bytes, &dst, self.spec.mode)
            .await?;

        log_line(
            &rt.log_out,
            &format!("Rendered {} to {dst} ({size})", self.spec.src),
        )?;
        Ok(Outcome::Done)
    }

    fn describe(&self, env: &HashMap<String, String>) -> String {
        let dst = substitute_env(&self.spec.dst, env).unwrap_or_else(|_| self.spec.dst.clone());
        format!(
            "template: {} to {dst} (mode: {:o})",
            self.spec.src, self.spec.mode
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::mock::MockClient;
    use crate::testutil::RuntimeBuilder;
    use std::io::Write as _;
    use std::sync::Arc;

    fn write_template(dir: &tempfile::TempDir, content: &str) -> String {
        let path = dir.path().join("Caddyfile");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn renders_with_merged_and_reserved_environment() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_template(&dir, "# run: ${HADES_RUN_ID}\n${DOMAIN} {\n}\n");

        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock.clone())
            .env("DOMAIN", "beta.example.tld")
            .build();

        let spec: TemplateSpec =
            serde_yaml::from_str(&format!("src: {src}\ndst: /etc/caddy/Caddyfile\n")).unwrap();
        TemplateAction::from_spec(spec).execute(&rt).await.unwrap();

        let placed = mock.placed();
        assert_eq!(placed.len(), 1);
        let content = String::from_utf8(placed[0].content.clone()).unwrap();
        assert!(content.contains("# run: hades-test"));
        assert!(content.contains("beta.example.tld {"));
    }

    #[tokio::test]
    async fn missing_variable_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = write_template(&dir, "${NOT_DECLARED}\n");

        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock.clone()).build();

        let spec: TemplateSpec =
            serde_yaml::from_str(&format!("src: {src}\ndst: /out\n")).unwrap();
        let err = TemplateAction::from_spec(spec)
            .execute(&rt)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("NOT_DECLARED"));
        assert!(mock.placed().is_empty());
    }

    #[tokio::test]
    async fn missing_source_file_is_an_error() {
        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock).build();
        let spec: TemplateSpec =
            serde_yaml::from_str("src: /no/such/template\ndst: /out\n").unwrap();
        assert!(TemplateAction::from_spec(spec).execute(&rt).await.is_err());
    }
}
