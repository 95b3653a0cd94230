//! GPG keyring installation.
//!
//! Downloads a keyring over HTTPS (TLS 1.0 floor, five-minute timeout)
//! and places it on the host, optionally converting ASCII armor to binary
//! with `gpg --dearmor` through a per-run staging file.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{Action, Outcome};
use crate::envmap::substitute_env;
use crate::error::{HadesError, Result};
use crate::runtime::Runtime;
use crate::schema::GpgSpec;

const FETCH_TIMEOUT: Duration = Duration::from_secs(300);
const ERROR_BODY_LIMIT: usize = 1024;

pub struct GpgAction {
    spec: GpgSpec,
}

impl GpgAction {
    pub fn from_spec(spec: GpgSpec) -> Self {
        GpgAction { spec }
    }
}

#[async_trait]
impl Action for GpgAction {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome> {
        let src = substitute_env(&self.spec.src, &rt.env)?;
        let path = substitute_env(&self.spec.path, &rt.env)?;

        let body = tokio::select! {
            _ = rt.cancel.cancelled() => return Err(HadesError::Cancelled),
            res = fetch(&src) => res?,
        };

        let session = rt.transport.connect(&rt.host).await?;
        let mode = self.spec.mode;

        if self.spec.dearmor {
            let staging = format!("/tmp/hades-gpg-{}.asc", rt.run_id);
            session
                .copy_file(&rt.cancel, body, &staging, 0o644)
                .await?;
            let dearmor = format!(
                "gpg --dearmor -o {path} < {staging} && chmod {mode:o} {path} && rm -f {staging}"
            );
            let status = session
                .run(&rt.cancel, &dearmor, rt.log_out.clone(), rt.log_err.clone())
                .await?;
            if status != 0 {
                return Err(HadesError::transport(format!(
                    "gpg --dearmor exited with status {status}"
                )));
            }
        } else {
            session.copy_file(&rt.cancel, body, &path, mode).await?;
        }

        Ok(Outcome::Done)
    }

    fn describe(&self, env: &HashMap<String, String>) -> String {
        let src = substitute_env(&self.spec.src, env).unwrap_or_else(|_| self.spec.src.clone());
        let path = substitute_env(&self.spec.path, env).unwrap_or_else(|_| self.spec.path.clone());
        if self.spec.dearmor {
            format!("gpg: download {src}, dearmor to {path} (mode: {:o})", self.spec.mode)
        } else {
            format!("gpg: download {src} to {path} (mode: {:o})", self.spec.mode)
        }
    }
}

async fn fetch(url: &str) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder()
        .user_agent(format!("hades/{}", env!("CARGO_PKG_VERSION")))
        .timeout(FETCH_TIMEOUT)
        .min_tls_version(reqwest::tls::Version::TLS_1_0)
        .build()
        .map_err(|err| HadesError::Http(format!("building http client: {err}")))?;

    let response = client
        .get(url)
        .header(reqwest::header::ACCEPT, "*/*")
        .send()
        .await
        .map_err(|err| HadesError::Http(format!("downloading {url}: {err}")))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        let prefix: String = body.chars().take(ERROR_BODY_LIMIT).collect();
        return Err(HadesError::Http(format!(
            "downloading {url}: HTTP {status}\nResponse: {prefix}"
        )));
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|err| HadesError::Http(format!("reading body of {url}: {err}")))?;
    Ok(bytes.to_vec())
}
