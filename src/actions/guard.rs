//! Guard predicate evaluation.
//!
//! A guard's command runs on the host before the job's actions. Exit zero
//! means the job proceeds; any other exit skips the job on that host
//! without failing the step. A session that cannot be established is a
//! hard error.

use crate::envmap::substitute_env;
use crate::error::Result;
use crate::runtime::Runtime;
use crate::schema::Guard;
use crate::ssh::{capture, captured_string, discard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardDecision {
    /// `true` means run the job; `false` means skip this host.
    pub proceed: bool,
    /// Captured stdout, kept for diagnostics.
    pub output: String,
}

pub async fn evaluate(guard: &Guard, rt: &Runtime) -> Result<GuardDecision> {
    let cmd = substitute_env(&guard.if_cmd, &rt.env)?;
    let session = rt.transport.connect(&rt.host).await?;

    let (sink, buffer) = capture();
    let status = session.run(&rt.cancel, &cmd, sink, discard()).await?;

    Ok(GuardDecision {
        proceed: status == 0,
        output: captured_string(&buffer),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::mock::{MockClient, MockResponse};
    use crate::testutil::RuntimeBuilder;
    use std::sync::Arc;

    fn guard(cmd: &str) -> Guard {
        serde_yaml::from_str(&format!("if: {cmd:?}\n")).unwrap()
    }

    #[tokio::test]
    async fn zero_exit_proceeds() {
        let mock = Arc::new(MockClient::new());
        mock.rule("which caddy", MockResponse::ok("/usr/bin/caddy\n"));
        let rt = RuntimeBuilder::new(mock).build();

        let decision = evaluate(&guard("which caddy"), &rt).await.unwrap();
        assert!(decision.proceed);
        assert_eq!(decision.output, "/usr/bin/caddy\n");
    }

    #[tokio::test]
    async fn non_zero_exit_skips_without_error() {
        let mock = Arc::new(MockClient::new());
        mock.rule("! which caddy", MockResponse::status(1));
        let rt = RuntimeBuilder::new(mock).build();

        let decision = evaluate(&guard("! which caddy"), &rt).await.unwrap();
        assert!(!decision.proceed);
    }

    #[tokio::test]
    async fn session_failure_is_a_hard_error() {
        let mock = Arc::new(MockClient::new());
        mock.rule("test -f", MockResponse::error());
        let rt = RuntimeBuilder::new(mock).build();

        assert!(evaluate(&guard("test -f /etc/ready"), &rt).await.is_err());
    }

    #[tokio::test]
    async fn guard_command_expands_environment() {
        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock.clone())
            .env("SERVICE", "caddy")
            .build();

        evaluate(&guard("systemctl is-active ${SERVICE}"), &rt)
            .await
            .unwrap();
        assert_eq!(mock.commands()[0].1, "systemctl is-active caddy");
    }
}
