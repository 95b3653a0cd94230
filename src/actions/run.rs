//! Shell command execution on a host.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{Action, Outcome};
use crate::envmap::{self, OnMissing};
use crate::error::{HadesError, Result};
use crate::runtime::Runtime;

pub struct RunAction {
    command: String,
}

impl RunAction {
    pub fn new(command: String) -> Self {
        RunAction { command }
    }

    /// Known `${VAR}` references resolve on the controller; unknown ones
    /// are left intact for the remote shell.
    fn expanded(&self, env: &HashMap<String, String>) -> String {
        substitute_keep(&self.command, env)
    }
}

fn substitute_keep(text: &str, env: &HashMap<String, String>) -> String {
    envmap::substitute(text, &|name| env.get(name).cloned(), OnMissing::Keep)
        .expect("keep policy never fails")
}

#[async_trait]
impl Action for RunAction {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome> {
        let cmd = self.expanded(&rt.env);
        let session = rt.transport.connect(&rt.host).await?;
        let status = session
            .run(&rt.cancel, &cmd, rt.log_out.clone(), rt.log_err.clone())
            .await?;
        if status != 0 {
            return Err(HadesError::transport(format!(
                "command exited with status {status}"
            )));
        }
        Ok(Outcome::Done)
    }

    fn describe(&self, env: &HashMap<String, String>) -> String {
        format!("run: {}", self.expanded(env).trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::mock::{MockClient, MockResponse};
    use crate::testutil::RuntimeBuilder;
    use std::sync::Arc;

    #[tokio::test]
    async fn zero_exit_succeeds_and_sends_expanded_command() {
        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock.clone())
            .env("TAG", "v1.2")
            .build();

        let action = RunAction::new("ln -sfn /app/releases/${TAG} /app/current".to_string());
        let outcome = action.execute(&rt).await.unwrap();
        assert_eq!(outcome, Outcome::Done);

        let commands = mock.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].1, "ln -sfn /app/releases/v1.2 /app/current");
    }

    #[tokio::test]
    async fn unknown_references_pass_through_to_the_remote() {
        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock.clone()).build();

        RunAction::new("echo ${REMOTE_VAR}".to_string())
            .execute(&rt)
            .await
            .unwrap();
        assert_eq!(mock.commands()[0].1, "echo ${REMOTE_VAR}");
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error() {
        let mock = Arc::new(MockClient::new());
        mock.rule("false", MockResponse::status(2));
        let rt = RuntimeBuilder::new(mock).build();

        let err = RunAction::new("false".to_string())
            .execute(&rt)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("status 2"));
    }

    #[test]
    fn describe_shows_the_command() {
        let action = RunAction::new("systemctl reload caddy\n".to_string());
        assert_eq!(
            action.describe(&HashMap::new()),
            "run: systemctl reload caddy"
        );
    }

    #[test]
    fn reserved_variables_reach_commands() {
        let mock = Arc::new(MockClient::new());
        let rt = RuntimeBuilder::new(mock).build();
        let action = RunAction::new("echo ${HADES_RUN_ID} on ${HADES_HOST_NAME}".to_string());
        let described = action.describe(&rt.env);
        assert_eq!(described, "run: echo hades-test on app-1");
    }
}
