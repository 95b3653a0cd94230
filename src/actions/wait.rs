//! Timed pause between actions.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::{log_line, Action, Outcome};
use crate::error::{HadesError, Result};
use crate::runtime::Runtime;
use crate::schema::WaitSpec;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WaitAction {
    spec: WaitSpec,
}

impl WaitAction {
    pub fn from_spec(spec: WaitSpec) -> Self {
        WaitAction { spec }
    }

    fn timeout(&self) -> Result<Duration> {
        match &self.spec.timeout {
            None => Ok(DEFAULT_TIMEOUT),
            Some(text) => humantime::parse_duration(text)
                .map_err(|err| HadesError::config(format!("invalid wait timeout {text:?}: {err}"))),
        }
    }

    fn message(&self) -> &str {
        self.spec.message.as_deref().unwrap_or("waiting")
    }
}

#[async_trait]
impl Action for WaitAction {
    async fn execute(&self, rt: &Runtime) -> Result<Outcome> {
        let timeout = self.timeout()?;
        log_line(
            &rt.log_out,
            &format!("{} ({})", self.message(), humantime::format_duration(timeout)),
        )?;

        tokio::select! {
            _ = rt.cancel.cancelled() => Err(HadesError::Cancelled),
            _ = tokio::time::sleep(timeout) => Ok(Outcome::Done),
        }
    }

    fn describe(&self, _env: &HashMap<String, String>) -> String {
        let timeout = self
            .timeout()
            .map(|d| humantime::format_duration(d).to_string())
            .unwrap_or_else(|_| "?".to_string());
        format!("wait: {} ({timeout})", self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::mock::MockClient;
    use crate::testutil::RuntimeBuilder;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn completes_after_the_timeout() {
        let rt = RuntimeBuilder::new(Arc::new(MockClient::new())).build();
        let spec: WaitSpec = serde_yaml::from_str("message: settle\ntimeout: 10ms\n").unwrap();
        let outcome = WaitAction::from_spec(spec).execute(&rt).await.unwrap();
        assert_eq!(outcome, Outcome::Done);
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_sleep() {
        let cancel = CancellationToken::new();
        let rt = RuntimeBuilder::new(Arc::new(MockClient::new()))
            .cancel(cancel.clone())
            .build();

        let spec: WaitSpec = serde_yaml::from_str("timeout: 60s\n").unwrap();
        let action = WaitAction::from_spec(spec);

        let handle = tokio::spawn(async move { action.execute(&rt).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, HadesError::Cancelled));
    }

    #[test]
    fn timeout_defaults_to_ten_seconds() {
        let action = WaitAction::from_spec(WaitSpec::default());
        assert_eq!(action.timeout().unwrap(), Duration::from_secs(10));
    }
}
