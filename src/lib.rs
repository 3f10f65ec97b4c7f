pub mod artifacts;
pub mod config;
pub mod daemon;
pub mod error;
/// msv - background verifier for a MongoDB replica set member
///
/// The process detaches from its terminal, reads the member's address from
/// the endpoint file, and polls it until a connection succeeds. On success it
/// writes a token file that external monitors watch for.
pub mod health;
pub mod utils;

use tokio::sync::watch;

use crate::artifacts::RunLog;
use crate::config::{load_endpoint, ConfigIssue, Endpoint, Settings};
use crate::error::VerifierResult;
use crate::health::retry::{RetryLoop, RetryPolicy};
use crate::health::Connector;

/// Summary of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub endpoint: Endpoint,
    pub attempts: u32,
}

/// The worker side of the verifier: endpoint, retry loop, publication
pub struct Verifier {
    settings: Settings,
}

impl Verifier {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Load the endpoint, reporting recovered conditions to the run log
    pub fn load_endpoint(&self, run_log: &mut RunLog) -> Endpoint {
        let (endpoint, report) = load_endpoint(&self.settings.artifacts.config_file);
        for issue in &report.issues {
            match issue {
                ConfigIssue::Unavailable { .. } => run_log.line(issue),
                _ => run_log.line(format_args!(
                    "{}: {}",
                    self.settings.artifacts.config_file.display(),
                    issue
                )),
            }
            log::warn!("Endpoint file: {}", issue);
        }
        log::info!("Monitoring replica member {}", endpoint);
        endpoint
    }

    /// Run until the endpoint is reachable and the token is published
    ///
    /// The run log is consumed; it is closed on every path.
    pub async fn run<K: Connector + ?Sized>(
        &self,
        connector: &K,
        mut run_log: RunLog,
        shutdown: watch::Receiver<bool>,
    ) -> VerifierResult<RunSummary> {
        let endpoint = self.load_endpoint(&mut run_log);
        let policy = RetryPolicy::from(&self.settings.retry);

        let confirmed = match RetryLoop::new(connector, &endpoint, policy, shutdown)
            .run(&mut run_log)
            .await
        {
            Ok(confirmed) => confirmed,
            Err(e) => {
                run_log.close();
                return Err(e.into());
            }
        };

        let attempts = confirmed.attempts;
        artifacts::publish(connector, confirmed, &self.settings.artifacts, run_log).await?;

        Ok(RunSummary { endpoint, attempts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::token_is_set;
    use crate::error::{RetryError, VerifierError};
    use crate::health::testing::ScriptedConnector;
    use crate::health::ProbeOutcome;
    use std::fs;
    use std::path::Path;

    fn settings_in(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.artifacts.config_file = dir.join("msv.conf");
        settings.artifacts.pid_file = dir.join("msv.pid");
        settings.artifacts.log_file = dir.join("msv.log");
        settings.artifacts.token_file = dir.join("token.msv");
        settings.retry.interval_sec = 1;
        settings
    }

    #[tokio::test]
    async fn test_run_publishes_token_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        fs::write(&settings.artifacts.config_file, "address=10.0.0.7\nport=27018\n").unwrap();
        let run_log = RunLog::open(&settings.artifacts.log_file).unwrap();
        let (_tx, rx) = watch::channel(false);

        let connector = ScriptedConnector::new([ProbeOutcome::Success]);
        let verifier = Verifier::new(settings.clone());

        let summary = verifier.run(&connector, run_log, rx).await.unwrap();
        assert_eq!(summary.endpoint.to_string(), "10.0.0.7:27018");
        assert_eq!(summary.attempts, 1);
        assert!(token_is_set(&settings.artifacts.token_file));
        assert_eq!(
            fs::read_to_string(&settings.artifacts.log_file).unwrap(),
            "0\nconnection OK!.\nSetting token.\nending...\n"
        );
    }

    #[tokio::test]
    async fn test_two_failures_then_token() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let run_log = RunLog::open(&settings.artifacts.log_file).unwrap();
        let (_tx, rx) = watch::channel(false);

        let connector = ScriptedConnector::new([
            ProbeOutcome::ConnectFailed,
            ProbeOutcome::ConnectFailed,
            ProbeOutcome::Success,
        ]);
        let verifier = Verifier::new(settings.clone());

        let summary = verifier.run(&connector, run_log, rx).await.unwrap();
        assert_eq!(summary.attempts, 3);

        let content = fs::read_to_string(&settings.artifacts.log_file).unwrap();
        let token_line = content.lines().position(|l| l == "Setting token.").unwrap();
        let retries: Vec<usize> = content
            .lines()
            .enumerate()
            .filter(|(_, l)| l.starts_with("Checking the connection..."))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(retries.len(), 2);
        assert!(retries.iter().all(|i| *i < token_line));
        // Missing endpoint file is recorded first, as a recovered condition.
        assert!(content.lines().next().unwrap().contains("msv.conf: no such file..."));
    }

    #[tokio::test]
    async fn test_no_token_without_success() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings_in(dir.path());
        settings.retry.max_attempts = Some(1);
        let (_tx, rx) = watch::channel(false);

        let connector = ScriptedConnector::always(ProbeOutcome::ConnectedButNotPrimary);
        let verifier = Verifier::new(settings.clone());

        let err = verifier
            .run(&connector, RunLog::disabled(), rx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerifierError::Retry(RetryError::Exhausted { attempts: 1 })
        ));
        assert!(!settings.artifacts.token_file.exists());
        assert_eq!(connector.released(), 0);
    }

    #[tokio::test]
    async fn test_run_without_log_file_still_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path());
        let (_tx, rx) = watch::channel(false);

        let connector = ScriptedConnector::new([ProbeOutcome::NoSocket, ProbeOutcome::Success]);
        let verifier = Verifier::new(settings.clone());

        verifier
            .run(&connector, RunLog::disabled(), rx)
            .await
            .unwrap();
        assert!(token_is_set(&settings.artifacts.token_file));
        assert!(!settings.artifacts.log_file.exists());
    }
}
