/// Retry loop driving repeated probes until the endpoint is reachable
///
/// States: `Probing -> {Success, Retrying}`; `Retrying` sleeps and returns to
/// `Probing`. With the default policy this is an unbounded fixed-interval
/// poll. Backoff growth, jitter and an attempt budget are opt-in.

use super::{probe, Connector, ProbeOutcome};
use crate::artifacts::RunLog;
use crate::config::{Endpoint, RetryConfig};
use crate::error::RetryError;
use crate::utils::format_duration;
use rand::Rng;
use std::time::Duration;
use tokio::sync::watch;

/// Delay schedule and attempt budget for the retry loop
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub jitter: bool,
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Fixed interval, unbounded
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            multiplier: 1.0,
            max_interval: interval,
            jitter: false,
            max_attempts: None,
        }
    }

    /// Delay before the attempt following failure number `failures` (1-based)
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap = self.max_interval.max(self.interval);
        let scaled = self.interval.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::try_from_secs_f64(scaled.min(cap.as_secs_f64()))
            .map_or(cap, |delay| delay.min(cap));

        if self.jitter && !delay.is_zero() {
            let millis = delay.as_millis().min(u64::MAX as u128) as u64;
            Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
        } else {
            delay
        }
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            interval: config.interval(),
            multiplier: config.multiplier,
            max_interval: config.max_interval(),
            jitter: config.jitter,
            max_attempts: config.max_attempts,
        }
    }
}

/// The loop reached `Success`
#[derive(Debug)]
pub struct Confirmed<C> {
    pub connection: C,
    pub attempts: u32,
}

/// Runs probes against one endpoint until success, cancellation or exhaustion
pub struct RetryLoop<'a, K: Connector + ?Sized> {
    connector: &'a K,
    endpoint: &'a Endpoint,
    policy: RetryPolicy,
    shutdown: watch::Receiver<bool>,
}

impl<'a, K: Connector + ?Sized> RetryLoop<'a, K> {
    pub fn new(
        connector: &'a K,
        endpoint: &'a Endpoint,
        policy: RetryPolicy,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            policy,
            shutdown,
        }
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `delay`; returns false if shutdown interrupted the sleep
    async fn pause(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                changed = self.shutdown.changed() => {
                    match changed {
                        Ok(()) if *self.shutdown.borrow() => return false,
                        Ok(()) => continue,
                        // Sender gone: nobody can request shutdown any more.
                        Err(_) => {
                            sleep.as_mut().await;
                            return true;
                        }
                    }
                }
            }
        }
    }

    /// Probe until `Success`, logging each failure to `run_log`
    pub async fn run(mut self, run_log: &mut RunLog) -> Result<Confirmed<K::Connection>, RetryError> {
        let mut attempts: u32 = 0;

        loop {
            let probe = probe(self.connector, self.endpoint).await;
            attempts += 1;
            if attempts == 1 {
                run_log.line(probe.status);
            }

            if let (ProbeOutcome::Success, Some(connection)) = (probe.outcome, probe.connection) {
                log::info!("{} reachable after {} attempt(s)", self.endpoint, attempts);
                return Ok(Confirmed {
                    connection,
                    attempts,
                });
            }

            // Not-primary keeps polling like any other failure; the node may be promoted.
            run_log.line(probe.outcome);
            if let Some(error) = &probe.error {
                log::warn!(
                    "Attempt {} against {} failed (code {}): {}",
                    attempts,
                    self.endpoint,
                    probe.outcome.code(),
                    error
                );
            }
            run_log.line(format_args!(
                "Checking the connection... status( {} )",
                probe.status
            ));

            if self.policy.exhausted(attempts) {
                run_log.line(format_args!("giving up after {} attempts", attempts));
                return Err(RetryError::Exhausted { attempts });
            }

            if self.shutdown_requested() {
                run_log.line("shutdown requested");
                return Err(RetryError::Cancelled { attempts });
            }

            let delay = self.policy.delay_after(attempts);
            log::debug!("Retrying {} in {}", self.endpoint, format_duration(delay));
            if !self.pause(delay).await {
                run_log.line("shutdown requested");
                return Err(RetryError::Cancelled { attempts });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::testing::ScriptedConnector;
    use std::fs;
    use std::path::Path;
    use std::time::Instant;

    fn retry_lines(path: &Path) -> usize {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .filter(|line| line.starts_with("Checking the connection..."))
            .count()
    }

    #[test]
    fn test_fixed_policy_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(5));
        assert_eq!(policy.delay_after(50), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_policy_is_capped() {
        let policy = RetryPolicy {
            interval: Duration::from_secs(1),
            multiplier: 2.0,
            max_interval: Duration::from_secs(10),
            jitter: false,
            max_attempts: None,
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(4), Duration::from_secs(8));
        assert_eq!(policy.delay_after(5), Duration::from_secs(10));
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_huge_intervals_saturate() {
        let policy = RetryPolicy::fixed(Duration::from_secs(u64::MAX));
        assert_eq!(policy.delay_after(1), Duration::from_secs(u64::MAX));

        let policy = RetryPolicy {
            multiplier: f64::MAX,
            max_interval: Duration::from_secs(u64::MAX),
            ..RetryPolicy::fixed(Duration::from_secs(60))
        };
        assert_eq!(policy.delay_after(1), Duration::from_secs(60));
        assert_eq!(policy.delay_after(3), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_jitter_stays_within_delay() {
        let policy = RetryPolicy {
            jitter: true,
            ..RetryPolicy::fixed(Duration::from_millis(200))
        };
        for failures in 1..20 {
            assert!(policy.delay_after(failures) <= Duration::from_millis(200));
        }
    }

    #[test]
    fn test_policy_from_config() {
        let config = RetryConfig {
            interval_sec: 3,
            max_attempts: Some(7),
            ..Default::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.interval, Duration::from_secs(3));
        assert_eq!(policy.max_attempts, Some(7));
    }

    #[tokio::test]
    async fn test_terminates_on_first_success() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("msv.log");
        let mut run_log = RunLog::open(&log_path).unwrap();

        let connector = ScriptedConnector::new([
            ProbeOutcome::ConnectFailed,
            ProbeOutcome::ConnectFailed,
            ProbeOutcome::Success,
        ]);
        let endpoint = Endpoint::default();
        let (_tx, rx) = watch::channel(false);

        let confirmed = RetryLoop::new(
            &connector,
            &endpoint,
            RetryPolicy::fixed(Duration::from_millis(10)),
            rx,
        )
        .run(&mut run_log)
        .await
        .unwrap();

        assert_eq!(confirmed.attempts, 3);
        assert_eq!(confirmed.connection, 3);
        assert_eq!(connector.attempts(), 3);
        assert_eq!(retry_lines(&log_path), 2);
    }

    #[tokio::test]
    async fn test_failures_are_logged_with_distinct_classification() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("msv.log");
        let mut run_log = RunLog::open(&log_path).unwrap();

        let connector = ScriptedConnector::new([
            ProbeOutcome::NoSocket,
            ProbeOutcome::AddressResolutionFailed,
            ProbeOutcome::ConnectedButNotPrimary,
            ProbeOutcome::Success,
        ]);
        let endpoint = Endpoint::default();
        let (_tx, rx) = watch::channel(false);

        RetryLoop::new(
            &connector,
            &endpoint,
            RetryPolicy::fixed(Duration::from_millis(1)),
            rx,
        )
        .run(&mut run_log)
        .await
        .unwrap();

        let content = fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(
            lines,
            vec![
                "-1",
                "NO SOCKET",
                "Checking the connection... status( -1 )",
                "CON ADDR FAIL",
                "Checking the connection... status( -1 )",
                "CONN NOT MASTER",
                "Checking the connection... status( -1 )",
            ]
        );
    }

    #[tokio::test]
    async fn test_repeated_failure_keeps_interval() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("msv.log");
        let mut run_log = RunLog::open(&log_path).unwrap();

        let connector = ScriptedConnector::always(ProbeOutcome::ConnectFailed);
        let endpoint = Endpoint::default();
        let (_tx, rx) = watch::channel(false);
        let interval = Duration::from_millis(50);

        let started = Instant::now();
        let result = RetryLoop::new(
            &connector,
            &endpoint,
            RetryPolicy {
                max_attempts: Some(3),
                ..RetryPolicy::fixed(interval)
            },
            rx,
        )
        .run(&mut run_log)
        .await;
        let elapsed = started.elapsed();

        assert_eq!(result.unwrap_err(), RetryError::Exhausted { attempts: 3 });
        assert_eq!(retry_lines(&log_path), 3);
        // Two sleeps between three attempts.
        assert!(elapsed >= interval * 2, "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_never_succeeds_without_budget() {
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = RunLog::open(&dir.path().join("msv.log")).unwrap();

        let connector = ScriptedConnector::always(ProbeOutcome::ConnectFailed);
        let endpoint = Endpoint::default();
        let (_tx, rx) = watch::channel(false);

        let run = RetryLoop::new(
            &connector,
            &endpoint,
            RetryPolicy::fixed(Duration::from_millis(5)),
            rx,
        )
        .run(&mut run_log);

        let timed_out = tokio::time::timeout(Duration::from_millis(200), run).await;
        assert!(timed_out.is_err());
        assert!(connector.attempts() >= 3);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("msv.log");
        let mut run_log = RunLog::open(&log_path).unwrap();

        let connector = ScriptedConnector::always(ProbeOutcome::ConnectFailed);
        let endpoint = Endpoint::default();
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let _ = tx.send(true);
        });

        let started = Instant::now();
        let result = RetryLoop::new(
            &connector,
            &endpoint,
            RetryPolicy::fixed(Duration::from_secs(30)),
            rx,
        )
        .run(&mut run_log)
        .await;

        assert_eq!(result.unwrap_err(), RetryError::Cancelled { attempts: 1 });
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(fs::read_to_string(&log_path)
            .unwrap()
            .ends_with("shutdown requested\n"));
    }

    #[tokio::test]
    async fn test_shutdown_checked_before_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let mut run_log = RunLog::open(&dir.path().join("msv.log")).unwrap();

        let connector = ScriptedConnector::always(ProbeOutcome::ConnectFailed);
        let endpoint = Endpoint::default();
        let (_tx, rx) = watch::channel(true);

        let result = RetryLoop::new(&connector, &endpoint, RetryPolicy::default(), rx)
            .run(&mut run_log)
            .await;

        assert_eq!(result.unwrap_err(), RetryError::Cancelled { attempts: 1 });
        assert_eq!(connector.attempts(), 1);
    }
}
