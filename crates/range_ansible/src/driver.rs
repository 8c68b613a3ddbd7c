//! Configuration driver: runs host jobs on a bounded pool of workers.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use range_runner::Interrupt;
use range_spec::{host_resource, ConfigAction, ConfigPhase, EnvironmentRecord, HostJob, JobStatus};

use crate::error::{ConfigResult, ConfigurationError, HostFailure};
use crate::reset::HostReset;
use crate::runner::{ActionOutcome, ConfigRunner, RunContext};

/// Hosts handled by a successful `configure`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureReport {
    pub configured: Vec<String>,
    /// Already configured for the phase.
    pub skipped: Vec<String>,
}

enum HostOutcome {
    Configured,
    Failed(HostFailure),
    NotStarted,
}

/// Dispatches host jobs to a [`ConfigRunner`], at most `workers` at a time.
pub struct ConfigurationDriver {
    runner: Arc<dyn ConfigRunner>,
    workers: usize,
    timeout: Duration,
    jump_host: Option<String>,
    interrupt: Interrupt,
    retry_attempts: usize,
    reset: Option<Arc<dyn HostReset>>,
}

struct PendingJob {
    host: String,
    address: String,
    actions: Vec<ConfigAction>,
    attempts: usize,
}

impl ConfigurationDriver {
    pub fn new(runner: Arc<dyn ConfigRunner>) -> Self {
        Self {
            runner,
            workers: 4,
            timeout: Duration::from_secs(1800),
            jump_host: None,
            interrupt: Interrupt::new(),
            retry_attempts: 1,
            reset: None,
        }
    }

    /// Maximum number of hosts configured concurrently.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Budget for each host's run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_jump_host(mut self, jump_host: Option<String>) -> Self {
        self.jump_host = jump_host;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Attempts for jobs with a retryable action; other jobs run once.
    pub fn with_retry_attempts(mut self, attempts: usize) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Reset a host between attempts of a retried job.
    pub fn with_host_reset(mut self, reset: Arc<dyn HostReset>) -> Self {
        self.reset = Some(reset);
        self
    }

    /// Run `phase` for every job not yet configured for it.
    ///
    /// A host's failure never stops the others; all failures are returned
    /// together once every dispatched job has finished.
    pub async fn configure(
        &self,
        jobs: &[HostJob],
        phase: ConfigPhase,
        record: &mut EnvironmentRecord,
    ) -> ConfigResult<ConfigureReport> {
        let mut report = ConfigureReport::default();
        let mut failures = Vec::new();
        let mut pending: Vec<PendingJob> = Vec::new();

        for job in jobs {
            if record.job_status(&job.host, phase) == JobStatus::Configured {
                debug!("{} already configured for {}", job.host, phase);
                report.skipped.push(job.host.clone());
                continue;
            }

            let actions = job.actions(phase);
            if actions.is_empty() {
                record.set_job_status(&job.host, phase, JobStatus::Configured);
                report.configured.push(job.host.clone());
                continue;
            }

            match resolve_address(job, record) {
                Some(address) => {
                    record.set_job_status(&job.host, phase, JobStatus::Configuring);
                    pending.push(PendingJob {
                        host: job.host.clone(),
                        address,
                        actions: actions.to_vec(),
                        attempts: if job.is_retryable(phase) { self.retry_attempts } else { 1 },
                    });
                }
                None => {
                    error!("No address known for {}", job.host);
                    record.set_job_status(&job.host, phase, JobStatus::Failed);
                    failures.push(HostFailure {
                        host: job.host.clone(),
                        action: None,
                        detail: "no address recorded for host".to_string(),
                        timed_out: false,
                    });
                }
            }
        }

        info!(
            "Configuring {} host(s) for {} with {} worker(s)",
            pending.len(),
            phase,
            self.workers
        );

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let handles: Vec<_> = pending
            .iter()
            .map(|job| {
                let semaphore = semaphore.clone();
                let runner = self.runner.clone();
                let reset = self.reset.clone();
                let interrupt = self.interrupt.clone();
                let timeout = self.timeout;
                let address = job.address.clone();
                let actions = job.actions.clone();
                let attempts = job.attempts;
                let context = RunContext::new(job.host.clone())
                    .with_jump_host(self.jump_host.clone())
                    .with_timeout(timeout.as_secs());

                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return HostOutcome::NotStarted;
                    };
                    let mut attempt = 1;
                    loop {
                        if interrupt.is_triggered() {
                            return HostOutcome::NotStarted;
                        }
                        match run_host(runner.clone(), &address, &actions, &context, timeout).await {
                            HostOutcome::Failed(failure) if attempt < attempts => {
                                warn!(
                                    "{} failed attempt {}/{}: {}",
                                    context.host, attempt, attempts, failure.detail
                                );
                                if let Some(reset) = &reset {
                                    if let Err(e) = reset.reset(&context.host).await {
                                        warn!("{}", e);
                                    }
                                }
                                attempt += 1;
                            }
                            outcome => return outcome,
                        }
                    }
                })
            })
            .collect();

        let mut interrupted = false;
        for (PendingJob { host, .. }, joined) in pending.iter().zip(join_all(handles).await) {
            let outcome = joined.unwrap_or_else(|e| {
                HostOutcome::Failed(HostFailure {
                    host: host.clone(),
                    action: None,
                    detail: format!("worker panicked: {}", e),
                    timed_out: false,
                })
            });
            match outcome {
                HostOutcome::Configured => {
                    record.set_job_status(host, phase, JobStatus::Configured);
                    report.configured.push(host.clone());
                }
                HostOutcome::Failed(failure) => {
                    record.set_job_status(host, phase, JobStatus::Failed);
                    failures.push(failure);
                }
                HostOutcome::NotStarted => {
                    record.set_job_status(host, phase, JobStatus::Pending);
                    interrupted = true;
                }
            }
        }

        if !failures.is_empty() {
            for failure in &failures {
                error!("{} failed {}: {}", failure.host, phase, failure.detail);
            }
            return Err(ConfigurationError::HostsFailed { phase, failures });
        }
        if interrupted {
            warn!("Interrupted during {} configuration", phase);
            return Err(ConfigurationError::Interrupted);
        }

        info!("{} configured on {} host(s)", phase, report.configured.len());
        Ok(report)
    }
}

/// Fixed address if declared, otherwise what the substrate reported.
fn resolve_address(job: &HostJob, record: &EnvironmentRecord) -> Option<String> {
    job.fixed_ip
        .map(|ip| ip.to_string())
        .or_else(|| record.address(&host_resource(&job.host)).map(str::to_string))
}

async fn run_host(
    runner: Arc<dyn ConfigRunner>,
    address: &str,
    actions: &[ConfigAction],
    context: &RunContext,
    timeout: Duration,
) -> HostOutcome {
    let host = context.host.clone();
    let failure = |action: Option<String>, detail: String, timed_out: bool| {
        HostOutcome::Failed(HostFailure {
            host: host.clone(),
            action,
            detail,
            timed_out,
        })
    };

    match tokio::time::timeout(timeout, runner.run(address, actions, context)).await {
        Err(_) => failure(None, format!("timed out after {}s", timeout.as_secs()), true),
        Ok(Err(e)) => failure(None, e.to_string(), false),
        Ok(Ok(outcomes)) => match outcomes.iter().find(|o| !o.success) {
            Some(ActionOutcome {
                action,
                detail,
                timed_out,
                ..
            }) => failure(
                Some(action.clone()),
                detail.clone().unwrap_or_else(|| "action failed".to_string()),
                *timed_out,
            ),
            None if outcomes.len() < actions.len() => failure(
                None,
                format!("runner reported {} of {} actions", outcomes.len(), actions.len()),
                false,
            ),
            None => HostOutcome::Configured,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockConfigRunner, MockHostReset};
    use range_spec::{EnvironmentType, Host, HostRole, Scale, Tier};

    fn jobs() -> Vec<HostJob> {
        let topology = EnvironmentType::Star.topology(&Scale::default()).unwrap();
        topology.hosts.iter().map(HostJob::for_host).collect()
    }

    fn record_with_addresses(jobs: &[HostJob]) -> EnvironmentRecord {
        let mut record = EnvironmentRecord::new(EnvironmentType::Star);
        for (i, job) in jobs.iter().enumerate() {
            record.record_created(
                host_resource(&job.host),
                Tier::Compute,
                format!("srv-{}", i),
                Some(format!("10.9.0.{}", i + 10)),
            );
        }
        record
    }

    #[tokio::test]
    async fn test_configure_marks_hosts() {
        let jobs = jobs();
        let mut record = record_with_addresses(&jobs);
        let runner = Arc::new(MockConfigRunner::new());
        let driver = ConfigurationDriver::new(runner.clone());

        let report = driver.configure(&jobs, ConfigPhase::Base, &mut record).await.unwrap();
        assert_eq!(report.configured.len(), jobs.len());
        for job in &jobs {
            assert_eq!(record.job_status(&job.host, ConfigPhase::Base), JobStatus::Configured);
        }

        // a second run has nothing left to do
        runner.clear_calls();
        let again = driver.configure(&jobs, ConfigPhase::Base, &mut record).await.unwrap();
        assert_eq!(again.skipped.len(), jobs.len());
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_jobs_without_actions_skip_the_runner() {
        let jobs = jobs();
        let mut record = record_with_addresses(&jobs);
        let runner = Arc::new(MockConfigRunner::new());
        let driver = ConfigurationDriver::new(runner.clone());

        driver.configure(&jobs, ConfigPhase::Data, &mut record).await.unwrap();

        let with_data = jobs.iter().filter(|j| !j.actions(ConfigPhase::Data).is_empty()).count();
        assert_eq!(runner.call_count(), with_data);
        assert_eq!(
            record.job_status("manage_host", ConfigPhase::Data),
            JobStatus::Configured
        );
    }

    #[tokio::test]
    async fn test_fixed_ip_wins_over_recorded_address() {
        let host = Host::new("db", HostRole::Database, "lan", "Ubuntu20", "m1.small")
            .fixed_ip("10.0.2.10".parse().unwrap());
        let jobs = vec![HostJob::for_host(&host)];
        let mut record = EnvironmentRecord::new(EnvironmentType::Star);
        record.record_created("host:db", Tier::Compute, "srv", Some("10.0.2.99".to_string()));

        let runner = Arc::new(MockConfigRunner::new());
        ConfigurationDriver::new(runner.clone())
            .configure(&jobs, ConfigPhase::Base, &mut record)
            .await
            .unwrap();
        assert_eq!(runner.calls()[0].address, "10.0.2.10");
    }

    #[tokio::test]
    async fn test_missing_address_fails_only_that_host() {
        let jobs = jobs();
        let mut record = record_with_addresses(&jobs);
        record.remove("host:database_1");

        let runner = Arc::new(MockConfigRunner::new());
        let err = ConfigurationDriver::new(runner.clone())
            .configure(&jobs, ConfigPhase::Base, &mut record)
            .await
            .unwrap_err();

        match err {
            ConfigurationError::HostsFailed { failures, .. } => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].host, "database_1");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(runner.call_count(), jobs.len() - 1);
    }

    #[tokio::test]
    async fn test_interrupt_leaves_jobs_pending() {
        let jobs = jobs();
        let mut record = record_with_addresses(&jobs);
        let interrupt = Interrupt::new();
        interrupt.trigger();

        let runner = Arc::new(MockConfigRunner::new());
        let err = ConfigurationDriver::new(runner.clone())
            .with_interrupt(interrupt)
            .configure(&jobs, ConfigPhase::Base, &mut record)
            .await
            .unwrap_err();

        assert!(matches!(err, ConfigurationError::Interrupted));
        assert_eq!(runner.call_count(), 0);
        assert_eq!(
            record.job_status("webserver_1", ConfigPhase::Base),
            JobStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_attacker_install_is_retried_after_reset() {
        let jobs = jobs();
        let mut record = record_with_addresses(&jobs);
        let runner = Arc::new(MockConfigRunner::new().fail_host_times("attacker_host", 2));
        let reset = Arc::new(MockHostReset::new());

        ConfigurationDriver::new(runner.clone())
            .with_retry_attempts(3)
            .with_host_reset(reset.clone())
            .configure(&jobs, ConfigPhase::Base, &mut record)
            .await
            .unwrap();

        let attacker_runs = runner.calls().iter().filter(|c| c.host == "attacker_host").count();
        assert_eq!(attacker_runs, 3);
        assert_eq!(reset.resets(), vec!["attacker_host", "attacker_host"]);
        assert_eq!(
            record.job_status("attacker_host", ConfigPhase::Base),
            JobStatus::Configured
        );
    }

    #[tokio::test]
    async fn test_retries_are_bounded_and_only_for_retryable_jobs() {
        let jobs = jobs();
        let mut record = record_with_addresses(&jobs);
        let runner = Arc::new(
            MockConfigRunner::new()
                .fail_host_times("attacker_host", 5)
                .fail_host_times("webserver_1", 1),
        );
        let reset = Arc::new(MockHostReset::failing());

        let err = ConfigurationDriver::new(runner.clone())
            .with_retry_attempts(3)
            .with_host_reset(reset.clone())
            .configure(&jobs, ConfigPhase::Base, &mut record)
            .await
            .unwrap_err();

        match err {
            ConfigurationError::HostsFailed { failures, .. } => {
                let mut hosts: Vec<_> = failures.iter().map(|f| f.host.as_str()).collect();
                hosts.sort();
                assert_eq!(hosts, vec!["attacker_host", "webserver_1"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let runs = |host: &str| runner.calls().iter().filter(|c| c.host == host).count();
        assert_eq!(runs("attacker_host"), 3);
        assert_eq!(runs("webserver_1"), 1);
        // a failed reset does not stop the remaining attempts
        assert_eq!(reset.resets().len(), 2);
    }
}
