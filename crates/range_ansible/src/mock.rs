//! Recording configuration runner for tests.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use range_spec::ConfigAction;

use crate::error::{ConfigResult, ConfigurationError};
use crate::reset::HostReset;
use crate::runner::{ActionOutcome, ConfigRunner, RunContext};

/// One recorded runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCall {
    pub host: String,
    pub address: String,
    pub actions: Vec<String>,
    pub jump_host: Option<String>,
}

/// Runner double that records calls and the peak number of concurrent runs.
#[derive(Clone, Default)]
pub struct MockConfigRunner {
    delay: Duration,
    failing_hosts: Arc<RwLock<BTreeSet<String>>>,
    failing_actions: Arc<RwLock<BTreeSet<String>>>,
    flaky_hosts: Arc<RwLock<BTreeMap<String, usize>>>,
    calls: Arc<RwLock<Vec<ConfigCall>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockConfigRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold each run for `delay` so overlapping runs are observable.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Fail the first action run on `host`.
    pub fn fail_host(self, host: impl Into<String>) -> Self {
        self.failing_hosts.write().insert(host.into());
        self
    }

    /// Fail the named action on every host.
    pub fn fail_action(self, action: impl Into<String>) -> Self {
        self.failing_actions.write().insert(action.into());
        self
    }

    /// Fail the first `runs` runs on `host`, then succeed.
    pub fn fail_host_times(self, host: impl Into<String>, runs: usize) -> Self {
        self.flaky_hosts.write().insert(host.into(), runs);
        self
    }

    pub fn heal_host(&self, host: &str) {
        self.failing_hosts.write().remove(host);
    }

    pub fn calls(&self) -> Vec<ConfigCall> {
        self.calls.read().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().len()
    }

    pub fn clear_calls(&self) {
        self.calls.write().clear();
    }

    /// Highest number of runs that were in flight at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigRunner for MockConfigRunner {
    async fn run(&self, address: &str, actions: &[ConfigAction], context: &RunContext) -> ConfigResult<Vec<ActionOutcome>> {
        let depth = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(depth, Ordering::SeqCst);

        self.calls.write().push(ConfigCall {
            host: context.host.clone(),
            address: address.to_string(),
            actions: actions.iter().map(|a| a.name().to_string()).collect(),
            jump_host: context.jump_host.clone(),
        });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let flaky = match self.flaky_hosts.write().get_mut(&context.host) {
            Some(left) if *left > 0 => {
                *left -= 1;
                true
            }
            _ => false,
        };
        let host_fails = flaky || self.failing_hosts.read().contains(&context.host);
        let mut outcomes = Vec::new();
        for (i, action) in actions.iter().enumerate() {
            if (host_fails && i == 0) || self.failing_actions.read().contains(action.name()) {
                outcomes.push(ActionOutcome::failed(action.name(), "simulated failure"));
                break;
            }
            outcomes.push(ActionOutcome::succeeded(action.name()));
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(outcomes)
    }
}

/// Reset double that records every host it was asked to reset.
#[derive(Clone, Default)]
pub struct MockHostReset {
    fail: bool,
    resets: Arc<RwLock<Vec<String>>>,
}

impl MockHostReset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report every reset as failed.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn resets(&self) -> Vec<String> {
        self.resets.read().clone()
    }
}

#[async_trait]
impl HostReset for MockHostReset {
    async fn reset(&self, host: &str) -> ConfigResult<()> {
        self.resets.write().push(host.to_string());
        if self.fail {
            return Err(ConfigurationError::Reset {
                host: host.to_string(),
                detail: "simulated reset failure".to_string(),
            });
        }
        Ok(())
    }
}
