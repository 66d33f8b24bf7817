//! Provisioning cycles.
//!
//! One cycle plans an instance count, then for each instance runs a
//! stopped-only cleanup, builds the server definition, creates and starts the
//! server. Instances are processed one after another; a failure on one is
//! logged and the cycle moves on to the next.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::capacity::CapacityOracle;
use crate::cleanup::{CleanupReconciler, CleanupReport, CleanupScope};
use crate::config::BackfillConfig;
use crate::lifecycle::{LaunchOutcome, ResourceLifecycleManager};
use crate::planner::{PlanMode, ProvisioningPlanner};
use crate::providers::{ProviderError, ResourceClient};
use crate::wait::WaitPolicy;

/// Outcome of one provisioning cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Servers the planner asked for.
    pub planned: u32,
    /// Servers that were created, started or not.
    pub launches: Vec<LaunchOutcome>,
    /// Errors that prevented a server from being created.
    pub failures: Vec<String>,
}

impl CycleReport {
    /// Number of servers observed running.
    #[must_use]
    pub fn started(&self) -> usize {
        self.launches.iter().filter(|l| l.started).count()
    }
}

/// Runs provisioning cycles against one provider account.
pub struct Controller {
    client: Arc<dyn ResourceClient>,
    policy: WaitPolicy,
}

impl Controller {
    /// Create a controller with the default wait policy.
    #[must_use]
    pub fn new(client: Arc<dyn ResourceClient>) -> Self {
        Self {
            client,
            policy: WaitPolicy::default(),
        }
    }

    /// Override the wait policy used for every status poll.
    #[must_use]
    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run one provisioning cycle.
    ///
    /// # Errors
    /// Returns error if the cycle cannot be planned.
    pub async fn run_cycle(&self, config: &BackfillConfig) -> Result<CycleReport, ProviderError> {
        let client = self.client.as_ref();
        let oracle = CapacityOracle::new(client).with_retry_interval(config.capacity_retry);
        let planner = ProvisioningPlanner::new(&oracle);

        let mode = PlanMode::for_config(config);
        let plan = planner.plan(mode, &config.server).await?;
        info!(?mode, instances = plan.instances, "Planned cycle");

        let cleanup = CleanupReconciler::new(client).with_policy(self.policy);
        let lifecycle = ResourceLifecycleManager::new(client).with_policy(self.policy);

        let mut report = CycleReport {
            planned: plan.instances,
            ..CycleReport::default()
        };

        for index in 0..plan.instances {
            let launch = async {
                cleanup.cleanup(CleanupScope::StoppedOnly).await?;
                let spec = lifecycle
                    .build_spec(&config.server, plan.max_per_host)
                    .await?;
                lifecycle.create_and_start(&spec, config.server.tier).await
            };

            match launch.await {
                Ok(outcome) => report.launches.push(outcome),
                Err(e) => {
                    warn!(instance = index + 1, error = %e, "Failed to launch server");
                    report.failures.push(e.to_string());
                }
            }
        }

        info!(
            planned = report.planned,
            started = report.started(),
            failed = report.failures.len(),
            "Cycle finished"
        );
        Ok(report)
    }

    /// Stop and delete every managed server and drive.
    ///
    /// # Errors
    /// Returns error if servers or drives cannot be listed.
    pub async fn cleanup_all(&self) -> Result<CleanupReport, ProviderError> {
        CleanupReconciler::new(self.client.as_ref())
            .with_policy(self.policy)
            .cleanup(CleanupScope::All)
            .await
    }

    /// Run one continuous-mode iteration and return the pause before the next.
    ///
    /// The configuration is re-read from `path`. If that fails the previous
    /// configuration in `current` is reused.
    pub async fn iterate(&self, path: &Path, current: &mut BackfillConfig) -> Duration {
        match BackfillConfig::load(path) {
            Ok(config) => *current = config,
            Err(e) => warn!(
                path = %path.display(),
                error = %e,
                "Failed to reload config, keeping previous settings"
            ),
        }

        if let Err(e) = self.run_cycle(current).await {
            error!(error = %e, "Cycle failed");
        }

        current.iteration_pause
    }

    /// Run cycles forever, reloading configuration from `path` each time.
    pub async fn watch(&self, path: &Path, initial: BackfillConfig) {
        let mut current = initial;
        loop {
            let pause = self.iterate(path, &mut current).await;
            info!(pause_secs = pause.as_secs(), "Sleeping until next cycle");
            tokio::time::sleep(pause).await;
        }
    }
}
