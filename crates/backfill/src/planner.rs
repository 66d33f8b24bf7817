//! How many servers to create in one cycle.

use tracing::{info, warn};

use crate::capacity::{CapacityOracle, CapacitySnapshot};
use crate::config::{BackfillConfig, ServerParams};
use crate::providers::{ProviderError, ServerTier};

/// How the instance count of a cycle is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanMode {
    /// Create exactly this many servers regardless of free capacity.
    Fixed(u32),
    /// Create as many servers as current backfill capacity allows.
    Auto,
    /// Create one server.
    Single,
}

impl PlanMode {
    /// Mode implied by a configuration: an explicit count wins, otherwise
    /// backfill servers are auto-sized and standard servers created one at a time.
    #[must_use]
    pub fn for_config(config: &BackfillConfig) -> Self {
        match (config.servers, config.server.tier) {
            (Some(count), _) => Self::Fixed(count),
            (None, ServerTier::Backfill) => Self::Auto,
            (None, ServerTier::Standard) => Self::Single,
        }
    }
}

/// Resources one server needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Demand {
    /// GPUs per server.
    pub gpus_per_instance: u64,
    /// CPU per server in MHz.
    pub cpu_per_instance: u64,
    /// Memory per server in bytes.
    pub mem_per_instance: u64,
}

impl From<&ServerParams> for Demand {
    fn from(params: &ServerParams) -> Self {
        Self {
            gpus_per_instance: u64::from(params.gpus),
            cpu_per_instance: params.cpu_mhz,
            mem_per_instance: params.mem_bytes,
        }
    }
}

/// Outcome of planning a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Plan {
    /// Servers to create.
    pub instances: u32,
    /// Per-host GPU cap, when capacity was consulted.
    pub max_per_host: Option<u64>,
}

/// Largest server count that fits the snapshot on every axis.
///
/// A zero demand on an axis leaves that axis unconstrained.
#[must_use]
pub fn instances_for(snapshot: &CapacitySnapshot, demand: &Demand) -> u32 {
    let fit = |available: u64, per_instance: u64| available.checked_div(per_instance);

    let by_cpu = fit(snapshot.most_free_cpu, demand.cpu_per_instance);
    let by_mem = fit(snapshot.most_free_mem, demand.mem_per_instance);
    let by_gpu = fit(snapshot.total_gpus, demand.gpus_per_instance);

    [by_cpu, by_mem, by_gpu]
        .into_iter()
        .flatten()
        .min()
        .map_or(0, |count| u32::try_from(count).unwrap_or(u32::MAX))
}

/// Plans the number of servers to create.
pub struct ProvisioningPlanner<'a> {
    oracle: &'a CapacityOracle<'a>,
}

impl<'a> ProvisioningPlanner<'a> {
    /// Create a planner that reads capacity through `oracle`.
    #[must_use]
    pub fn new(oracle: &'a CapacityOracle<'a>) -> Self {
        Self { oracle }
    }

    /// Plan the next cycle.
    ///
    /// Auto and single modes block until backfill capacity for the GPU model
    /// exists. Fixed mode reads capacity once, and only when GPUs are to be
    /// clamped to the per-host cap.
    ///
    /// # Errors
    /// Returns error if capacity cannot be read.
    pub async fn plan(&self, mode: PlanMode, params: &ServerParams) -> Result<Plan, ProviderError> {
        match mode {
            PlanMode::Fixed(instances) => {
                let max_per_host = if params.auto_adjust_max_gpus {
                    self.per_host_cap(params).await?
                } else {
                    None
                };
                Ok(Plan {
                    instances,
                    max_per_host,
                })
            }
            PlanMode::Auto => {
                let snapshot = self.oracle.fetch(&params.gpu_model, &params.cpu_type).await?;
                let instances = instances_for(&snapshot, &Demand::from(params));
                info!(instances, "Maximum creatable servers");
                Ok(Plan {
                    instances,
                    max_per_host: Some(snapshot.max_per_host),
                })
            }
            PlanMode::Single => {
                let snapshot = self.oracle.fetch(&params.gpu_model, &params.cpu_type).await?;
                Ok(Plan {
                    instances: 1,
                    max_per_host: Some(snapshot.max_per_host),
                })
            }
        }
    }

    /// Per-host GPU cap from a single capacity query, without waiting for
    /// backfill GPUs to free up.
    async fn per_host_cap(&self, params: &ServerParams) -> Result<Option<u64>, ProviderError> {
        let snapshot = self.oracle.probe(&params.gpu_model, &params.cpu_type).await?;
        if snapshot.is_none() {
            warn!(
                gpu_model = %params.gpu_model,
                "No per-host GPU cap available, auto_adjust_max_gpus has no effect this cycle"
            );
        }
        Ok(snapshot.map(|s| s.max_per_host))
    }
}
