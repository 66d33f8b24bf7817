//! Backfill capacity snapshots.
//!
//! A snapshot is read fresh from the provider's capability map on every
//! planning cycle and never cached.

use std::time::Duration;

use tracing::{debug, info};

use crate::providers::{Capabilities, ProviderError, ResourceClient};

/// Default pause before re-querying when no backfill GPUs are available.
pub const DEFAULT_CAPACITY_RETRY: Duration = Duration::from_secs(300);

/// Point-in-time view of backfill GPU inventory and host free resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacitySnapshot {
    /// GPUs of the requested model available to backfill servers.
    pub total_gpus: u64,
    /// Most GPUs of the model a single host can give one server.
    pub max_per_host: u64,
    /// Free CPU (MHz) across hosts of the CPU class.
    pub most_free_cpu: u64,
    /// Free memory (bytes) across hosts of the CPU class.
    pub most_free_mem: u64,
    /// Per-SMP CPU cap of the CPU class.
    pub smp_size: u64,
}

impl CapacitySnapshot {
    /// Build a snapshot from a capability map.
    ///
    /// Returns `Ok(None)` when the map has no backfill capacity for
    /// `gpu_model`: the GPU section or model entry is missing, or its
    /// per-host cap is absent or zero.
    ///
    /// # Errors
    /// Returns [`ProviderError::Config`] if the map has no host class
    /// `cpu_type`.
    pub fn from_capabilities(
        caps: &Capabilities,
        gpu_model: &str,
        cpu_type: &str,
    ) -> Result<Option<Self>, ProviderError> {
        let Some(gpu) = caps.gpus.as_ref().and_then(|gpus| gpus.get(gpu_model)) else {
            return Ok(None);
        };
        let max_per_host = match gpu.max_per_host {
            Some(max) if max > 0 => max,
            _ => return Ok(None),
        };

        let host = caps.hosts.get(cpu_type).ok_or_else(|| {
            ProviderError::Config(format!("unknown cpu_type '{cpu_type}' in capabilities"))
        })?;

        Ok(Some(Self {
            total_gpus: gpu.available_backfill,
            max_per_host,
            most_free_cpu: host.free_resources.total.cpu,
            most_free_mem: host.free_resources.total.mem,
            smp_size: host.cpu_per_smp.max,
        }))
    }
}

/// Reads capacity snapshots from the provider.
pub struct CapacityOracle<'a> {
    client: &'a dyn ResourceClient,
    retry_interval: Duration,
}

impl<'a> CapacityOracle<'a> {
    /// Create an oracle with the default retry interval.
    #[must_use]
    pub fn new(client: &'a dyn ResourceClient) -> Self {
        Self {
            client,
            retry_interval: DEFAULT_CAPACITY_RETRY,
        }
    }

    /// Override the pause between queries while no capacity is available.
    #[must_use]
    pub fn with_retry_interval(mut self, retry_interval: Duration) -> Self {
        self.retry_interval = retry_interval;
        self
    }

    /// Query capacity once.
    ///
    /// # Errors
    /// Returns error if the capability query fails or the CPU class is unknown.
    pub async fn probe(
        &self,
        gpu_model: &str,
        cpu_type: &str,
    ) -> Result<Option<CapacitySnapshot>, ProviderError> {
        let caps = self.client.capabilities().await?;
        CapacitySnapshot::from_capabilities(&caps, gpu_model, cpu_type)
    }

    /// Query capacity until backfill GPUs of `gpu_model` are available.
    ///
    /// Waits `retry_interval` between queries and never gives up on its own.
    ///
    /// # Errors
    /// Returns error if a capability query fails or the CPU class is unknown.
    pub async fn fetch(
        &self,
        gpu_model: &str,
        cpu_type: &str,
    ) -> Result<CapacitySnapshot, ProviderError> {
        loop {
            if let Some(snapshot) = self.probe(gpu_model, cpu_type).await? {
                debug!(
                    gpu_model = %gpu_model,
                    total_gpus = snapshot.total_gpus,
                    max_per_host = snapshot.max_per_host,
                    most_free_cpu = snapshot.most_free_cpu,
                    most_free_mem = snapshot.most_free_mem,
                    "Capacity snapshot"
                );
                return Ok(snapshot);
            }

            info!(
                gpu_model = %gpu_model,
                retry_secs = self.retry_interval.as_secs(),
                "No GPUs currently available, pausing"
            );
            tokio::time::sleep(self.retry_interval).await;
        }
    }
}
