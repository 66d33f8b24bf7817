//! Server creation and start-up.
//!
//! A server goes through create → start → poll until `running`. Boot drives
//! are cloned from a template and polled until `unmounted` before the server
//! definition references them.

use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::config::ServerParams;
use crate::naming::NamingAllocator;
use crate::providers::{
    CloneDriveRequest, DriveAttachment, DriveStatus, GpuSpec, ManagedServer, NicSpec,
    ProviderError, ResourceClient, ServerSpec, ServerStatus, ServerTier,
};
use crate::wait::{wait_for_status, WaitPolicy};

/// Prefix of drives cloned by the controller; cleanup matches on it.
pub const CLONE_NAME_PREFIX: &str = "test_clone_";

/// GPUs to request per server.
///
/// With auto-adjustment enabled the requested count is clamped to the per-host
/// cap; an unknown cap leaves the request unchanged.
#[must_use]
pub fn gpu_count(params: &ServerParams, max_per_host: Option<u64>) -> u32 {
    match max_per_host {
        Some(max) if params.auto_adjust_max_gpus && u64::from(params.gpus) > max => {
            // max < gpus <= u32::MAX
            u32::try_from(max).unwrap_or(params.gpus)
        }
        _ => params.gpus,
    }
}

/// Network interfaces for a server.
///
/// The private NIC needs both `private_network` and a VLAN uuid.
#[must_use]
pub fn nics_for(params: &ServerParams) -> Vec<NicSpec> {
    let mut nics = Vec::new();
    if params.public_network {
        nics.push(NicSpec::public_dhcp());
    }
    if let (true, Some(vlan)) = (params.private_network, params.vlan_uuid.as_deref()) {
        nics.push(NicSpec::vlan(vlan));
    }
    nics
}

/// Result of creating and starting one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOutcome {
    /// Server as last observed.
    pub server: ManagedServer,
    /// Whether the server was observed running.
    pub started: bool,
    /// Time from start call to `running`, when it got there.
    pub startup: Option<Duration>,
}

/// Builds, creates and starts servers.
pub struct ResourceLifecycleManager<'a> {
    client: &'a dyn ResourceClient,
    naming: NamingAllocator<'a>,
    policy: WaitPolicy,
}

impl<'a> ResourceLifecycleManager<'a> {
    /// Create a manager with the default wait policy.
    #[must_use]
    pub fn new(client: &'a dyn ResourceClient) -> Self {
        Self {
            client,
            naming: NamingAllocator::new(client),
            policy: WaitPolicy::default(),
        }
    }

    /// Override the wait policy used for drive and server polls.
    #[must_use]
    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Build the definition of the next server.
    ///
    /// Allocates the name, and clones the template drive when one is set.
    ///
    /// # Errors
    /// Returns error if naming or drive cloning fails.
    pub async fn build_spec(
        &self,
        params: &ServerParams,
        max_per_host: Option<u64>,
    ) -> Result<ServerSpec, ProviderError> {
        let name = self
            .naming
            .next_name(params.tier, &params.unique_name)
            .await?;

        let count = gpu_count(params, max_per_host);
        if count != params.gpus {
            info!(requested = params.gpus, granted = count, "Clamped GPUs to per-host maximum");
        }
        let gpus = (0..count)
            .map(|_| GpuSpec {
                model: params.gpu_model.clone(),
            })
            .collect();

        let drives = match &params.drive {
            Some(template) => {
                let cloned = self.clone_drive(template).await?;
                Some(vec![DriveAttachment::boot(cloned)])
            }
            None => None,
        };

        Ok(ServerSpec {
            name,
            cpu: params.cpu_mhz,
            mem: params.mem_bytes,
            cpu_type: params.cpu_type.clone(),
            gpus,
            nics: nics_for(params),
            drives,
            pubkeys: params.pubkey.clone().map(|key| vec![key]),
            vnc_password: params
                .vnc_password
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
        })
    }

    /// Clone `template` and wait for the clone to become `unmounted`.
    ///
    /// The clone's uuid is returned even when the wait times out.
    ///
    /// # Errors
    /// Returns error if the clone call or a status poll fails.
    pub async fn clone_drive(&self, template: &str) -> Result<String, ProviderError> {
        let req = CloneDriveRequest {
            name: format!("{CLONE_NAME_PREFIX}{template}"),
        };
        let cloned = self.client.clone_drive(template, &req).await?;
        let uuid = cloned.uuid;

        let client = self.client;
        let wait = wait_for_status(&uuid, &DriveStatus::Unmounted, self.policy, || {
            client.get_drive(&uuid)
        })
        .await?;
        if !wait.reached {
            warn!(
                drive_id = %uuid,
                status = %wait.resource.status,
                "Cloned drive not ready, attaching anyway"
            );
        }

        Ok(uuid)
    }

    /// Create a server on `tier`, start it and wait until it runs.
    ///
    /// A rejected start call is logged and reported as not started.
    ///
    /// # Errors
    /// Returns error if the create call or a status poll fails.
    pub async fn create_and_start(
        &self,
        spec: &ServerSpec,
        tier: ServerTier,
    ) -> Result<LaunchOutcome, ProviderError> {
        let server = self.client.create_server(tier, spec).await?;

        if let Err(e) = self.client.start_server(&server.uuid).await {
            warn!(
                server_id = %server.uuid,
                error = %e.provider_message(),
                "Server failed to start"
            );
            return Ok(LaunchOutcome {
                server,
                started: false,
                startup: None,
            });
        }

        let client = self.client;
        let uuid = server.uuid.clone();
        let wait = wait_for_status(&uuid, &ServerStatus::Running, self.policy, || {
            client.get_server(&uuid)
        })
        .await?;

        let startup = wait.reached.then(|| self.policy.elapsed(wait.attempts));
        if let Some(elapsed) = startup {
            info!(
                server = %wait.resource.name,
                elapsed_secs = elapsed.as_secs(),
                "Server started"
            );
        }

        Ok(LaunchOutcome {
            server: wait.resource,
            started: wait.reached,
            startup,
        })
    }
}
