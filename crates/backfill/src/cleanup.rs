//! Converges managed servers and drives towards deletion.
//!
//! Managed servers are those whose name contains `grey` or `white`; managed
//! drives are those whose name contains `test` (clones are named
//! `test_clone_<template>`). Servers are processed before drives because a
//! drive stays `mounted` until its server has stopped.
//!
//! A server is only ever deleted once it has been observed `stopped`, either
//! directly in the listing or by polling after a stop call. Anything that does
//! not converge within one pass is logged and left for the next pass.

use tracing::{info, warn};

use crate::providers::{DriveStatus, ProviderError, ResourceClient, ServerStatus};
use crate::wait::{wait_for_deleted, wait_for_status, WaitPolicy};

/// Name fragments identifying managed servers.
pub const MANAGED_SERVER_MARKERS: [&str; 2] = ["grey", "white"];

/// Name fragment identifying managed drives.
pub const MANAGED_DRIVE_MARKER: &str = "test";

/// Which servers a cleanup pass touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupScope {
    /// Only delete servers that are already stopped.
    StoppedOnly,
    /// Stop running servers too, and report stuck ones.
    All,
}

/// What to do with a managed server in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerAction {
    /// Stop, wait for `stopped`, then delete.
    Stop,
    /// Delete right away.
    Delete,
    /// Report as stuck in an intermediate state.
    Stuck,
    /// Leave alone.
    Skip,
}

/// What to do with a managed drive in a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveAction {
    /// Leave for the owning server to release.
    Keep,
    /// Delete right away.
    Delete,
    /// Report as stuck in an intermediate state.
    Stuck,
}

/// Decide the action for a managed server.
#[must_use]
pub fn classify_server(status: &ServerStatus, scope: CleanupScope) -> ServerAction {
    match (status, scope) {
        (ServerStatus::Stopped, _) => ServerAction::Delete,
        (ServerStatus::Running, CleanupScope::All) => ServerAction::Stop,
        (_, CleanupScope::All) => ServerAction::Stuck,
        (_, CleanupScope::StoppedOnly) => ServerAction::Skip,
    }
}

/// Decide the action for a managed drive.
#[must_use]
pub fn classify_drive(status: &DriveStatus) -> DriveAction {
    match status {
        DriveStatus::Mounted => DriveAction::Keep,
        DriveStatus::Unmounted | DriveStatus::Uploading => DriveAction::Delete,
        _ => DriveAction::Stuck,
    }
}

/// Whether a server name marks it as managed.
#[must_use]
pub fn is_managed_server(name: &str) -> bool {
    MANAGED_SERVER_MARKERS
        .iter()
        .any(|marker| name.contains(marker))
}

/// Whether a drive name marks it as managed.
#[must_use]
pub fn is_managed_drive(name: &str) -> bool {
    name.contains(MANAGED_DRIVE_MARKER)
}

/// Outcome of a cleanup pass, by resource uuid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Servers stopped during this pass.
    pub servers_stopped: Vec<String>,
    /// Servers confirmed deleted.
    pub servers_deleted: Vec<String>,
    /// Servers in states this pass does not advance.
    pub servers_stuck: Vec<String>,
    /// Servers left for a later pass after a failed call or poll.
    pub servers_pending: Vec<String>,
    /// Drives confirmed deleted.
    pub drives_deleted: Vec<String>,
    /// Drives still mounted.
    pub drives_mounted: Vec<String>,
    /// Drives in states this pass does not advance.
    pub drives_stuck: Vec<String>,
    /// Drives left for a later pass after a failed call or poll.
    pub drives_pending: Vec<String>,
}

/// Drives managed resources towards deletion.
pub struct CleanupReconciler<'a> {
    client: &'a dyn ResourceClient,
    policy: WaitPolicy,
}

impl<'a> CleanupReconciler<'a> {
    /// Create a reconciler with the default wait policy.
    #[must_use]
    pub fn new(client: &'a dyn ResourceClient) -> Self {
        Self {
            client,
            policy: WaitPolicy::default(),
        }
    }

    /// Override the wait policy used for stop and delete polls.
    #[must_use]
    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run a server pass then a drive pass.
    ///
    /// # Errors
    /// Returns error if servers or drives cannot be listed. Failures on
    /// individual resources are logged and recorded in the report.
    pub async fn cleanup(&self, scope: CleanupScope) -> Result<CleanupReport, ProviderError> {
        let mut report = CleanupReport::default();
        self.cleanup_servers(scope, &mut report).await?;
        self.cleanup_drives(&mut report).await?;
        Ok(report)
    }

    async fn cleanup_servers(
        &self,
        scope: CleanupScope,
        report: &mut CleanupReport,
    ) -> Result<(), ProviderError> {
        let client = self.client;
        let servers = client.list_servers_detail().await?;

        let mut stopping = Vec::new();
        let mut deleting = Vec::new();

        for server in servers.iter().filter(|s| is_managed_server(&s.name)) {
            match classify_server(&server.status, scope) {
                ServerAction::Stop => match client.stop_server(&server.uuid).await {
                    Ok(()) => stopping.push(server.uuid.clone()),
                    Err(e) => {
                        warn!(server_id = %server.uuid, error = %e, "Failed to stop server");
                        report.servers_pending.push(server.uuid.clone());
                    }
                },
                ServerAction::Delete => match client.delete_server(&server.uuid).await {
                    Ok(()) => deleting.push(server.uuid.clone()),
                    Err(e) => {
                        warn!(server_id = %server.uuid, error = %e, "Failed to delete server");
                        report.servers_pending.push(server.uuid.clone());
                    }
                },
                ServerAction::Stuck => report.servers_stuck.push(server.uuid.clone()),
                ServerAction::Skip => {}
            }
        }

        for uuid in stopping {
            let wait = wait_for_status(&uuid, &ServerStatus::Stopped, self.policy, || {
                client.get_server(&uuid)
            })
            .await;
            match wait {
                Ok(wait) if wait.reached => {
                    report.servers_stopped.push(uuid.clone());
                    match client.delete_server(&uuid).await {
                        Ok(()) => deleting.push(uuid),
                        Err(e) => {
                            warn!(server_id = %uuid, error = %e, "Failed to delete server");
                            report.servers_pending.push(uuid);
                        }
                    }
                }
                Ok(_) => {
                    info!(server_id = %uuid, "Server did not stop in time");
                    report.servers_pending.push(uuid);
                }
                Err(e) => {
                    info!(server_id = %uuid, error = %e, "Server did not stop in time");
                    report.servers_pending.push(uuid);
                }
            }
        }

        for uuid in deleting {
            match wait_for_deleted(&uuid, self.policy, || client.get_server(&uuid)).await {
                Ok(_) => report.servers_deleted.push(uuid),
                Err(e) => {
                    info!(server_id = %uuid, error = %e, "Server did not delete in time");
                    report.servers_pending.push(uuid);
                }
            }
        }

        if !report.servers_stuck.is_empty() {
            info!(servers = ?report.servers_stuck, "Servers stuck in intermediate states");
        }

        Ok(())
    }

    async fn cleanup_drives(&self, report: &mut CleanupReport) -> Result<(), ProviderError> {
        let client = self.client;
        let drives = client.list_drives_detail().await?;

        let mut deleting = Vec::new();

        for drive in drives.iter().filter(|d| is_managed_drive(&d.name)) {
            match classify_drive(&drive.status) {
                DriveAction::Keep => report.drives_mounted.push(drive.uuid.clone()),
                DriveAction::Delete => match client.delete_drive(&drive.uuid).await {
                    Ok(()) => deleting.push(drive.uuid.clone()),
                    Err(e) => {
                        warn!(drive_id = %drive.uuid, error = %e, "Failed to delete drive");
                        report.drives_pending.push(drive.uuid.clone());
                    }
                },
                DriveAction::Stuck => report.drives_stuck.push(drive.uuid.clone()),
            }
        }

        for uuid in deleting {
            match wait_for_deleted(&uuid, self.policy, || client.get_drive(&uuid)).await {
                Ok(_) => report.drives_deleted.push(uuid),
                Err(e) => {
                    info!(drive_id = %uuid, error = %e, "Drive did not delete in time");
                    report.drives_pending.push(uuid);
                }
            }
        }

        if !report.drives_stuck.is_empty() {
            info!(
                drives = ?report.drives_stuck,
                "Drives stuck in intermediate states and cannot be deleted"
            );
        }

        Ok(())
    }
}
