//! Resource client trait and common types.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during provider operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Resource not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Operation timed out.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Whether the provider reported that the resource does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// The provider's own error text, without the variant prefix.
    #[must_use]
    pub fn provider_message(&self) -> String {
        match self {
            Self::Api { message, .. } | Self::NotFound(message) | Self::Config(message) => {
                message.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Server status as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    /// Server is being created.
    Creating,
    /// Server is booting.
    Starting,
    /// Server is running.
    Running,
    /// Server is shutting down.
    Stopping,
    /// Server is stopped.
    Stopped,
    /// Server is paused.
    Paused,
    /// Server is unavailable (host maintenance, failed migration).
    Unavailable,
    /// Server is being deleted.
    Deleting,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Stopped => write!(f, "stopped"),
            Self::Paused => write!(f, "paused"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Deleting => write!(f, "deleting"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Drive status as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriveStatus {
    /// Drive is being created.
    Creating,
    /// Drive is not attached to a running server.
    Unmounted,
    /// Drive is attached to a running server.
    Mounted,
    /// Drive image upload is in progress.
    Uploading,
    /// Drive is the source of a clone in progress.
    CloningSrc,
    /// Drive is the target of a clone in progress.
    CloningDst,
    /// Drive is being deleted.
    Deleting,
    /// Drive is unavailable.
    Unavailable,
    /// Unknown status.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for DriveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Creating => write!(f, "creating"),
            Self::Unmounted => write!(f, "unmounted"),
            Self::Mounted => write!(f, "mounted"),
            Self::Uploading => write!(f, "uploading"),
            Self::CloningSrc => write!(f, "cloning_src"),
            Self::CloningDst => write!(f, "cloning_dst"),
            Self::Deleting => write!(f, "deleting"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A server as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedServer {
    /// Provider-assigned identifier.
    pub uuid: String,
    /// Server name, encoding category and sequence.
    pub name: String,
    /// Current status.
    pub status: ServerStatus,
}

/// A drive as seen by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedDrive {
    /// Provider-assigned identifier.
    pub uuid: String,
    /// Drive name.
    pub name: String,
    /// Current status.
    pub status: DriveStatus,
}

/// Server tier a server is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerTier {
    /// Opportunistic capacity, named `grey-*`.
    Backfill,
    /// Regular capacity, named `white-*`.
    Standard,
}

impl ServerTier {
    /// Tier selected by the `grey` configuration flag.
    #[must_use]
    pub fn from_grey(grey: bool) -> Self {
        if grey {
            Self::Backfill
        } else {
            Self::Standard
        }
    }

    /// Naming category used for servers on this tier.
    #[must_use]
    pub fn category(self) -> &'static str {
        match self {
            Self::Backfill => "grey",
            Self::Standard => "white",
        }
    }
}

impl std::fmt::Display for ServerTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backfill => write!(f, "backfill"),
            Self::Standard => write!(f, "standard"),
        }
    }
}

/// One GPU requested for a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuSpec {
    /// GPU model identifier.
    pub model: String,
}

/// IPv4 configuration of a public NIC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpV4Conf {
    /// Static address, `None` for DHCP.
    pub ip: Option<String>,
    /// Configuration method.
    pub conf: String,
}

/// Network interface of a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NicSpec {
    /// DHCP-configured public interface.
    Public {
        /// Address configuration.
        ip_v4_conf: IpV4Conf,
        /// NIC model.
        model: String,
    },
    /// Interface on a private VLAN.
    Vlan {
        /// VLAN identifier.
        vlan: String,
    },
}

impl NicSpec {
    /// A virtio NIC on the public network using DHCP.
    #[must_use]
    pub fn public_dhcp() -> Self {
        Self::Public {
            ip_v4_conf: IpV4Conf {
                ip: None,
                conf: "dhcp".to_string(),
            },
            model: "virtio".to_string(),
        }
    }

    /// A NIC attached to the given VLAN.
    #[must_use]
    pub fn vlan(uuid: impl Into<String>) -> Self {
        Self::Vlan { vlan: uuid.into() }
    }
}

/// Drive attached to a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveAttachment {
    /// Device type.
    pub device: String,
    /// Device channel (`controller:unit`).
    pub dev_channel: String,
    /// Attached drive identifier.
    pub drive: String,
    /// Position in the boot order.
    pub boot_order: u32,
}

impl DriveAttachment {
    /// Attach `drive` as the first boot device on virtio channel `0:0`.
    #[must_use]
    pub fn boot(drive: impl Into<String>) -> Self {
        Self {
            device: "virtio".to_string(),
            dev_channel: "0:0".to_string(),
            drive: drive.into(),
            boot_order: 1,
        }
    }
}

/// Definition of a server to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Server name.
    pub name: String,
    /// CPU in MHz.
    pub cpu: u64,
    /// Memory in bytes.
    pub mem: u64,
    /// Host CPU class.
    pub cpu_type: String,
    /// One entry per GPU.
    pub gpus: Vec<GpuSpec>,
    /// Network interfaces, in attachment order.
    pub nics: Vec<NicSpec>,
    /// Attached drives.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub drives: Option<Vec<DriveAttachment>>,
    /// SSH public key identifiers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkeys: Option<Vec<String>>,
    /// VNC console password.
    pub vnc_password: String,
}

/// Request to clone a drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneDriveRequest {
    /// Name of the new drive.
    pub name: String,
}

/// GPU inventory for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuCapability {
    /// GPUs currently available to backfill servers.
    #[serde(default)]
    pub available_backfill: u64,
    /// Most GPUs a single host can give one server.
    #[serde(default)]
    pub max_per_host: Option<u64>,
}

/// Lower/upper bound pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    /// Lower bound.
    #[serde(default)]
    pub min: u64,
    /// Upper bound.
    #[serde(default)]
    pub max: u64,
}

/// Free CPU and memory totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTotals {
    /// CPU in MHz.
    #[serde(default)]
    pub cpu: u64,
    /// Memory in bytes.
    #[serde(default)]
    pub mem: u64,
}

/// Free resources of a host class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeResources {
    /// Totals over all hosts of the class.
    #[serde(default)]
    pub total: ResourceTotals,
}

/// Capacity of one host CPU class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapability {
    /// CPU per SMP unit.
    #[serde(default)]
    pub cpu_per_smp: Bounds,
    /// Currently free resources.
    #[serde(default)]
    pub free_resources: FreeResources,
}

/// Provider capability map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// GPU inventory keyed by model.
    #[serde(default)]
    pub gpus: Option<HashMap<String, GpuCapability>>,
    /// Host classes keyed by CPU type.
    #[serde(default)]
    pub hosts: HashMap<String, HostCapability>,
}

/// Trait for the cloud provider's resource API.
///
/// Get, start, stop and delete address servers of either tier; only
/// creation is tier-specific.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List all servers (short form).
    async fn list_servers(&self) -> Result<Vec<ManagedServer>, ProviderError>;

    /// List all servers with full details.
    async fn list_servers_detail(&self) -> Result<Vec<ManagedServer>, ProviderError>;

    /// Get a server by uuid.
    async fn get_server(&self, uuid: &str) -> Result<ManagedServer, ProviderError>;

    /// Create a server on the given tier.
    async fn create_server(
        &self,
        tier: ServerTier,
        spec: &ServerSpec,
    ) -> Result<ManagedServer, ProviderError>;

    /// Start a stopped server.
    async fn start_server(&self, uuid: &str) -> Result<(), ProviderError>;

    /// Stop a running server.
    async fn stop_server(&self, uuid: &str) -> Result<(), ProviderError>;

    /// Delete a server.
    async fn delete_server(&self, uuid: &str) -> Result<(), ProviderError>;

    /// List all drives with full details.
    async fn list_drives_detail(&self) -> Result<Vec<ManagedDrive>, ProviderError>;

    /// Get a drive by uuid.
    async fn get_drive(&self, uuid: &str) -> Result<ManagedDrive, ProviderError>;

    /// Clone a drive.
    async fn clone_drive(
        &self,
        uuid: &str,
        req: &CloneDriveRequest,
    ) -> Result<ManagedDrive, ProviderError>;

    /// Delete a drive.
    async fn delete_drive(&self, uuid: &str) -> Result<(), ProviderError>;

    /// Query the provider's capability map.
    async fn capabilities(&self) -> Result<Capabilities, ProviderError>;
}
