//! Controller configuration.
//!
//! Settings come either from command-line flags or from the `[main]` table of
//! a TOML file. Both are validated into an immutable [`BackfillConfig`] that
//! is built once per cycle and passed by reference to every component.
//!
//! ```toml
//! [main]
//! gpus = 2
//! gpu_model = "a100"
//! grey = true
//! server_cpu = 8          # GHz
//! server_mem = 16         # GB
//! cpu_type = "amd"
//! unique_name = "lab"
//! public_network = true
//! private_network = false
//! auto_adjust_max_gpus = true
//! iteration_pause_sec = 120
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::capacity::DEFAULT_CAPACITY_RETRY;
use crate::providers::ServerTier;

/// MHz per GHz.
const MHZ_PER_GHZ: u64 = 1000;

/// Bytes per GB.
const BYTES_PER_GB: u64 = 1 << 30;

/// Default pause between continuous-mode cycles.
pub const DEFAULT_ITERATION_PAUSE: Duration = Duration::from_secs(120);

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The config file is not valid TOML or has wrongly typed values.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A required setting is absent.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// A setting has an unusable value.
    #[error("Invalid setting {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Unvalidated settings, as written by the user.
///
/// CPU is in GHz and memory in GB here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// GPUs per server.
    pub gpus: Option<u32>,
    /// GPU model id, e.g. `a100`.
    pub gpu_model: Option<String>,
    /// Create backfill (grey) servers instead of standard (white) ones.
    pub grey: Option<bool>,
    /// CPU per server in GHz.
    pub server_cpu: Option<u64>,
    /// Memory per server in GB.
    pub server_mem: Option<u64>,
    /// Host CPU class, a key of the capability `hosts` map.
    pub cpu_type: Option<String>,
    /// Template drive to clone as the boot disk.
    pub drive: Option<String>,
    /// SSH public key uuid.
    pub pubkey: Option<String>,
    /// Suffix of generated server names.
    pub unique_name: Option<String>,
    /// Attach a DHCP public NIC.
    pub public_network: Option<bool>,
    /// Attach a NIC on `vlan_uuid`.
    pub private_network: Option<bool>,
    /// VLAN for the private NIC.
    pub vlan_uuid: Option<String>,
    /// Clamp GPUs per server to the per-host maximum.
    pub auto_adjust_max_gpus: Option<bool>,
    /// Seconds between continuous-mode cycles.
    pub iteration_pause_sec: Option<u64>,
    /// Seconds between capacity queries while no GPUs are free.
    pub capacity_retry_sec: Option<u64>,
    /// VNC console password; a random one is generated when unset.
    pub vnc_password: Option<String>,
    /// Fixed number of servers per cycle.
    pub servers: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    main: Settings,
}

/// Parameters of the servers to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerParams {
    /// GPUs per server.
    pub gpus: u32,
    /// GPU model identifier.
    pub gpu_model: String,
    /// Tier servers are created on.
    pub tier: ServerTier,
    /// CPU per server in MHz.
    pub cpu_mhz: u64,
    /// Memory per server in bytes.
    pub mem_bytes: u64,
    /// Host CPU class.
    pub cpu_type: String,
    /// Template drive cloned as the boot disk.
    pub drive: Option<String>,
    /// SSH public key attached to servers.
    pub pubkey: Option<String>,
    /// Suffix of generated server names.
    pub unique_name: String,
    /// Attach a DHCP public NIC.
    pub public_network: bool,
    /// Attach a private VLAN NIC (needs `vlan_uuid`).
    pub private_network: bool,
    /// VLAN for the private NIC.
    pub vlan_uuid: Option<String>,
    /// Clamp GPUs per server to the per-host cap.
    pub auto_adjust_max_gpus: bool,
    /// Fixed VNC password; random per server when absent.
    pub vnc_password: Option<String>,
}

/// Validated controller configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillConfig {
    /// Explicit number of servers per cycle.
    pub servers: Option<u32>,
    /// Server parameters.
    pub server: ServerParams,
    /// Pause between continuous-mode cycles.
    pub iteration_pause: Duration,
    /// Pause between capacity queries while none is available.
    pub capacity_retry: Duration,
}

impl BackfillConfig {
    /// Load and validate the `[main]` table of a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Parse and validate TOML configuration text.
    ///
    /// # Errors
    /// Returns error if the text cannot be parsed or validated.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents)?;
        file.main.validate()
    }
}

impl Settings {
    /// Validate into a [`BackfillConfig`], scaling CPU and memory units.
    ///
    /// Empty optional strings are treated as absent.
    ///
    /// # Errors
    /// Returns error if a required setting is missing or a value is unusable.
    pub fn validate(self) -> Result<BackfillConfig, ConfigError> {
        let gpus = required(self.gpus, "gpus")?;
        if gpus == 0 {
            return Err(invalid("gpus", "must be at least 1"));
        }

        let server_cpu = required(self.server_cpu, "server_cpu")?;
        let cpu_mhz = scale(server_cpu, MHZ_PER_GHZ, "server_cpu")?;
        let server_mem = required(self.server_mem, "server_mem")?;
        let mem_bytes = scale(server_mem, BYTES_PER_GB, "server_mem")?;

        if self.servers == Some(0) {
            return Err(invalid("servers", "must be at least 1"));
        }

        let server = ServerParams {
            gpus,
            gpu_model: required_text(self.gpu_model, "gpu_model")?,
            tier: ServerTier::from_grey(required(self.grey, "grey")?),
            cpu_mhz,
            mem_bytes,
            cpu_type: required_text(self.cpu_type, "cpu_type")?,
            drive: non_empty(self.drive),
            pubkey: non_empty(self.pubkey),
            unique_name: required_text(self.unique_name, "unique_name")?,
            public_network: required(self.public_network, "public_network")?,
            private_network: required(self.private_network, "private_network")?,
            vlan_uuid: non_empty(self.vlan_uuid),
            auto_adjust_max_gpus: required(self.auto_adjust_max_gpus, "auto_adjust_max_gpus")?,
            vnc_password: non_empty(self.vnc_password),
        };

        Ok(BackfillConfig {
            servers: self.servers,
            server,
            iteration_pause: self
                .iteration_pause_sec
                .map_or(DEFAULT_ITERATION_PAUSE, Duration::from_secs),
            capacity_retry: self
                .capacity_retry_sec
                .map_or(DEFAULT_CAPACITY_RETRY, Duration::from_secs),
        })
    }
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, ConfigError> {
    value.ok_or(ConfigError::Missing(field))
}

fn required_text(value: Option<String>, field: &'static str) -> Result<String, ConfigError> {
    let value = required(value, field)?;
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    Ok(value.trim().to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn scale(value: u64, factor: u64, field: &'static str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(invalid(field, "must be greater than 0"));
    }
    value
        .checked_mul(factor)
        .ok_or_else(|| invalid(field, "is too large"))
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
