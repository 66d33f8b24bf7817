//! In-memory provider used by the integration tests.
//!
//! Transitions are eventually consistent: a started server reads `starting`
//! until the `settle_polls`-th read after the start call, and so on for
//! stops, deletes and clones. Every call is recorded.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use backfill::config::Settings;
use backfill::providers::{
    Capabilities, CloneDriveRequest, DriveStatus, ManagedDrive, ManagedServer, ProviderError,
    ResourceClient, ServerSpec, ServerStatus, ServerTier,
};

/// Reads before a pending transition becomes visible.
pub const DEFAULT_SETTLE_POLLS: u32 = 2;

/// A recorded client call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ListServers,
    ListServersDetail,
    GetServer(String),
    CreateServer(ServerTier, String),
    StartServer(String),
    StopServer(String),
    DeleteServer(String),
    ListDrivesDetail,
    GetDrive(String),
    CloneDrive(String),
    DeleteDrive(String),
    Capabilities,
}

/// How the fake reacts to a start call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartBehavior {
    /// Server reaches `running`.
    Converge,
    /// Start call is rejected with this message.
    Reject(String),
    /// Server stays `starting` forever.
    Hang,
}

#[derive(Debug, Clone)]
enum Target<S> {
    Status(S),
    Gone,
}

#[derive(Debug, Clone)]
struct Pending<S> {
    target: Target<S>,
    reads_left: u32,
}

#[derive(Debug, Clone)]
struct Entry<T, S> {
    resource: T,
    pending: Option<Pending<S>>,
}

#[derive(Default)]
struct State {
    next_id: u32,
    servers: BTreeMap<String, Entry<ManagedServer, ServerStatus>>,
    drives: BTreeMap<String, Entry<ManagedDrive, DriveStatus>>,
    calls: Vec<Call>,
    specs: Vec<ServerSpec>,
    capabilities: VecDeque<Capabilities>,
    start: Option<StartBehavior>,
    hang_stop: bool,
    hang_clone: bool,
    failing_drive_reads: Vec<String>,
    failing_server_reads: Vec<String>,
    failing_stops: Vec<String>,
    failing_deletes: Vec<String>,
    failing_creates: u32,
    failing_server_listing: bool,
    deletes_while_not_stopped: Vec<String>,
}

/// In-memory [`ResourceClient`].
pub struct FakeCloud {
    settle_polls: u32,
    state: Mutex<State>,
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            settle_polls: DEFAULT_SETTLE_POLLS,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn next_uuid(state: &mut State, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}", state.next_id)
    }

    fn pending<S>(&self, target: Target<S>) -> Option<Pending<S>> {
        Some(Pending {
            target,
            reads_left: self.settle_polls,
        })
    }

    pub fn add_server(&self, name: &str, status: ServerStatus) -> String {
        let mut state = self.state();
        let uuid = Self::next_uuid(&mut state, "srv");
        state.servers.insert(
            uuid.clone(),
            Entry {
                resource: ManagedServer {
                    uuid: uuid.clone(),
                    name: name.to_string(),
                    status,
                },
                pending: None,
            },
        );
        uuid
    }

    pub fn add_drive(&self, name: &str, status: DriveStatus) -> String {
        let mut state = self.state();
        let uuid = Self::next_uuid(&mut state, "drv");
        state.drives.insert(
            uuid.clone(),
            Entry {
                resource: ManagedDrive {
                    uuid: uuid.clone(),
                    name: name.to_string(),
                    status,
                },
                pending: None,
            },
        );
        uuid
    }

    /// Queue capability maps; the last one is returned repeatedly.
    pub fn push_capabilities(&self, caps: Capabilities) {
        self.state().capabilities.push_back(caps);
    }

    pub fn set_start_behavior(&self, behavior: StartBehavior) {
        self.state().start = Some(behavior);
    }

    pub fn hang_stops(&self) {
        self.state().hang_stop = true;
    }

    pub fn hang_clones(&self) {
        self.state().hang_clone = true;
    }

    /// Make reads of a drive fail with a server error.
    pub fn fail_drive_reads(&self, uuid: &str) {
        self.state().failing_drive_reads.push(uuid.to_string());
    }

    /// Make reads of a server fail with a server error.
    pub fn fail_server_reads(&self, uuid: &str) {
        self.state().failing_server_reads.push(uuid.to_string());
    }

    /// Make stop calls for a server fail.
    pub fn fail_stops(&self, uuid: &str) {
        self.state().failing_stops.push(uuid.to_string());
    }

    /// Make delete calls for a server fail.
    pub fn fail_deletes(&self, uuid: &str) {
        self.state().failing_deletes.push(uuid.to_string());
    }

    /// Make the next `count` create calls fail.
    pub fn fail_creates(&self, count: u32) {
        self.state().failing_creates = count;
    }

    /// Make detailed server listings fail.
    pub fn fail_server_listing(&self) {
        self.state().failing_server_listing = true;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn specs(&self) -> Vec<ServerSpec> {
        self.state().specs.clone()
    }

    pub fn server(&self, uuid: &str) -> Option<ManagedServer> {
        self.state().servers.get(uuid).map(|e| e.resource.clone())
    }

    pub fn server_names(&self) -> Vec<String> {
        self.state()
            .servers
            .values()
            .map(|e| e.resource.name.clone())
            .collect()
    }

    pub fn drive(&self, uuid: &str) -> Option<ManagedDrive> {
        self.state().drives.get(uuid).map(|e| e.resource.clone())
    }

    /// Servers that received a delete call while not stopped.
    pub fn deletes_while_not_stopped(&self) -> Vec<String> {
        self.state().deletes_while_not_stopped.clone()
    }

    fn record(&self, call: Call) {
        self.state().calls.push(call);
    }
}

/// Advance a pending transition by one read. Returns `None` if the resource is gone.
fn read<T: Clone, S>(
    map: &mut BTreeMap<String, Entry<T, S>>,
    uuid: &str,
    apply: impl Fn(&mut T, S),
) -> Option<T> {
    let entry = map.get_mut(uuid)?;
    if let Some(pending) = entry.pending.as_mut() {
        pending.reads_left = pending.reads_left.saturating_sub(1);
        if pending.reads_left == 0 {
            let pending = entry.pending.take()?;
            match pending.target {
                Target::Status(status) => apply(&mut entry.resource, status),
                Target::Gone => {
                    map.remove(uuid);
                    return None;
                }
            }
        }
    }
    Some(entry.resource.clone())
}

fn not_found(uuid: &str) -> ProviderError {
    ProviderError::NotFound(format!("{uuid} not found"))
}

fn internal_error() -> ProviderError {
    ProviderError::Api {
        status: 500,
        message: "internal error".to_string(),
    }
}

#[async_trait]
impl ResourceClient for FakeCloud {
    async fn list_servers(&self) -> Result<Vec<ManagedServer>, ProviderError> {
        self.record(Call::ListServers);
        Ok(self
            .state()
            .servers
            .values()
            .map(|e| e.resource.clone())
            .collect())
    }

    async fn list_servers_detail(&self) -> Result<Vec<ManagedServer>, ProviderError> {
        self.record(Call::ListServersDetail);
        let state = self.state();
        if state.failing_server_listing {
            return Err(internal_error());
        }
        Ok(state
            .servers
            .values()
            .map(|e| e.resource.clone())
            .collect())
    }

    async fn get_server(&self, uuid: &str) -> Result<ManagedServer, ProviderError> {
        self.record(Call::GetServer(uuid.to_string()));
        let mut state = self.state();
        if state.failing_server_reads.iter().any(|u| u == uuid) {
            return Err(internal_error());
        }
        read(&mut state.servers, uuid, |s, status| s.status = status).ok_or_else(|| not_found(uuid))
    }

    async fn create_server(
        &self,
        tier: ServerTier,
        spec: &ServerSpec,
    ) -> Result<ManagedServer, ProviderError> {
        self.record(Call::CreateServer(tier, spec.name.clone()));
        let mut state = self.state();
        if state.failing_creates > 0 {
            state.failing_creates -= 1;
            return Err(internal_error());
        }
        let uuid = Self::next_uuid(&mut state, "srv");
        let server = ManagedServer {
            uuid: uuid.clone(),
            name: spec.name.clone(),
            status: ServerStatus::Stopped,
        };
        state.specs.push(spec.clone());
        state.servers.insert(
            uuid,
            Entry {
                resource: server.clone(),
                pending: None,
            },
        );
        Ok(server)
    }

    async fn start_server(&self, uuid: &str) -> Result<(), ProviderError> {
        self.record(Call::StartServer(uuid.to_string()));
        let mut state = self.state();
        let behavior = state.start.clone().unwrap_or(StartBehavior::Converge);
        if let StartBehavior::Reject(message) = behavior {
            return Err(ProviderError::Api {
                status: 403,
                message,
            });
        }
        let pending = match behavior {
            StartBehavior::Hang => None,
            _ => self.pending(Target::Status(ServerStatus::Running)),
        };
        let entry = state.servers.get_mut(uuid).ok_or_else(|| not_found(uuid))?;
        entry.resource.status = ServerStatus::Starting;
        entry.pending = pending;
        Ok(())
    }

    async fn stop_server(&self, uuid: &str) -> Result<(), ProviderError> {
        self.record(Call::StopServer(uuid.to_string()));
        let mut state = self.state();
        if state.failing_stops.iter().any(|u| u == uuid) {
            return Err(internal_error());
        }
        let pending = if state.hang_stop {
            None
        } else {
            self.pending(Target::Status(ServerStatus::Stopped))
        };
        let entry = state.servers.get_mut(uuid).ok_or_else(|| not_found(uuid))?;
        entry.resource.status = ServerStatus::Stopping;
        entry.pending = pending;
        Ok(())
    }

    async fn delete_server(&self, uuid: &str) -> Result<(), ProviderError> {
        self.record(Call::DeleteServer(uuid.to_string()));
        let mut state = self.state();
        if state.failing_deletes.iter().any(|u| u == uuid) {
            return Err(internal_error());
        }
        let pending = self.pending(Target::Gone);
        let entry = state.servers.get_mut(uuid).ok_or_else(|| not_found(uuid))?;
        if entry.resource.status != ServerStatus::Stopped {
            let uuid = uuid.to_string();
            state.deletes_while_not_stopped.push(uuid.clone());
            return Err(ProviderError::Api {
                status: 409,
                message: format!("server {uuid} is not stopped"),
            });
        }
        entry.resource.status = ServerStatus::Deleting;
        entry.pending = pending;
        Ok(())
    }

    async fn list_drives_detail(&self) -> Result<Vec<ManagedDrive>, ProviderError> {
        self.record(Call::ListDrivesDetail);
        Ok(self
            .state()
            .drives
            .values()
            .map(|e| e.resource.clone())
            .collect())
    }

    async fn get_drive(&self, uuid: &str) -> Result<ManagedDrive, ProviderError> {
        self.record(Call::GetDrive(uuid.to_string()));
        let mut state = self.state();
        if state.failing_drive_reads.iter().any(|u| u == uuid) {
            return Err(internal_error());
        }
        read(&mut state.drives, uuid, |d, status| d.status = status).ok_or_else(|| not_found(uuid))
    }

    async fn clone_drive(
        &self,
        uuid: &str,
        req: &CloneDriveRequest,
    ) -> Result<ManagedDrive, ProviderError> {
        self.record(Call::CloneDrive(uuid.to_string()));
        let mut state = self.state();
        let new_uuid = Self::next_uuid(&mut state, "drv");
        let pending = if state.hang_clone {
            None
        } else {
            self.pending(Target::Status(DriveStatus::Unmounted))
        };
        let drive = ManagedDrive {
            uuid: new_uuid.clone(),
            name: req.name.clone(),
            status: DriveStatus::CloningDst,
        };
        state.drives.insert(
            new_uuid,
            Entry {
                resource: drive.clone(),
                pending,
            },
        );
        Ok(drive)
    }

    async fn delete_drive(&self, uuid: &str) -> Result<(), ProviderError> {
        self.record(Call::DeleteDrive(uuid.to_string()));
        let mut state = self.state();
        let pending = self.pending(Target::Gone);
        let entry = state.drives.get_mut(uuid).ok_or_else(|| not_found(uuid))?;
        entry.resource.status = DriveStatus::Deleting;
        entry.pending = pending;
        Ok(())
    }

    async fn capabilities(&self) -> Result<Capabilities, ProviderError> {
        self.record(Call::Capabilities);
        let mut state = self.state();
        let caps = if state.capabilities.len() > 1 {
            state.capabilities.pop_front()
        } else {
            state.capabilities.front().cloned()
        };
        Ok(caps.unwrap_or_default())
    }
}

/// Capability map with backfill GPUs of model `a100` on `amd` hosts.
pub fn capabilities(available: u64, max_per_host: u64, free_cpu: u64, free_mem: u64) -> Capabilities {
    serde_json::from_value(serde_json::json!({
        "gpus": {"a100": {"available_backfill": available, "max_per_host": max_per_host}},
        "hosts": {
            "amd": {
                "cpu_per_smp": {"min": 250, "max": 2500},
                "free_resources": {"total": {"cpu": free_cpu, "mem": free_mem}}
            }
        }
    }))
    .unwrap()
}

/// Valid settings for `a100` servers on `amd` hosts named `*-lab`.
pub fn settings(grey: bool) -> Settings {
    Settings {
        gpus: Some(2),
        gpu_model: Some("a100".to_string()),
        grey: Some(grey),
        server_cpu: Some(8),
        server_mem: Some(16),
        cpu_type: Some("amd".to_string()),
        unique_name: Some("lab".to_string()),
        public_network: Some(true),
        private_network: Some(false),
        auto_adjust_max_gpus: Some(false),
        ..Settings::default()
    }
}
