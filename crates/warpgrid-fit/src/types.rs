//! Domain types consumed by the fit evaluator.
//!
//! Nodes and allocations arrive from the scheduler as plain data. All types
//! are serializable so the CLI can read them from JSON.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::reschedule::{ReschedulePolicy, RescheduleTracker};

/// Host network scope used when a port does not name one.
pub const DEFAULT_HOST_NETWORK: &str = "default";

/// Normalize an empty host network name to [`DEFAULT_HOST_NETWORK`].
pub fn host_network_or_default(name: &str) -> &str {
    if name.is_empty() {
        DEFAULT_HOST_NETWORK
    } else {
        name
    }
}

// ── Ports and networks ────────────────────────────────────────────

/// A port request or reservation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Port {
    pub label: String,
    /// Host port. `0` on a dynamic port means "assign one".
    pub value: u16,
    /// Port inside the workload the host port forwards to. `-1` maps to
    /// whatever host port gets assigned.
    pub to: i32,
    /// Scope in which `value` must be unique. Empty means `"default"`.
    pub host_network: String,
}

impl Port {
    pub fn new(label: &str, value: u16) -> Self {
        Self {
            label: label.to_string(),
            value,
            ..Default::default()
        }
    }

    pub fn on_host_network(mut self, host_network: &str) -> Self {
        self.host_network = host_network.to_string();
        self
    }

    pub fn host_network(&self) -> &str {
        host_network_or_default(&self.host_network)
    }
}

/// DNS settings attached to a network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsConfig {
    pub servers: Vec<String>,
    pub searches: Vec<String>,
    pub options: Vec<String>,
}

/// A network attachment, either offered by a node or requested by a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkResource {
    pub mode: String,
    pub device: String,
    pub cidr: String,
    pub ip: String,
    pub hostname: String,
    pub mbits: u64,
    pub dns: Option<DnsConfig>,
    pub reserved_ports: Vec<Port>,
    pub dynamic_ports: Vec<Port>,
}

impl NetworkResource {
    pub fn on_device(device: &str, mbits: u64) -> Self {
        Self {
            device: device.to_string(),
            mbits,
            ..Default::default()
        }
    }
}

/// A concrete host port handed to an allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatedPortMapping {
    pub label: String,
    pub value: u16,
    pub to: i32,
    pub host_ip: String,
    pub host_network: String,
}

impl AllocatedPortMapping {
    pub fn host_network(&self) -> &str {
        host_network_or_default(&self.host_network)
    }
}

/// Ordered set of port mappings, looked up by label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocatedPorts(pub Vec<AllocatedPortMapping>);

impl AllocatedPorts {
    pub fn get(&self, label: &str) -> Option<&AllocatedPortMapping> {
        self.0.iter().find(|p| p.label == label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AllocatedPortMapping> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ── Devices ───────────────────────────────────────────────────────

/// Identifies a class of device on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdTuple {
    pub vendor: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
}

impl fmt::Display for DeviceIdTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.vendor, self.device_type, self.name)
    }
}

/// A single device instance exposed by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDevice {
    pub id: String,
    #[serde(default = "default_true")]
    pub healthy: bool,
}

fn default_true() -> bool {
    true
}

/// A group of identical device instances on a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDeviceResource {
    pub vendor: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    pub instances: Vec<NodeDevice>,
}

impl NodeDeviceResource {
    pub fn id(&self) -> DeviceIdTuple {
        DeviceIdTuple {
            vendor: self.vendor.clone(),
            device_type: self.device_type.clone(),
            name: self.name.clone(),
        }
    }
}

/// Device instances handed to a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatedDeviceResource {
    pub vendor: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub name: String,
    pub device_ids: Vec<String>,
}

impl AllocatedDeviceResource {
    pub fn id(&self) -> DeviceIdTuple {
        DeviceIdTuple {
            vendor: self.vendor.clone(),
            device_type: self.device_type.clone(),
            name: self.name.clone(),
        }
    }
}

// ── Allocated resources ───────────────────────────────────────────

/// CPU granted to a task: proportional shares plus optional exclusive cores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatedCpuResources {
    pub cpu_shares: i64,
    /// Exclusive cores. Must not overlap across allocations on one node.
    pub reserved_cores: BTreeSet<u16>,
}

/// Memory granted to a task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatedMemoryResources {
    pub memory_mb: i64,
    /// Hard ceiling. `0` means no explicit ceiling; the base applies.
    pub memory_max_mb: i64,
}

/// Resources granted to one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatedTaskResources {
    pub cpu: AllocatedCpuResources,
    pub memory: AllocatedMemoryResources,
    pub networks: Vec<NetworkResource>,
    pub devices: Vec<AllocatedDeviceResource>,
}

/// Resources granted to a task group as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatedSharedResources {
    pub disk_mb: i64,
    pub networks: Vec<NetworkResource>,
    pub ports: AllocatedPorts,
}

/// When a task runs relative to the main tasks of its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleHook {
    Prestart,
    Poststart,
    Poststop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLifecycle {
    pub hook: LifecycleHook,
    /// Sidecars keep running alongside the main tasks.
    #[serde(default)]
    pub sidecar: bool,
}

/// Everything granted to an allocation, keyed by task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatedResources {
    pub tasks: BTreeMap<String, AllocatedTaskResources>,
    pub task_lifecycles: BTreeMap<String, TaskLifecycle>,
    pub shared: AllocatedSharedResources,
}

// ── Allocation ────────────────────────────────────────────────────

/// Status reported by the client running the allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    Lost,
    Unknown,
}

/// Status the scheduler wants the allocation in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DesiredStatus {
    #[default]
    Run,
    Stop,
    Evict,
}

/// Per-task runtime state reported by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskState {
    pub failed: bool,
    pub started_at: Option<SystemTime>,
    pub finished_at: Option<SystemTime>,
}

/// A placement of one task group's demand onto one node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Allocation {
    pub id: String,
    pub name: String,
    pub node_id: String,
    pub task_group: String,
    pub client_status: ClientStatus,
    pub desired_status: DesiredStatus,
    pub allocated_resources: AllocatedResources,
    pub task_states: BTreeMap<String, TaskState>,
    pub modify_time: Option<SystemTime>,
    /// Reschedule policy of the allocation's task group.
    pub reschedule_policy: Option<ReschedulePolicy>,
    pub reschedule_tracker: Option<RescheduleTracker>,
}

impl Allocation {
    /// True once the client reports the allocation finished for good. Such
    /// allocations no longer consume node resources.
    pub fn is_client_terminal(&self) -> bool {
        matches!(
            self.client_status,
            ClientStatus::Complete | ClientStatus::Failed | ClientStatus::Lost
        )
    }

    /// True if either the scheduler or the client considers it finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.desired_status,
            DesiredStatus::Stop | DesiredStatus::Evict
        ) || self.is_client_terminal()
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A named host network on a node with its own reserved ports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeHostNetwork {
    pub name: String,
    pub cidr: String,
    pub interface: String,
    /// Port spec, e.g. `"22,8000-8100"`.
    pub reserved_ports: String,
}

/// Total resources a node offers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeResources {
    pub cpu_shares: i64,
    /// Cores that allocations may reserve exclusively.
    pub reservable_cores: BTreeSet<u16>,
    pub memory_mb: i64,
    /// Oversubscription ceiling. `0` means the base memory is the ceiling.
    pub memory_max_mb: i64,
    pub disk_mb: i64,
    pub networks: Vec<NetworkResource>,
    pub host_networks: Vec<NodeHostNetwork>,
    pub devices: Vec<NodeDeviceResource>,
}

/// Resources held back for the node's own agents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeReservedResources {
    pub cpu_shares: i64,
    pub reserved_cores: BTreeSet<u16>,
    pub memory_mb: i64,
    pub disk_mb: i64,
    /// Port spec reserved on the default host network, e.g. `"22,80"`.
    pub reserved_host_ports: String,
}

/// A compute node as seen by the fit evaluator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub resources: NodeResources,
    pub reserved: NodeReservedResources,
}
