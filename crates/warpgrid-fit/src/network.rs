//! Network index: port reservations and bandwidth accounting for one node.
//!
//! Ports are tracked per host network. Two allocations may hold the same
//! port value as long as they sit on different host networks.
//!
//! # Architecture
//!
//! ```text
//! NetworkIndex
//!   ├── used_ports: host network → Bitmap (65536 bits)
//!   ├── port_owners: (host network, port) → PortOwner
//!   ├── node_reserved_ports: blocked for dynamic assignment everywhere
//!   └── bandwidth: device → (available, used)
//! ```
//!
//! Indexes are expensive to build (8 KiB per host network), so callers
//! normally draw them from a [`NetworkIndexPool`].

pub mod pool;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::trace;

use crate::bitmap::Bitmap;
use crate::config::PortRange;
use crate::error::NetworkError;
use crate::ports::parse_port_ranges;
use crate::types::*;

pub use pool::{NetworkIndexPool, PoolStats, PooledNetworkIndex};

/// Who holds a port reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortOwner {
    /// Reserved by node configuration.
    Node,
    /// Held by the allocation with this id.
    Alloc(String),
}

/// Index of used and available network resources on a single node.
#[derive(Debug, Default)]
pub struct NetworkIndex {
    dynamic_ports: PortRange,
    avail_bandwidth: BTreeMap<String, u64>,
    used_bandwidth: BTreeMap<String, u64>,
    used_ports: HashMap<String, Bitmap>,
    port_owners: HashMap<(String, u16), PortOwner>,
    node_reserved_ports: BTreeSet<u16>,
    host_ips: HashMap<String, String>,
    /// Cleared bitmaps kept for reuse after a reset.
    spare_bitmaps: Vec<Bitmap>,
}

impl NetworkIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an index that assigns dynamic ports from `range`.
    pub fn with_dynamic_ports(range: PortRange) -> Self {
        Self {
            dynamic_ports: range,
            ..Self::default()
        }
    }

    pub fn set_dynamic_ports(&mut self, range: PortRange) {
        self.dynamic_ports = range;
    }

    pub fn dynamic_ports(&self) -> PortRange {
        self.dynamic_ports
    }

    /// Drop all state. Port bitmaps are cleared and kept for reuse.
    pub fn reset(&mut self) {
        for (_, mut bitmap) in self.used_ports.drain() {
            bitmap.clear();
            self.spare_bitmaps.push(bitmap);
        }
        self.avail_bandwidth.clear();
        self.used_bandwidth.clear();
        self.port_owners.clear();
        self.node_reserved_ports.clear();
        self.host_ips.clear();
        self.dynamic_ports = PortRange::default();
    }

    /// Install the node's device bandwidth and its reserved ports.
    ///
    /// Node-wide reserved ports land on the default host network and are
    /// also excluded from dynamic assignment on every host network. Each
    /// named host network reserves its own ports in its own scope.
    pub fn set_node(&mut self, node: &Node) -> Result<(), NetworkError> {
        for n in &node.resources.networks {
            if !n.device.is_empty() {
                self.avail_bandwidth.insert(n.device.clone(), n.mbits);
            }
            if !n.ip.is_empty() {
                self.host_ips
                    .entry(DEFAULT_HOST_NETWORK.to_string())
                    .or_insert_with(|| n.ip.clone());
            }
        }

        let spec = &node.reserved.reserved_host_ports;
        let reserved = parse_port_ranges(spec).map_err(|source| NetworkError::ReservedPortSpec {
            spec: spec.clone(),
            source,
        })?;
        for port in reserved {
            self.node_reserved_ports.insert(port);
            self.reserve_node_port(DEFAULT_HOST_NETWORK, port)?;
        }

        for hn in &node.resources.host_networks {
            let scope = host_network_or_default(&hn.name);
            if let Some(addr) = hn.cidr.split('/').next().filter(|a| !a.is_empty()) {
                self.host_ips.insert(scope.to_string(), addr.to_string());
            }
            let ports = parse_port_ranges(&hn.reserved_ports).map_err(|source| {
                NetworkError::ReservedPortSpec {
                    spec: hn.reserved_ports.clone(),
                    source,
                }
            })?;
            for port in ports {
                self.reserve_node_port(scope, port)?;
            }
        }

        Ok(())
    }

    fn reserve_node_port(&mut self, scope: &str, port: u16) -> Result<(), NetworkError> {
        self.reserve(scope, port, PortOwner::Node)
            .map_err(|_| NetworkError::NodeReservedCollision {
                port,
                host_network: scope.to_string(),
            })
    }

    /// Record the network usage of every non-terminal allocation.
    ///
    /// Bandwidth is accumulated from all group and task networks. Ports
    /// come from the allocation's port mappings when present, otherwise
    /// from the reserved and already-assigned dynamic ports of its
    /// networks. Stops at the first collision.
    pub fn add_allocs(&mut self, allocs: &[Allocation]) -> Result<(), NetworkError> {
        for alloc in allocs {
            if alloc.is_terminal() {
                continue;
            }

            let resources = &alloc.allocated_resources;
            let networks: Vec<&NetworkResource> = resources
                .shared
                .networks
                .iter()
                .chain(resources.tasks.values().flat_map(|t| t.networks.iter()))
                .collect();

            for n in &networks {
                self.add_bandwidth(n);
            }

            if !resources.shared.ports.is_empty() {
                self.add_reserved_ports(&resources.shared.ports, &alloc.id)?;
                continue;
            }

            for n in &networks {
                self.add_network_ports(n, &alloc.id)?;
            }
        }
        Ok(())
    }

    /// Reserve every port of `n` and charge its bandwidth.
    pub fn add_reserved(&mut self, n: &NetworkResource, owner: &str) -> Result<(), NetworkError> {
        self.add_bandwidth(n);
        self.add_network_ports(n, owner)
    }

    fn add_bandwidth(&mut self, n: &NetworkResource) {
        if n.mbits == 0 {
            return;
        }
        *self.used_bandwidth.entry(n.device.clone()).or_insert(0) += n.mbits;
        trace!(device = %n.device, mbits = n.mbits, "charged bandwidth");
    }

    fn add_network_ports(&mut self, n: &NetworkResource, owner: &str) -> Result<(), NetworkError> {
        for port in &n.reserved_ports {
            if port.value == 0 {
                return Err(NetworkError::InvalidPort {
                    label: port.label.clone(),
                    port: 0,
                });
            }
            self.reserve_alloc_port(port.host_network(), port.value, &port.label, owner)?;
        }
        // Assigned dynamic ports are as binding as reserved ones.
        for port in n.dynamic_ports.iter().filter(|p| p.value != 0) {
            self.reserve_alloc_port(port.host_network(), port.value, &port.label, owner)?;
        }
        Ok(())
    }

    /// Reserve an already assigned set of port mappings for `owner`.
    pub fn add_reserved_ports(
        &mut self,
        ports: &AllocatedPorts,
        owner: &str,
    ) -> Result<(), NetworkError> {
        for p in ports.iter() {
            if p.value == 0 {
                return Err(NetworkError::InvalidPort {
                    label: p.label.clone(),
                    port: 0,
                });
            }
            self.reserve_alloc_port(p.host_network(), p.value, &p.label, owner)?;
        }
        Ok(())
    }

    fn reserve_alloc_port(
        &mut self,
        scope: &str,
        port: u16,
        label: &str,
        owner: &str,
    ) -> Result<(), NetworkError> {
        self.reserve(scope, port, PortOwner::Alloc(owner.to_string()))
            .map_err(|existing| {
                trace!(
                    port,
                    host_network = scope,
                    owner,
                    held_by = ?existing,
                    "port collision"
                );
                NetworkError::PortCollision {
                    label: label.to_string(),
                    port,
                    host_network: scope.to_string(),
                }
            })
    }

    /// Mark `(scope, port)` as taken. On conflict returns the current owner.
    fn reserve(&mut self, scope: &str, port: u16, owner: PortOwner) -> Result<(), PortOwner> {
        let key = (scope.to_string(), port);
        if let Some(existing) = self.port_owners.get(&key) {
            return Err(existing.clone());
        }
        let spare = &mut self.spare_bitmaps;
        self.used_ports
            .entry(scope.to_string())
            .or_insert_with(|| spare.pop().unwrap_or_else(Bitmap::for_ports))
            .set(port as usize);
        self.port_owners.insert(key, owner);
        Ok(())
    }

    /// Pick host ports for `ask` without modifying the index.
    ///
    /// Reserved ports, and dynamic ports that already carry a value, must
    /// be free in their host network. Unassigned dynamic ports get the
    /// lowest free port of the dynamic range, in ascending label order,
    /// skipping node-reserved ports. A dynamic port with `to == -1` maps
    /// to its assigned host port.
    pub fn assign_ports(&self, ask: &NetworkResource) -> Result<AllocatedPorts, NetworkError> {
        let mut scratch: HashMap<String, Bitmap> = HashMap::new();
        let mut offer = Vec::new();

        let fixed = ask
            .reserved_ports
            .iter()
            .chain(ask.dynamic_ports.iter().filter(|p| p.value != 0));
        for port in fixed {
            if port.value == 0 {
                return Err(NetworkError::InvalidPort {
                    label: port.label.clone(),
                    port: 0,
                });
            }
            let scope = port.host_network();
            let used = self.scratch_for(&mut scratch, scope);
            if used.check(port.value as usize) {
                return Err(NetworkError::PortCollision {
                    label: port.label.clone(),
                    port: port.value,
                    host_network: scope.to_string(),
                });
            }
            used.set(port.value as usize);
            offer.push(self.mapping(port, port.value, scope));
        }

        let mut dynamic: Vec<&Port> = ask.dynamic_ports.iter().filter(|p| p.value == 0).collect();
        dynamic.sort_by(|a, b| a.label.cmp(&b.label));

        let range = self.dynamic_ports;
        for port in dynamic {
            let scope = port.host_network();
            let used = self.scratch_for(&mut scratch, scope);
            let picked = used
                .indexes_in_range(false, range.min as usize, range.max as usize + 1)
                .map(|p| p as u16)
                .find(|p| !self.node_reserved_ports.contains(p))
                .ok_or_else(|| NetworkError::DynamicPortsExhausted(scope.to_string()))?;
            used.set(picked as usize);
            offer.push(self.mapping(port, picked, scope));
        }

        Ok(AllocatedPorts(offer))
    }

    fn scratch_for<'a>(&self, scratch: &'a mut HashMap<String, Bitmap>, scope: &str) -> &'a mut Bitmap {
        scratch.entry(scope.to_string()).or_insert_with(|| {
            self.used_ports
                .get(scope)
                .cloned()
                .unwrap_or_else(Bitmap::for_ports)
        })
    }

    fn mapping(&self, port: &Port, value: u16, scope: &str) -> AllocatedPortMapping {
        AllocatedPortMapping {
            label: port.label.clone(),
            value,
            to: if port.to == -1 { value as i32 } else { port.to },
            host_ip: self.host_ips.get(scope).cloned().unwrap_or_default(),
            host_network: scope.to_string(),
        }
    }

    /// True if any device carries more bandwidth than it offers.
    pub fn overcommitted(&self) -> bool {
        self.used_bandwidth
            .iter()
            .any(|(device, used)| *used > self.available_bandwidth(device))
    }

    pub fn available_bandwidth(&self, device: &str) -> u64 {
        self.avail_bandwidth.get(device).copied().unwrap_or(0)
    }

    pub fn used_bandwidth(&self, device: &str) -> u64 {
        self.used_bandwidth.get(device).copied().unwrap_or(0)
    }

    pub fn is_port_used(&self, host_network: &str, port: u16) -> bool {
        self.used_ports
            .get(host_network_or_default(host_network))
            .is_some_and(|b| b.check(port as usize))
    }

    pub fn port_owner(&self, host_network: &str, port: u16) -> Option<&PortOwner> {
        self.port_owners
            .get(&(host_network_or_default(host_network).to_string(), port))
    }

    /// Ports reserved by node configuration.
    pub fn node_reserved_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.node_reserved_ports.iter().copied()
    }
}
