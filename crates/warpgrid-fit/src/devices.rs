//! Device instance accounting.
//!
//! Each healthy instance a node exposes may be handed to at most one
//! allocation at a time. The accounter counts instance use across a set
//! of allocations and reports oversubscription.

use std::collections::{BTreeMap, HashMap};

use tracing::trace;

use crate::types::*;

/// Usage of one `(vendor, type, name)` device group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceAccounterInstance {
    /// Instance id → number of allocations holding it.
    pub instances: HashMap<String, u32>,
}

impl DeviceAccounterInstance {
    fn new(device: &NodeDeviceResource) -> Self {
        let instances = device
            .instances
            .iter()
            .filter(|i| i.healthy)
            .map(|i| (i.id.clone(), 0))
            .collect();
        Self { instances }
    }

    /// Instances not held by any allocation.
    pub fn free_count(&self) -> usize {
        self.instances.values().filter(|&&used| used == 0).count()
    }
}

/// Tracks device instance usage against what a node exposes.
#[derive(Debug, Clone, Default)]
pub struct DeviceAccounter {
    devices: BTreeMap<DeviceIdTuple, DeviceAccounterInstance>,
}

impl DeviceAccounter {
    pub fn new(node: &Node) -> Self {
        let devices = node
            .resources
            .devices
            .iter()
            .map(|d| (d.id(), DeviceAccounterInstance::new(d)))
            .collect();
        Self { devices }
    }

    /// Charge the devices of every non-terminal allocation.
    ///
    /// Returns true if any instance ends up oversubscribed.
    pub fn add_allocs(&mut self, allocs: &[Allocation]) -> bool {
        let mut collision = false;
        for alloc in allocs {
            if alloc.is_terminal() {
                continue;
            }
            for task in alloc.allocated_resources.tasks.values() {
                for device in &task.devices {
                    if self.add_reserved(device) {
                        trace!(alloc = %alloc.id, device = %device.id(), "device oversubscribed");
                        collision = true;
                    }
                }
            }
        }
        collision
    }

    /// Charge a single device grant. Returns true on oversubscription.
    ///
    /// Asking for an instance or device group the node does not expose
    /// counts as oversubscription, as does asking for more instances than
    /// the group has.
    pub fn add_reserved(&mut self, device: &AllocatedDeviceResource) -> bool {
        let Some(group) = self.devices.get_mut(&device.id()) else {
            return !device.device_ids.is_empty();
        };

        let mut collision = device.device_ids.len() > group.instances.len();
        for id in &device.device_ids {
            match group.instances.get_mut(id) {
                Some(used) => {
                    *used += 1;
                    if *used > 1 {
                        collision = true;
                    }
                }
                None => collision = true,
            }
        }
        collision
    }

    /// Unused instances of a device group. Unknown groups have none.
    pub fn free_count(&self, id: &DeviceIdTuple) -> usize {
        self.devices
            .get(id)
            .map(DeviceAccounterInstance::free_count)
            .unwrap_or(0)
    }

    pub fn get(&self, id: &DeviceIdTuple) -> Option<&DeviceAccounterInstance> {
        self.devices.get(id)
    }
}
