//! Comparable resource algebra.
//!
//! Node capacity and allocation demand are both folded into
//! [`ComparableResources`] so they can be added, subtracted and compared
//! dimension by dimension.
//!
//! # Dimensions
//!
//! | Dimension    | Source                                        |
//! |--------------|-----------------------------------------------|
//! | `cpu`        | `flattened.cpu.cpu_shares`                    |
//! | `cores`      | `flattened.cpu.reserved_cores` (set algebra)  |
//! | `memory`     | `flattened.memory.memory_mb`                  |
//! | `memory_max` | effective `flattened.memory.memory_max_mb`    |
//! | `disk`       | `shared.disk_mb`                              |
//! | `network`    | device names in `flattened.networks`          |

use serde::{Deserialize, Serialize};

use crate::fit::FitDimension;
use crate::types::*;

/// Resources of a task group flattened across its tasks, in a shape that
/// supports arithmetic and comparison.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparableResources {
    pub flattened: AllocatedTaskResources,
    pub shared: AllocatedSharedResources,
}

impl ComparableResources {
    pub fn add(&mut self, delta: &ComparableResources) {
        self.flattened.add(&delta.flattened);
        self.shared.add(&delta.shared);
    }

    pub fn subtract(&mut self, delta: &ComparableResources) {
        self.flattened.subtract(&delta.flattened);
        self.shared.subtract(&delta.shared);
    }

    /// Check that `self` covers `other` in every dimension.
    ///
    /// On failure returns the first dimension that does not fit, in the
    /// order `cpu`, `cores`, `memory`, `memory_max`, `disk`, `network`.
    /// Bandwidth volume is left to the network index.
    pub fn superset(&self, other: &ComparableResources) -> Result<(), FitDimension> {
        let (cpu, other_cpu) = (&self.flattened.cpu, &other.flattened.cpu);
        if cpu.cpu_shares < other_cpu.cpu_shares {
            return Err(FitDimension::Cpu);
        }
        if !other_cpu.reserved_cores.is_subset(&cpu.reserved_cores) {
            return Err(FitDimension::Cores);
        }

        let (mem, other_mem) = (&self.flattened.memory, &other.flattened.memory);
        if mem.memory_mb < other_mem.memory_mb {
            return Err(FitDimension::Memory);
        }
        if mem.effective_max_mb() < other_mem.effective_max_mb() {
            return Err(FitDimension::MemoryMax);
        }

        if self.shared.disk_mb < other.shared.disk_mb {
            return Err(FitDimension::Disk);
        }

        let missing_device = other
            .flattened
            .networks
            .iter()
            .filter(|n| !n.device.is_empty())
            .any(|n| net_index(&self.flattened.networks, &n.device).is_none());
        if missing_device {
            return Err(FitDimension::Network);
        }

        Ok(())
    }
}

// ── CPU ───────────────────────────────────────────────────────────

impl AllocatedCpuResources {
    pub fn add(&mut self, delta: &AllocatedCpuResources) {
        self.cpu_shares += delta.cpu_shares;
        self.reserved_cores.extend(delta.reserved_cores.iter().copied());
    }

    pub fn subtract(&mut self, delta: &AllocatedCpuResources) {
        self.cpu_shares = non_negative_sub(self.cpu_shares, delta.cpu_shares, "cpu shares");
        self.reserved_cores.retain(|c| !delta.reserved_cores.contains(c));
    }

    /// Component-wise maximum; the larger core set wins.
    pub fn max(&mut self, other: &AllocatedCpuResources) {
        self.cpu_shares = self.cpu_shares.max(other.cpu_shares);
        if other.reserved_cores.len() > self.reserved_cores.len() {
            self.reserved_cores = other.reserved_cores.clone();
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────

impl AllocatedMemoryResources {
    /// The ceiling, falling back to the base when none was set.
    pub fn effective_max_mb(&self) -> i64 {
        if self.memory_max_mb > 0 {
            self.memory_max_mb
        } else {
            self.memory_mb
        }
    }

    pub fn add(&mut self, delta: &AllocatedMemoryResources) {
        let max = self.effective_max_mb() + delta.effective_max_mb();
        self.memory_mb += delta.memory_mb;
        self.memory_max_mb = max;
    }

    pub fn subtract(&mut self, delta: &AllocatedMemoryResources) {
        let max = non_negative_sub(self.effective_max_mb(), delta.effective_max_mb(), "memory max");
        self.memory_mb = non_negative_sub(self.memory_mb, delta.memory_mb, "memory");
        self.memory_max_mb = max;
    }

    pub fn max(&mut self, other: &AllocatedMemoryResources) {
        let max = self.effective_max_mb().max(other.effective_max_mb());
        self.memory_mb = self.memory_mb.max(other.memory_mb);
        self.memory_max_mb = max;
    }
}

// ── Networks ──────────────────────────────────────────────────────

impl NetworkResource {
    pub fn add(&mut self, delta: &NetworkResource) {
        self.mbits += delta.mbits;
        self.reserved_ports.extend(delta.reserved_ports.iter().cloned());
        self.dynamic_ports.extend(delta.dynamic_ports.iter().cloned());
    }

    pub fn subtract(&mut self, delta: &NetworkResource) {
        self.mbits = self.mbits.saturating_sub(delta.mbits);
        self.reserved_ports.retain(|p| !delta.reserved_ports.contains(p));
        self.dynamic_ports.retain(|p| !delta.dynamic_ports.contains(p));
    }

    fn is_empty(&self) -> bool {
        self.mbits == 0 && self.reserved_ports.is_empty() && self.dynamic_ports.is_empty()
    }
}

/// Position of the network attached to `device`.
pub fn net_index(networks: &[NetworkResource], device: &str) -> Option<usize> {
    networks.iter().position(|n| n.device == device)
}

/// Merge `delta` into `networks`. Entries on the same device combine; new
/// devices are inserted in device order so addition commutes.
fn add_networks(networks: &mut Vec<NetworkResource>, delta: &[NetworkResource]) {
    for n in delta {
        match net_index(networks, &n.device) {
            Some(idx) => networks[idx].add(n),
            None => {
                let at = networks.partition_point(|existing| existing.device < n.device);
                networks.insert(at, n.clone());
            }
        }
    }
}

/// Entries emptied by the subtraction are dropped; untouched ones stay
/// even when they carry no bandwidth.
fn subtract_networks(networks: &mut Vec<NetworkResource>, delta: &[NetworkResource]) {
    for n in delta {
        if let Some(idx) = net_index(networks, &n.device) {
            networks[idx].subtract(n);
            if networks[idx].is_empty() {
                networks.remove(idx);
            }
        }
    }
}

fn max_networks(networks: &mut Vec<NetworkResource>, other: &[NetworkResource]) {
    for n in other {
        match net_index(networks, &n.device) {
            Some(idx) => {
                let existing = &mut networks[idx];
                existing.mbits = existing.mbits.max(n.mbits);
            }
            None => {
                let at = networks.partition_point(|existing| existing.device < n.device);
                networks.insert(at, n.clone());
            }
        }
    }
}

// ── Devices ───────────────────────────────────────────────────────

fn add_devices(devices: &mut Vec<AllocatedDeviceResource>, delta: &[AllocatedDeviceResource]) {
    for d in delta {
        let id = d.id();
        match devices.iter_mut().find(|existing| existing.id() == id) {
            Some(existing) => existing.device_ids.extend(d.device_ids.iter().cloned()),
            None => devices.push(d.clone()),
        }
    }
}

fn subtract_devices(devices: &mut Vec<AllocatedDeviceResource>, delta: &[AllocatedDeviceResource]) {
    for d in delta {
        let id = d.id();
        if let Some(existing) = devices.iter_mut().find(|existing| existing.id() == id) {
            existing.device_ids.retain(|i| !d.device_ids.contains(i));
        }
    }
    devices.retain(|d| !d.device_ids.is_empty());
}

// ── Task and shared resources ─────────────────────────────────────

impl AllocatedTaskResources {
    pub fn add(&mut self, delta: &AllocatedTaskResources) {
        self.cpu.add(&delta.cpu);
        self.memory.add(&delta.memory);
        add_networks(&mut self.networks, &delta.networks);
        add_devices(&mut self.devices, &delta.devices);
    }

    pub fn subtract(&mut self, delta: &AllocatedTaskResources) {
        self.cpu.subtract(&delta.cpu);
        self.memory.subtract(&delta.memory);
        subtract_networks(&mut self.networks, &delta.networks);
        subtract_devices(&mut self.devices, &delta.devices);
    }

    /// Component-wise maximum, used for tasks that never run concurrently
    /// with the main tasks.
    pub fn max(&mut self, other: &AllocatedTaskResources) {
        self.cpu.max(&other.cpu);
        self.memory.max(&other.memory);
        max_networks(&mut self.networks, &other.networks);
        for d in &other.devices {
            let id = d.id();
            match self.devices.iter_mut().find(|existing| existing.id() == id) {
                Some(existing) if existing.device_ids.len() < d.device_ids.len() => {
                    existing.device_ids = d.device_ids.clone();
                }
                Some(_) => {}
                None => self.devices.push(d.clone()),
            }
        }
    }
}

impl AllocatedSharedResources {
    pub fn add(&mut self, delta: &AllocatedSharedResources) {
        self.disk_mb += delta.disk_mb;
        add_networks(&mut self.networks, &delta.networks);
        self.ports.0.extend(delta.ports.iter().cloned());
    }

    pub fn subtract(&mut self, delta: &AllocatedSharedResources) {
        self.disk_mb = non_negative_sub(self.disk_mb, delta.disk_mb, "disk");
        subtract_networks(&mut self.networks, &delta.networks);
        self.ports.0.retain(|p| !delta.ports.0.contains(p));
    }
}

impl AllocatedResources {
    /// Flatten per-task resources into one comparable demand.
    ///
    /// Prestart (non-sidecar) and poststop tasks never overlap the main
    /// tasks, so only the larger of them and the main tasks counts.
    /// Sidecars run alongside and are added. Group-level networks are
    /// folded into the flattened networks.
    pub fn comparable(&self) -> ComparableResources {
        let mut main = AllocatedTaskResources::default();
        let mut prestart_ephemeral = AllocatedTaskResources::default();
        let mut prestart_sidecar = AllocatedTaskResources::default();
        let mut poststop = AllocatedTaskResources::default();

        for (name, task) in &self.tasks {
            match self.task_lifecycles.get(name) {
                None => main.add(task),
                Some(lc) => match lc.hook {
                    LifecycleHook::Prestart if lc.sidecar => prestart_sidecar.add(task),
                    LifecycleHook::Prestart => prestart_ephemeral.add(task),
                    LifecycleHook::Poststart => main.add(task),
                    LifecycleHook::Poststop => poststop.add(task),
                },
            }
        }

        main.max(&prestart_ephemeral);
        main.max(&poststop);
        main.add(&prestart_sidecar);

        let mut flattened = AllocatedTaskResources::default();
        flattened.add(&main);
        add_networks(&mut flattened.networks, &self.shared.networks);

        ComparableResources {
            flattened,
            shared: self.shared.clone(),
        }
    }
}

impl Allocation {
    pub fn comparable_resources(&self) -> ComparableResources {
        self.allocated_resources.comparable()
    }
}

// ── Node ──────────────────────────────────────────────────────────

impl Node {
    /// Total node capacity. Reservable cores appear as the core set.
    pub fn comparable_resources(&self) -> ComparableResources {
        let r = &self.resources;
        ComparableResources {
            flattened: AllocatedTaskResources {
                cpu: AllocatedCpuResources {
                    cpu_shares: r.cpu_shares,
                    reserved_cores: r.reservable_cores.clone(),
                },
                memory: AllocatedMemoryResources {
                    memory_mb: r.memory_mb,
                    memory_max_mb: r.memory_max_mb,
                },
                networks: r.networks.clone(),
                devices: Vec::new(),
            },
            shared: AllocatedSharedResources {
                disk_mb: r.disk_mb,
                ..Default::default()
            },
        }
    }

    /// Resources held back for the node itself. Carries no networks.
    pub fn comparable_reserved_resources(&self) -> ComparableResources {
        let r = &self.reserved;
        ComparableResources {
            flattened: AllocatedTaskResources {
                cpu: AllocatedCpuResources {
                    cpu_shares: r.cpu_shares,
                    reserved_cores: r.reserved_cores.clone(),
                },
                memory: AllocatedMemoryResources {
                    memory_mb: r.memory_mb,
                    memory_max_mb: 0,
                },
                ..Default::default()
            },
            shared: AllocatedSharedResources {
                disk_mb: r.disk_mb,
                ..Default::default()
            },
        }
    }

    /// Capacity minus reservations: what allocations may consume.
    pub fn available_resources(&self) -> ComparableResources {
        let mut available = self.comparable_resources();
        available.subtract(&self.comparable_reserved_resources());
        available
    }
}

/// Subtract without going negative. Going negative means the caller's
/// accounting is already inconsistent.
fn non_negative_sub(lhs: i64, rhs: i64, what: &str) -> i64 {
    debug_assert!(lhs >= rhs, "{what} would go negative: {lhs} - {rhs}");
    (lhs - rhs).max(0)
}
