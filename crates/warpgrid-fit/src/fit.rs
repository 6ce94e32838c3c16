//! Node fit evaluation.
//!
//! Decides whether a set of allocations can coexist on one node. A
//! rejection names the dimension that failed; it is an expected outcome
//! for the scheduler, not an error.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::devices::DeviceAccounter;
use crate::network::{NetworkIndex, NetworkIndexPool};
use crate::resources::ComparableResources;
use crate::types::*;

/// The resource dimension a placement failed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitDimension {
    Cpu,
    Cores,
    Memory,
    MemoryMax,
    Disk,
    Network,
    BandwidthExceeded,
    DeviceOversubscribed,
    /// Node reserved ports could not be installed. Carries the reason.
    ReservedNodePortCollision(String),
    /// Two allocations (or an allocation and the node) claim one port.
    ReservedAllocPortCollision(String),
}

impl fmt::Display for FitDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cores => f.write_str("cores"),
            Self::Memory => f.write_str("memory"),
            Self::MemoryMax => f.write_str("memory_max"),
            Self::Disk => f.write_str("disk"),
            Self::Network => f.write_str("network"),
            Self::BandwidthExceeded => f.write_str("bandwidth exceeded"),
            Self::DeviceOversubscribed => f.write_str("device oversubscribed"),
            Self::ReservedNodePortCollision(reason) => {
                write!(f, "reserved node port collision: {reason}")
            }
            Self::ReservedAllocPortCollision(reason) => {
                write!(f, "reserved alloc port collision: {reason}")
            }
        }
    }
}

impl Serialize for FitDimension {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Result of a fit evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FitOutcome {
    /// `None` when everything fits.
    pub dimension: Option<FitDimension>,
    /// Resources consumed by the non-terminal allocations.
    pub used: ComparableResources,
}

impl FitOutcome {
    pub fn fits(&self) -> bool {
        self.dimension.is_none()
    }

    /// The dimension as its canonical string; empty when it fits.
    pub fn dimension_str(&self) -> String {
        self.dimension
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

/// Check whether `allocs` fit on `node`.
///
/// When `net_idx` is given it must already describe the node and the
/// allocations; only its bandwidth is checked. Otherwise an index is
/// drawn from the global pool, filled, and returned before this call
/// ends.
pub fn allocs_fit(
    node: &Node,
    allocs: &[Allocation],
    net_idx: Option<&mut NetworkIndex>,
    check_devices: bool,
) -> FitOutcome {
    allocs_fit_with_pool(NetworkIndexPool::global(), node, allocs, net_idx, check_devices)
}

/// Like [`allocs_fit`], drawing any index it needs from `pool`.
pub fn allocs_fit_with_pool(
    pool: &NetworkIndexPool,
    node: &Node,
    allocs: &[Allocation],
    net_idx: Option<&mut NetworkIndex>,
    check_devices: bool,
) -> FitOutcome {
    let mut used = ComparableResources::default();
    let mut cores = BTreeSet::new();
    let mut core_overlap = false;

    for alloc in allocs {
        if alloc.is_client_terminal() {
            continue;
        }
        let cr = alloc.comparable_resources();
        for core in &cr.flattened.cpu.reserved_cores {
            if !cores.insert(*core) {
                core_overlap = true;
            }
        }
        used.add(&cr);
    }

    let reject = |dimension: FitDimension, used: ComparableResources| {
        debug!(node = %node.id, dimension = %dimension, "allocations do not fit");
        FitOutcome {
            dimension: Some(dimension),
            used,
        }
    };

    if core_overlap {
        return reject(FitDimension::Cores, used);
    }

    if let Err(dimension) = node.available_resources().superset(&used) {
        return reject(dimension, used);
    }

    // The pooled guard lives until the end of this function and returns
    // the index on every path.
    let mut pooled;
    let net_idx = match net_idx {
        Some(idx) => idx,
        None => {
            pooled = pool.acquire();
            if let Err(e) = pooled.set_node(node) {
                return reject(FitDimension::ReservedNodePortCollision(e.to_string()), used);
            }
            if let Err(e) = pooled.add_allocs(allocs) {
                return reject(FitDimension::ReservedAllocPortCollision(e.to_string()), used);
            }
            &mut *pooled
        }
    };

    if net_idx.overcommitted() {
        return reject(FitDimension::BandwidthExceeded, used);
    }

    if check_devices {
        let mut accounter = DeviceAccounter::new(node);
        if accounter.add_allocs(allocs) {
            return reject(FitDimension::DeviceOversubscribed, used);
        }
    }

    FitOutcome {
        dimension: None,
        used,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_node() -> Node {
        Node {
            id: "node-1".into(),
            resources: NodeResources {
                cpu_shares: 4000,
                reservable_cores: (0..4).collect(),
                memory_mb: 8192,
                disk_mb: 102400,
                networks: vec![NetworkResource::on_device("eth0", 1000)],
                ..Default::default()
            },
            reserved: NodeReservedResources {
                cpu_shares: 100,
                memory_mb: 256,
                disk_mb: 4096,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn make_alloc(id: &str, cpu: i64, mem: i64, disk: i64) -> Allocation {
        let mut alloc = Allocation {
            id: id.into(),
            client_status: ClientStatus::Running,
            ..Default::default()
        };
        alloc.allocated_resources.tasks.insert(
            "web".into(),
            AllocatedTaskResources {
                cpu: AllocatedCpuResources {
                    cpu_shares: cpu,
                    ..Default::default()
                },
                memory: AllocatedMemoryResources {
                    memory_mb: mem,
                    memory_max_mb: 0,
                },
                ..Default::default()
            },
        );
        alloc.allocated_resources.shared.disk_mb = disk;
        alloc
    }

    #[test]
    fn dimension_strings_are_canonical() {
        assert_eq!(FitDimension::MemoryMax.to_string(), "memory_max");
        assert_eq!(FitDimension::BandwidthExceeded.to_string(), "bandwidth exceeded");
        assert_eq!(
            FitDimension::ReservedAllocPortCollision("x".into()).to_string(),
            "reserved alloc port collision: x"
        );
        assert_eq!(
            serde_json::to_string(&FitDimension::DeviceOversubscribed).unwrap(),
            "\"device oversubscribed\""
        );
    }

    #[test]
    fn empty_alloc_set_fits() {
        let out = allocs_fit(&make_node(), &[], None, true);
        assert!(out.fits());
        assert_eq!(out.dimension_str(), "");
        assert_eq!(out.used, ComparableResources::default());
    }

    #[test]
    fn client_terminal_allocs_are_skipped() {
        let mut big = make_alloc("big", 10_000, 10, 10);
        big.client_status = ClientStatus::Complete;
        let out = allocs_fit(&make_node(), &[big, make_alloc("a", 1000, 100, 100)], None, false);
        assert!(out.fits());
        assert_eq!(out.used.flattened.cpu.cpu_shares, 1000);
    }

    #[test]
    fn reports_memory_dimension() {
        let out = allocs_fit(&make_node(), &[make_alloc("a", 100, 9000, 10)], None, false);
        assert_eq!(out.dimension, Some(FitDimension::Memory));
    }

    #[test]
    fn bandwidth_on_unnamed_device_is_exceeded() {
        let mut node = make_node();
        node.resources.networks.clear();
        let mut alloc = make_alloc("a", 100, 100, 10);
        alloc.allocated_resources.shared.networks.push(NetworkResource {
            mbits: 5000,
            ..Default::default()
        });

        let out = allocs_fit(&node, &[alloc], None, false);
        assert_eq!(out.dimension, Some(FitDimension::BandwidthExceeded));
    }

    #[test]
    fn core_outside_reservable_set_reports_cores() {
        let mut a = make_alloc("a", 100, 100, 10);
        a.allocated_resources
            .tasks
            .get_mut("web")
            .unwrap()
            .cpu
            .reserved_cores
            .insert(7);
        let out = allocs_fit(&make_node(), &[a], None, false);
        assert_eq!(out.dimension, Some(FitDimension::Cores));
    }

    #[test]
    fn node_reserved_port_spec_error_is_reported() {
        let mut node = make_node();
        node.reserved.reserved_host_ports = "abc".into();
        let out = allocs_fit(&node, &[], None, false);
        assert!(
            out.dimension_str().starts_with("reserved node port collision: "),
            "{}",
            out.dimension_str()
        );
    }

    #[test]
    fn supplied_index_is_used_as_is() {
        let node = make_node();
        let mut idx = NetworkIndex::new();
        idx.set_node(&node).unwrap();
        let mut hog = make_alloc("hog", 10, 10, 10);
        hog.allocated_resources
            .shared
            .networks
            .push(NetworkResource::on_device("eth0", 2000));
        idx.add_allocs(std::slice::from_ref(&hog)).unwrap();

        // The allocation list itself carries no bandwidth.
        let out = allocs_fit(&node, &[make_alloc("a", 10, 10, 10)], Some(&mut idx), false);
        assert_eq!(out.dimension, Some(FitDimension::BandwidthExceeded));
        assert_eq!(idx.used_bandwidth("eth0"), 2000);
    }

    #[test]
    fn pooled_index_is_returned_on_failure() {
        let pool = NetworkIndexPool::new(4);
        let node = make_node();
        let mut a = make_alloc("a", 10, 10, 10);
        a.allocated_resources.shared.networks.push(NetworkResource {
            device: "eth0".into(),
            reserved_ports: vec![Port::new("http", 80)],
            ..Default::default()
        });
        let b = a.clone();

        let out = allocs_fit_with_pool(&pool, &node, &[a, b], None, false);
        assert!(matches!(
            out.dimension,
            Some(FitDimension::ReservedAllocPortCollision(_))
        ));
        assert_eq!(pool.stats().idle, 1);

        allocs_fit_with_pool(&pool, &node, &[], None, false);
        let stats = pool.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.reused, 1);
    }

    #[test]
    fn device_check_is_optional() {
        let mut a = make_alloc("a", 10, 10, 10);
        a.allocated_resources
            .tasks
            .get_mut("web")
            .unwrap()
            .devices
            .push(AllocatedDeviceResource {
                vendor: "nvidia".into(),
                device_type: "gpu".into(),
                name: "t4".into(),
                device_ids: vec!["gpu-0".into()],
            });

        let node = make_node();
        assert!(allocs_fit(&node, std::slice::from_ref(&a), None, false).fits());
        assert_eq!(
            allocs_fit(&node, &[a], None, true).dimension,
            Some(FitDimension::DeviceOversubscribed)
        );
    }
}
