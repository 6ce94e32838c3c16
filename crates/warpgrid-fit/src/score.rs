//! Fit scoring.
//!
//! Both disciplines are built on `T = 10^free_cpu + 10^free_mem`, which
//! ranges from 2 (node full) to 20 (node empty). The exponent makes a
//! node that is nearly full in one dimension score noticeably better
//! than one that is half full in both.

use crate::resources::ComparableResources;
use crate::types::Node;

/// Highest score either discipline produces.
pub const MAX_FIT_SCORE: f64 = 18.0;

/// Fraction of the node's unreserved CPU and memory left free by `used`.
///
/// A node with no unreserved capacity in a dimension reports 0 free.
pub fn free_percentage(node: &Node, used: &ComparableResources) -> (f64, f64) {
    let free = |total: i64, reserved: i64, used: i64| {
        let avail = total - reserved;
        if avail <= 0 {
            return 0.0;
        }
        1.0 - used as f64 / avail as f64
    };

    let cpu = free(
        node.resources.cpu_shares,
        node.reserved.cpu_shares,
        used.flattened.cpu.cpu_shares,
    );
    let mem = free(
        node.resources.memory_mb,
        node.reserved.memory_mb,
        used.flattened.memory.memory_mb,
    );
    (cpu, mem)
}

fn total(node: &Node, used: &ComparableResources) -> f64 {
    let (free_cpu, free_mem) = free_percentage(node, used);
    10f64.powf(free_cpu) + 10f64.powf(free_mem)
}

/// Score favouring tightly packed nodes. 18 when full, 0 when empty.
pub fn score_fit_bin_pack(node: &Node, used: &ComparableResources) -> f64 {
    (20.0 - total(node, used)).clamp(0.0, MAX_FIT_SCORE)
}

/// Score favouring lightly loaded nodes. 18 when empty, 0 when full.
pub fn score_fit_spread(node: &Node, used: &ComparableResources) -> f64 {
    (total(node, used) - 2.0).clamp(0.0, MAX_FIT_SCORE)
}
