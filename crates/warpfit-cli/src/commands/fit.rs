use std::path::Path;

use serde::Serialize;
use warpgrid_fit::*;

use super::read_json;

#[derive(Debug, Serialize)]
pub struct FitReport {
    pub node_id: String,
    pub fits: bool,
    pub dimension: String,
    pub used: ComparableResources,
    pub free_cpu: f64,
    pub free_memory: f64,
    pub bin_pack_score: f64,
    pub spread_score: f64,
}

pub fn evaluate(
    config: &FitConfig,
    node: &Node,
    allocs: &[Allocation],
    check_devices: bool,
) -> FitReport {
    let pool = NetworkIndexPool::from_config(&config.pool);
    let outcome = allocs_fit_with_pool(&pool, node, allocs, None, check_devices);
    let (free_cpu, free_memory) = free_percentage(node, &outcome.used);

    FitReport {
        node_id: node.id.clone(),
        fits: outcome.fits(),
        dimension: outcome.dimension_str(),
        bin_pack_score: score_fit_bin_pack(node, &outcome.used),
        spread_score: score_fit_spread(node, &outcome.used),
        free_cpu,
        free_memory,
        used: outcome.used,
    }
}

pub fn fit(
    config: &FitConfig,
    node_path: &Path,
    allocs_path: &Path,
    check_devices: bool,
    format: &str,
) -> anyhow::Result<()> {
    let node: Node = read_json(node_path)?;
    let allocs: Vec<Allocation> = read_json(allocs_path)?;
    tracing::info!(node = %node.id, allocs = allocs.len(), "evaluating fit");

    let report = evaluate(config, &node, &allocs, check_devices);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            if report.fits {
                println!("✓ Fits on node {}", report.node_id);
            } else {
                println!("✗ Does not fit on node {}: {}", report.node_id, report.dimension);
            }
            let used = &report.used;
            println!("  CPU:     {} shares ({:.1}% free)", used.flattened.cpu.cpu_shares, report.free_cpu * 100.0);
            println!("  Memory:  {} MB ({:.1}% free)", used.flattened.memory.memory_mb, report.free_memory * 100.0);
            println!("  Disk:    {} MB", used.shared.disk_mb);
            if !used.flattened.cpu.reserved_cores.is_empty() {
                println!("  Cores:   {:?}", used.flattened.cpu.reserved_cores);
            }
            println!("  Bin-pack score: {:.3}", report.bin_pack_score);
            println!("  Spread score:   {:.3}", report.spread_score);
        }
    }

    Ok(())
}
