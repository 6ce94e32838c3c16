use std::path::Path;

use warpgrid_fit::*;

use super::read_json;

/// Build an index for `node` and its allocations, then pick ports for `ask`.
pub fn assign_for(
    config: &FitConfig,
    node: &Node,
    allocs: &[Allocation],
    ask: &NetworkResource,
) -> anyhow::Result<AllocatedPorts> {
    let pool = NetworkIndexPool::from_config(&config.pool);
    let mut idx = pool.acquire_with(config.dynamic_ports);
    idx.set_node(node)?;
    idx.add_allocs(allocs)?;
    Ok(idx.assign_ports(ask)?)
}

pub fn assign(
    config: &FitConfig,
    node_path: &Path,
    allocs_path: Option<&Path>,
    ask_path: &Path,
    format: &str,
) -> anyhow::Result<()> {
    let node: Node = read_json(node_path)?;
    let allocs: Vec<Allocation> = match allocs_path {
        Some(path) => read_json(path)?,
        None => Vec::new(),
    };
    let ask: NetworkResource = read_json(ask_path)?;

    let offer = assign_for(config, &node, &allocs, &ask)?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&offer)?),
        _ => {
            for p in offer.iter() {
                println!(
                    "{:<12} {}:{} -> {} ({})",
                    p.label,
                    if p.host_ip.is_empty() { "*" } else { p.host_ip.as_str() },
                    p.value,
                    p.to,
                    p.host_network(),
                );
            }
        }
    }
    Ok(())
}
