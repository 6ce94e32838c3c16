use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use warpgrid_fit::Allocation;
use warpgrid_fit::reschedule::duration_str;

use super::read_json;

#[derive(Debug, Serialize)]
pub struct RescheduleReport {
    pub alloc_id: String,
    /// Unix seconds; zero when the allocation has no usable policy.
    pub next_reschedule_at: u64,
    pub eligible: bool,
    pub delay: String,
}

pub fn plan(alloc: &Allocation, now: SystemTime) -> RescheduleReport {
    let (at, eligible) = alloc.next_reschedule_time(now);
    RescheduleReport {
        alloc_id: alloc.id.clone(),
        next_reschedule_at: at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
        eligible,
        delay: duration_str::format(alloc.next_delay(now)),
    }
}

pub fn reschedule(alloc_path: &Path, now: Option<u64>, format: &str) -> anyhow::Result<()> {
    let alloc: Allocation = read_json(alloc_path)?;
    let now = match now {
        Some(secs) => UNIX_EPOCH + Duration::from_secs(secs),
        None => SystemTime::now(),
    };

    let report = plan(&alloc, now);

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            let verdict = if report.eligible { "eligible" } else { "not eligible" };
            println!("Allocation {}: {verdict}", report.alloc_id);
            println!("  Delay:   {}", report.delay);
            println!("  Next at: {} (unix)", report.next_reschedule_at);
        }
    }
    Ok(())
}
