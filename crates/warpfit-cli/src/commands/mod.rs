pub mod assign;
pub mod fit;
pub mod ports;
pub mod reschedule;

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use warpgrid_fit::FitConfig;

pub fn load_config(path: Option<&Path>) -> anyhow::Result<FitConfig> {
    match path {
        Some(path) => FitConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(FitConfig::default()),
    }
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}
