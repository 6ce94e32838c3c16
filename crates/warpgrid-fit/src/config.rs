//! Fit evaluator configuration (`warpfit.toml`).
//!
//! ```toml
//! [dynamic_ports]
//! min = 20000
//! max = 32000
//!
//! [pool]
//! max_idle = 64
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FitError, FitResult};

/// Default lower bound of the dynamic port range.
pub const DEFAULT_DYNAMIC_PORT_MIN: u16 = 20000;
/// Default upper bound of the dynamic port range.
pub const DEFAULT_DYNAMIC_PORT_MAX: u16 = 32000;
/// Default number of idle network indexes kept by a pool.
pub const DEFAULT_POOL_MAX_IDLE: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitConfig {
    pub dynamic_ports: PortRange,
    pub pool: PoolConfig,
}

/// Inclusive range dynamic ports are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            min: DEFAULT_DYNAMIC_PORT_MIN,
            max: DEFAULT_DYNAMIC_PORT_MAX,
        }
    }
}

impl PortRange {
    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Idle network indexes retained for reuse.
    pub max_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: DEFAULT_POOL_MAX_IDLE,
        }
    }
}

impl FitConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_toml_str(&content)?)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: FitConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> FitResult<()> {
        let PortRange { min, max } = self.dynamic_ports;
        if min == 0 {
            return Err(FitError::InvalidConfig(
                "dynamic_ports.min must be > 0".to_string(),
            ));
        }
        if min > max {
            return Err(FitError::InvalidConfig(format!(
                "dynamic_ports.min ({min}) is greater than dynamic_ports.max ({max})"
            )));
        }
        if self.pool.max_idle == 0 {
            return Err(FitError::InvalidConfig(
                "pool.max_idle must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
