//! warpgrid-fit: node fit evaluation and bin-packing scores.
//!
//! Decides whether a set of allocations can share one node, names the
//! resource that rules a placement out, and scores nodes that do fit.
//! Also computes when a failed allocation may be rescheduled.
//!
//! # Architecture
//!
//! ```text
//! allocs_fit(node, allocs)
//!   ├── ComparableResources (fold allocations, check node superset)
//!   ├── NetworkIndex (from NetworkIndexPool)
//!   │     ├── Bitmap per host network
//!   │     └── parse_port_ranges (node reserved ports)
//!   └── DeviceAccounter (optional)
//!
//! score_fit_bin_pack / score_fit_spread (node, used)
//! Allocation::next_reschedule_time(now)
//! ```
//!
//! Placement failures are reported through [`FitOutcome`]; only malformed
//! input surfaces as an error.

pub mod bitmap;
pub mod config;
pub mod devices;
pub mod error;
pub mod fit;
pub mod network;
pub mod ports;
pub mod reschedule;
pub mod resources;
pub mod score;
pub mod types;

pub use bitmap::Bitmap;
pub use config::{FitConfig, PoolConfig, PortRange};
pub use devices::DeviceAccounter;
pub use error::{FitError, FitResult, NetworkError, PortRangeError};
pub use fit::{FitDimension, FitOutcome, allocs_fit, allocs_fit_with_pool};
pub use network::{NetworkIndex, NetworkIndexPool, PoolStats, PooledNetworkIndex};
pub use ports::{MAX_VALID_PORT, parse_port_ranges};
pub use reschedule::{DelayFunction, RescheduleEvent, ReschedulePolicy, RescheduleTracker};
pub use resources::ComparableResources;
pub use score::{free_percentage, score_fit_bin_pack, score_fit_spread};
pub use types::*;
