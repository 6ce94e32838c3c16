//! Error types for node-fit evaluation.
//!
//! These cover caller-supplied input that is rejected outright. A valid
//! node and allocation set that simply does not fit is not an error; it is
//! reported through [`FitOutcome`](crate::fit::FitOutcome).

use thiserror::Error;

/// Result type alias for fit operations.
pub type FitResult<T> = Result<T, FitError>;

/// Top-level error for the fit library.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("bitmap size must be a positive multiple of 8, got {0}")]
    InvalidBitmapSize(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    PortRange(#[from] PortRangeError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Errors produced while parsing a port specification such as `"80,100-200"`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PortRangeError {
    #[error("can't specify empty port")]
    EmptyPort,

    #[error("invalid port number {0:?}")]
    InvalidNumber(String),

    #[error("port must be > 0")]
    ZeroPort,

    #[error("port must be <= {max} but found {found}")]
    PortTooLarge { max: u64, found: u64 },

    #[error("invalid range: ending value ({end}) less than starting value ({start})")]
    InvalidRange { start: u64, end: u64 },

    #[error("can only parse single port numbers or port ranges (ex. 80,100-120,150), got {0:?}")]
    MalformedToken(String),
}

/// Errors produced by the network index.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("invalid port {port} for {label:?} (out of range)")]
    InvalidPort { label: String, port: u16 },

    #[error("reserved port collision: {port} ({label:?} on host network {host_network:?})")]
    PortCollision {
        label: String,
        port: u16,
        host_network: String,
    },

    #[error("dynamic port selection failed for host network {0:?}")]
    DynamicPortsExhausted(String),

    #[error("invalid reserved port spec {spec:?}: {source}")]
    ReservedPortSpec {
        spec: String,
        #[source]
        source: PortRangeError,
    },

    #[error("node reserved port {port} collides on host network {host_network:?}")]
    NodeReservedCollision { port: u16, host_network: String },
}
