//! Host side of Etherbone: links, device handles, SDB discovery and the bus transaction engine.

pub mod access;
pub mod device;
pub mod engine;
pub mod link;
pub mod net;
pub mod plan;
pub mod sim;
pub mod target;
mod timeout;
pub mod topology;

pub use access::{Access, AccessMode, MaskOp};
pub use engine::{BusEngine, EngineConfig, EtherboneEngine};
pub use etherbone_wire;
pub use link::{Connector, Link, LinkError};
pub use net::NetConnector;
pub use target::{NetworkTarget, Proto};
pub use timeout::Timeout;

use etherbone_wire::DataWidth;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{actual:?} access passed to the {expected:?} path")]
    InvalidOperation {
        expected: AccessMode,
        actual: AccessMode,
    },
    #[error("Failed to open transport to {target}: {reason}")]
    TransportOpenFailed { target: String, reason: String },
    #[error("Failed to open Etherbone device after {attempts} attempt(s): {reason}")]
    DeviceOpenFailed { attempts: u32, reason: String },
    #[error("SDB lookup failed: {0}")]
    TopologyScanFailed(String),
    #[error("Failed to build cycle: {0}")]
    CycleOpenFailed(String),
    #[error("Cycle failed: {0}")]
    CycleFailed(String),
    #[error("Failed to close transport: {0}")]
    TransportCloseFailed(String),
    #[error("No usable operand size to carry {size} at {address:#x}")]
    SizeNotSupported { size: DataWidth, address: u64 },
    #[error("{size} access at {address:#x} is not aligned to its size")]
    Misaligned { size: DataWidth, address: u64 },
    #[error("Byte order of the slave at {address:#x} is unknown")]
    UnknownEndianness { address: u64 },
    #[error("Timeout")]
    Timeout,
    #[error("{0}")]
    Parse(String),
}

impl From<LinkError> for Error {
    fn from(value: LinkError) -> Self {
        match value {
            LinkError::Timeout => Error::Timeout,
            other => Error::CycleFailed(other.to_string()),
        }
    }
}
