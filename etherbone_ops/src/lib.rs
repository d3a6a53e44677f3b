//! Named register operations on top of [etherbone_host].
//!
//! An [Operation] is a list of [Access] templates, each with a [ParamConfig] telling which fields
//! its caller has to fill in. Operations are grouped into a [Device], devices into a [System].

mod bind;
mod device;
mod operation;
mod params;
mod system;

pub use bind::bind;
pub use device::Device;
pub use etherbone_host;
pub use etherbone_host::{Access, AccessMode, BusEngine, MaskOp};
pub use operation::{ExecutePolicy, MismatchPolicy, Operation, RetryPolicy, Step};
pub use params::{ParamAccess, ParamConfig, ParamFields, ParamOperation};
pub use system::System;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("access {index}: required fields {required} but caller gave {given}")]
    ParameterMismatch {
        index: usize,
        required: ParamFields,
        given: ParamFields,
    },
    #[error("'{operation}' has {expected} accesses but {given} parameter sets were given")]
    ParameterCount {
        operation: String,
        expected: usize,
        given: usize,
    },
    #[error("access {index}: mask choice {choice} out of {len}")]
    MaskIndexOutOfRange {
        index: usize,
        choice: usize,
        len: usize,
    },
    #[error("access {index}: offset choice {choice} out of {len}")]
    OffsetIndexOutOfRange {
        index: usize,
        choice: usize,
        len: usize,
    },
    #[error("bad network address '{address}': {reason}")]
    InvalidNetAddress { address: String, reason: String },
    #[error("device '{device}' has no operation '{operation}'")]
    OperationNotFound { device: String, operation: String },
    #[error("no device '{0}'")]
    DeviceNotFound(String),
    #[error("device '{device}' already has an operation '{operation}'")]
    DuplicateOperation { device: String, operation: String },
    #[error("device '{0}' already registered")]
    DuplicateDevice(String),
    #[error("'{operation}' access {index} failed after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        index: usize,
        attempts: u32,
        #[source]
        source: etherbone_host::Error,
    },
}

impl Error {
    /// Attach the position of the failing access within its operation.
    pub fn at(self, index: usize) -> Self {
        match self {
            Error::ParameterMismatch {
                required, given, ..
            } => Error::ParameterMismatch {
                index,
                required,
                given,
            },
            Error::MaskIndexOutOfRange { choice, len, .. } => Error::MaskIndexOutOfRange {
                index,
                choice,
                len,
            },
            Error::OffsetIndexOutOfRange { choice, len, .. } => Error::OffsetIndexOutOfRange {
                index,
                choice,
                len,
            },
            other => other,
        }
    }

    /// Bus kept failing. Callers are expected to stop, not to carry on with the next operation.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::RetriesExhausted { .. })
    }

    pub fn is_lookup_miss(&self) -> bool {
        matches!(
            self,
            Error::OperationNotFound { .. } | Error::DeviceNotFound(_)
        )
    }
}
