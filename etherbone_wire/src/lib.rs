//! Etherbone packet and SDB record codec.
//!
//! No I/O here, see `etherbone_host` for links and the transaction engine.

pub mod header;
pub mod lane;
pub mod packet;
pub mod record;
pub mod sdb;
pub mod width;

pub use header::{Header, HeaderFlags};
pub use lane::{Format, Lane, select_to_mask};
pub use packet::{Layout, Packet};
pub use record::{Record, RecordFlags};
pub use width::{DataWidth, Endianness, WidthSet};

pub const MAGIC: u16 = 0x4E6F;
pub const VERSION: u8 = 1;
pub const PROBE_PACKET_LEN: usize = 8;
pub const MAX_RECORD_OPS: usize = 255;
pub const DEFAULT_PORT: u16 = 60368;

/// Config space: error shift register, one bit per bus operation, newest in bit 0.
pub const CONFIG_ERROR_REGISTER: u64 = 0x00;
/// Config space: 64-bit address of the root SDB table.
pub const CONFIG_SDB_ADDRESS: u64 = 0x08;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Not an Etherbone packet, magic {0:#06x}")]
    BadMagic(u16),
    #[error("Unsupported Etherbone version {0}")]
    UnsupportedVersion(u8),
    #[error("Header must carry exactly one address and one data width, got {address:?} and {data:?}")]
    InvalidWidths { address: WidthSet, data: WidthSet },
    #[error("Packet is truncated")]
    Truncated,
    #[error("Record would carry {0} operations, at most 255 fit")]
    TooManyOperations(usize),
    #[error("Address {address:#x} does not fit into {width}")]
    AddressOverflow { address: u64, width: DataWidth },
    #[error("Value {value:#x} does not fit into {width}")]
    ValueOverflow { value: u64, width: DataWidth },
    #[error("Expected a data packet, got a probe")]
    UnexpectedProbe,
    #[error("Expected a probe response")]
    NotProbeResponse,
    #[error("Bad SDB magic {0:#010x}")]
    BadSdbMagic(u32),
    #[error("{size} operand is wider than the {bus} bus")]
    OperandWiderThanBus { size: DataWidth, bus: DataWidth },
    #[error("Address {address:#x} is not aligned to {size}")]
    Misaligned { address: u64, size: DataWidth },
    #[error("Partial width operation needs a known endianness")]
    EndiannessRequired,
}
