use crate::width::{DataWidth, Endianness};
use crate::Error;

/// Operand size and byte order of a single bus operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Format {
    pub size: DataWidth,
    pub endian: Option<Endianness>,
}

impl Format {
    pub const fn new(size: DataWidth, endian: Option<Endianness>) -> Self {
        Format { size, endian }
    }

    /// Full bus width operation, byte order does not matter.
    pub const fn full(bus: DataWidth) -> Self {
        Format {
            size: bus,
            endian: None,
        }
    }
}

/// Where an operation lands on a bus of a given data width.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Lane {
    /// Bus address, aligned down to the bus width.
    pub address: u64,
    /// Byte enable mask, bit N covers data bits 8N+7..8N.
    pub select: u8,
    /// Bit shift from the operand to its position in the bus word.
    pub shift: u32,
}

impl Lane {
    /// Compute aligned address, byte enables and shift for `format` at `address` on a `bus` wide link.
    pub fn locate(address: u64, format: Format, bus: DataWidth) -> Result<Lane, Error> {
        let size = format.size.bytes() as u64;
        let width = bus.bytes() as u64;
        if size > width {
            return Err(Error::OperandWiderThanBus {
                size: format.size,
                bus,
            });
        }
        let aligned = address & !(width - 1);
        let offset = address - aligned;
        if offset % size != 0 {
            return Err(Error::Misaligned { address, size: format.size });
        }
        let shift_bytes = if size == width {
            0
        } else {
            match format.endian {
                Some(Endianness::Big) => width - size - offset,
                Some(Endianness::Little) => offset,
                None => return Err(Error::EndiannessRequired),
            }
        };
        let select = (((1u16 << size) - 1) << shift_bytes) as u8;
        Ok(Lane {
            address: aligned,
            select,
            shift: (shift_bytes * 8) as u32,
        })
    }

    /// Place an operand into its lanes, bits outside of the operand size are dropped.
    pub fn insert(&self, format: Format, value: u64) -> u64 {
        (value & format.size.value_mask()) << self.shift
    }

    /// Pull an operand out of a bus word.
    pub fn extract(&self, format: Format, word: u64) -> u64 {
        (word >> self.shift) & format.size.value_mask()
    }
}

/// Expand a byte enable mask into a bit mask over the data word.
pub fn select_to_mask(select: u8) -> u64 {
    (0..8)
        .filter(|lane| select & (1 << lane) != 0)
        .fold(0u64, |acc, lane| acc | (0xFFu64 << (lane * 8)))
}
