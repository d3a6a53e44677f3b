use etherbone_wire::{DataWidth, Endianness, Format, WidthSet};

use crate::Error;

/// How a logical access of one size is carried by the sizes a slave and link actually support.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Plan {
    /// One operation of the requested size.
    Native { address: u64, format: Format },
    /// Several smaller operations. The first one carries the most significant chunk.
    Fragment {
        chunk: Format,
        count: usize,
        first_address: u64,
        /// Signed address step between consecutive chunks.
        step: i64,
    },
    /// One wider operation, the requested bits sit at `shift` inside the wider word.
    Widen {
        wide: Format,
        aligned: u64,
        shift: u32,
        size: DataWidth,
    },
}

impl Plan {
    /// Choose a plan for `size` bytes at `address`.
    ///
    /// `widths` are the sizes both the slave and the link support, `line` is the link data width.
    /// The address must be a multiple of `size`, otherwise no plan keeps the value inside one bus word.
    pub fn new(
        address: u64,
        size: DataWidth,
        endian: Option<Endianness>,
        widths: WidthSet,
        line: DataWidth,
    ) -> Result<Plan, Error> {
        if address % size.bytes() as u64 != 0 {
            return Err(Error::Misaligned { size, address });
        }
        let widths = widths.intersect(WidthSet::up_to(line));
        if widths.is_empty() {
            return Err(Error::SizeNotSupported { size, address });
        }
        if widths.contains(size) {
            if size != line && endian.is_none() {
                return Err(Error::UnknownEndianness { address });
            }
            return Ok(Plan::Native {
                address,
                format: Format::new(size, endian),
            });
        }
        let Some(endian) = endian else {
            return Err(Error::UnknownEndianness { address });
        };
        if let Some(chunk) = widths.intersect(WidthSet::below(size)).largest() {
            let count = size.bytes() / chunk.bytes();
            let step = chunk.bytes() as u64;
            let (first_address, step) = match endian {
                Endianness::Big => (address, step as i64),
                Endianness::Little => (address + step * (count as u64 - 1), -(step as i64)),
            };
            return Ok(Plan::Fragment {
                chunk: Format::new(chunk, Some(endian)),
                count,
                first_address,
                step,
            });
        }
        let wide = widths
            .smallest_at_least(size)
            .ok_or(Error::SizeNotSupported { size, address })?;
        let aligned = address & !(wide.bytes() as u64 - 1);
        let offset = address - aligned;
        let shift_bytes = match endian {
            Endianness::Big => (wide.bytes() - size.bytes()) as u64 - offset,
            Endianness::Little => offset,
        };
        Ok(Plan::Widen {
            wide: Format::new(wide, Some(endian)),
            aligned,
            shift: (shift_bytes * 8) as u32,
            size,
        })
    }

    /// Addresses and formats of every bus operation this plan issues.
    pub fn operations(&self) -> Vec<(u64, Format)> {
        match *self {
            Plan::Native { address, format } => vec![(address, format)],
            Plan::Fragment {
                chunk,
                count,
                first_address,
                step,
            } => (0..count)
                .map(|i| (first_address.wrapping_add_signed(step * i as i64), chunk))
                .collect(),
            Plan::Widen { wide, aligned, .. } => vec![(aligned, wide)],
        }
    }

    /// Combine the values read by [Plan::operations] into the requested value.
    pub fn assemble(&self, parts: &[u64]) -> u64 {
        match *self {
            Plan::Native { .. } => parts.first().copied().unwrap_or(0),
            Plan::Fragment { chunk, .. } => parts.iter().fold(0u64, |acc, part| {
                acc.checked_shl(chunk.size.bits()).unwrap_or(0) | (part & chunk.size.value_mask())
            }),
            Plan::Widen { shift, size, .. } => {
                parts.first().map_or(0, |w| (w >> shift) & size.value_mask())
            }
        }
    }

    /// Split `value` into the chunk values written by a fragmented plan, most significant first.
    pub fn split(&self, value: u64) -> Vec<u64> {
        match *self {
            Plan::Fragment { chunk, count, .. } => (0..count)
                .map(|i| {
                    let shift = chunk.size.bits() * (count - 1 - i) as u32;
                    (value >> shift) & chunk.size.value_mask()
                })
                .collect(),
            Plan::Native { format, .. } => vec![value & format.size.value_mask()],
            Plan::Widen { size, .. } => vec![value & size.value_mask()],
        }
    }

    /// Put `value` into the wide word of a widened plan, keeping every other bit of `word`.
    pub fn merge(&self, word: u64, value: u64) -> u64 {
        match *self {
            Plan::Widen { shift, size, .. } => {
                let mask = size.value_mask() << shift;
                (word & !mask) | ((value & size.value_mask()) << shift)
            }
            _ => value,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Plan::Native { .. } => "native",
            Plan::Fragment { .. } => "fragment",
            Plan::Widen { .. } => "widen",
        }
    }
}
