use crate::packet::{Cursor, Layout};
use crate::{Error, MAX_RECORD_OPS};

/// Flags in the first byte of a record header.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RecordFlags(u8);

impl RecordFlags {
    /// Base return address is in config space, replies are config writes.
    pub const BCA: RecordFlags = RecordFlags(0x80);
    /// Read addresses are in config space.
    pub const RCA: RecordFlags = RecordFlags(0x40);
    /// Reads target a FIFO, the address does not advance.
    pub const RFF: RecordFlags = RecordFlags(0x20);
    /// Drop the Wishbone cycle line after this record.
    pub const CYC: RecordFlags = RecordFlags(0x08);
    /// Write address is in config space.
    pub const WCA: RecordFlags = RecordFlags(0x04);
    /// Writes target a FIFO, the address does not advance.
    pub const WFF: RecordFlags = RecordFlags(0x02);

    pub const fn empty() -> Self {
        RecordFlags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        RecordFlags(bits & 0xEE)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: RecordFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: RecordFlags) -> Self {
        RecordFlags(self.0 | other.0)
    }

    pub fn set(&mut self, other: RecordFlags, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

/// One Etherbone record: up to 255 writes followed by up to 255 reads sharing one byte enable mask.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Record {
    pub flags: RecordFlags,
    pub select: u8,
    /// First write address, following writes advance by the data width unless `WFF` is set.
    pub write_base: u64,
    pub writes: Vec<u64>,
    /// Where the remote end sends the read data back to.
    pub read_base: u64,
    pub reads: Vec<u64>,
}

impl Record {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.reads.is_empty()
    }

    pub fn encoded_len(&self, layout: Layout) -> usize {
        let slot = layout.slot();
        let mut len = layout.header_len();
        if !self.writes.is_empty() {
            len += slot * (1 + self.writes.len());
        }
        if !self.reads.is_empty() {
            len += slot * (1 + self.reads.len());
        }
        len
    }

    pub(crate) fn encode(&self, layout: Layout, out: &mut Vec<u8>) -> Result<(), Error> {
        if self.writes.len() > MAX_RECORD_OPS || self.reads.len() > MAX_RECORD_OPS {
            return Err(Error::TooManyOperations(
                self.writes.len().max(self.reads.len()),
            ));
        }
        let start = out.len();
        out.extend_from_slice(&[
            self.flags.bits(),
            self.select,
            self.writes.len() as u8,
            self.reads.len() as u8,
        ]);
        out.resize(start + layout.header_len(), 0);
        if !self.writes.is_empty() {
            layout.write_address(out, self.write_base)?;
            for value in &self.writes {
                layout.write_data(out, *value)?;
            }
        }
        if !self.reads.is_empty() {
            layout.write_address(out, self.read_base)?;
            for address in &self.reads {
                layout.write_address(out, *address)?;
            }
        }
        Ok(())
    }

    /// Decode the next record. Returns `None` for an all-zero padding record.
    pub(crate) fn decode(layout: Layout, rd: &mut Cursor<'_>) -> Result<Option<Record>, Error> {
        let header = rd.take(layout.header_len())?;
        let (flags, select, wcount, rcount) = (header[0], header[1], header[2], header[3]);
        if flags == 0 && select == 0 && wcount == 0 && rcount == 0 {
            return Ok(None);
        }
        let mut record = Record {
            flags: RecordFlags::from_bits(flags),
            select,
            ..Default::default()
        };
        if wcount > 0 {
            record.write_base = rd.read_slot(layout.slot())?;
            record.writes = (0..wcount)
                .map(|_| rd.read_slot(layout.slot()))
                .collect::<Result<_, _>>()?;
        }
        if rcount > 0 {
            record.read_base = rd.read_slot(layout.slot())?;
            record.reads = (0..rcount)
                .map(|_| rd.read_slot(layout.slot()))
                .collect::<Result<_, _>>()?;
        }
        Ok(Some(record))
    }
}
