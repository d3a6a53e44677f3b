use crate::header::{Header, HeaderFlags};
use crate::record::Record;
use crate::width::DataWidth;
use crate::Error;

/// Negotiated address and data widths of a link, which fix the size of every packet field.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Layout {
    pub address: DataWidth,
    pub data: DataWidth,
}

impl Layout {
    pub const fn new(address: DataWidth, data: DataWidth) -> Self {
        Layout { address, data }
    }

    /// Every address and value is padded to this many bytes.
    pub fn slot(&self) -> usize {
        self.address.bytes().max(self.data.bytes())
    }

    /// Packet header and record headers occupy this many bytes.
    pub fn header_len(&self) -> usize {
        self.slot().max(Header::LEN)
    }

    pub fn from_header(header: &Header) -> Result<Self, Error> {
        let single = |set: crate::WidthSet| match (set.largest(), set.smallest()) {
            (Some(l), Some(s)) if l == s => Some(l),
            _ => None,
        };
        match (single(header.address_widths), single(header.data_widths)) {
            (Some(address), Some(data)) => Ok(Layout { address, data }),
            _ => Err(Error::InvalidWidths {
                address: header.address_widths,
                data: header.data_widths,
            }),
        }
    }

    pub fn header(&self, flags: HeaderFlags) -> Header {
        Header {
            flags,
            address_widths: self.address.as_set(),
            data_widths: self.data.as_set(),
        }
    }

    pub(crate) fn write_address(&self, out: &mut Vec<u8>, address: u64) -> Result<(), Error> {
        if address > self.address.max_value() {
            return Err(Error::AddressOverflow {
                address,
                width: self.address,
            });
        }
        self.write_slot(out, address);
        Ok(())
    }

    pub(crate) fn write_data(&self, out: &mut Vec<u8>, value: u64) -> Result<(), Error> {
        if value > self.data.max_value() {
            return Err(Error::ValueOverflow {
                value,
                width: self.data,
            });
        }
        self.write_slot(out, value);
        Ok(())
    }

    fn write_slot(&self, out: &mut Vec<u8>, value: u64) {
        let bytes = value.to_be_bytes();
        let slot = self.slot();
        out.extend_from_slice(&bytes[8 - slot..]);
    }
}

/// Read position over a received packet.
pub(crate) struct Cursor<'i> {
    buf: &'i [u8],
    idx: usize,
}

impl<'i> Cursor<'i> {
    pub(crate) fn new(buf: &'i [u8]) -> Self {
        Cursor { buf, idx: 0 }
    }

    pub(crate) fn bytes_left(&self) -> usize {
        self.buf.len() - self.idx
    }

    pub(crate) fn take(&mut self, len: usize) -> Result<&'i [u8], Error> {
        if self.bytes_left() < len {
            return Err(Error::Truncated);
        }
        let slice = &self.buf[self.idx..self.idx + len];
        self.idx += len;
        Ok(slice)
    }

    pub(crate) fn read_slot(&mut self, slot: usize) -> Result<u64, Error> {
        let bytes = self.take(slot)?;
        Ok(bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64))
    }
}

/// Etherbone data packet: header followed by records.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    pub layout: Layout,
    pub flags: HeaderFlags,
    pub records: Vec<Record>,
}

impl Packet {
    pub fn new(layout: Layout) -> Self {
        Packet {
            layout,
            flags: HeaderFlags::empty(),
            records: Vec::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.layout.header_len()
            + self
                .records
                .iter()
                .map(|r| r.encoded_len(self.layout))
                .sum::<usize>()
    }

    /// Length of the reply a slave sends back: one record per request record that contains reads.
    pub fn reply_len(&self) -> usize {
        let slot = self.layout.slot();
        self.layout.header_len()
            + self
                .records
                .iter()
                .filter(|r| !r.reads.is_empty())
                .map(|r| self.layout.header_len() + slot * (1 + r.reads.len()))
                .sum::<usize>()
    }

    pub fn read_count(&self) -> usize {
        self.records.iter().map(|r| r.reads.len()).sum()
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.layout
            .header(self.flags)
            .write_padded(&mut out, self.layout.header_len());
        for record in &self.records {
            record.encode(self.layout, &mut out)?;
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, Error> {
        let header = Header::from_bytes(bytes)?;
        if header.is_probe() || header.is_probe_response() {
            return Err(Error::UnexpectedProbe);
        }
        let layout = Layout::from_header(&header)?;
        let mut rd = Cursor::new(bytes);
        rd.take(layout.header_len())?;
        let mut records = Vec::new();
        while rd.bytes_left() >= layout.header_len() {
            if let Some(record) = Record::decode(layout, &mut rd)? {
                records.push(record);
            }
        }
        Ok(Packet {
            layout,
            flags: header.flags,
            records,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordFlags;
    use hex_literal::hex;

    fn layout32() -> Layout {
        Layout::new(DataWidth::W32, DataWidth::W32)
    }

    #[test]
    fn write_then_read_record() {
        let mut packet = Packet::new(layout32());
        packet.records.push(Record {
            flags: RecordFlags::CYC,
            select: 0x0F,
            write_base: 0x1000,
            writes: vec![0xDEAD_BEEF],
            read_base: 0,
            reads: vec![0x1004],
        });
        let bytes = packet.encode().unwrap();
        assert_eq!(
            bytes,
            hex!(
                "4E 6F 10 44"
                "08 0F 01 01"
                "00 00 10 00" "DE AD BE EF"
                "00 00 00 00" "00 00 10 04"
            )
        );
        assert_eq!(bytes.len(), packet.encoded_len());
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn narrow_address_on_wide_data_is_padded() {
        let layout = Layout::new(DataWidth::W16, DataWidth::W64);
        assert_eq!(layout.slot(), 8);
        assert_eq!(layout.header_len(), 8);
        let mut packet = Packet::new(layout);
        packet.records.push(Record {
            select: 0xFF,
            reads: vec![0x20],
            ..Default::default()
        });
        let bytes = packet.encode().unwrap();
        assert_eq!(bytes.len(), 8 + 8 + 8 + 8);
        assert_eq!(&bytes[0..4], &hex!("4E 6F 10 28"));
        assert_eq!(&bytes[24..32], &hex!("00 00 00 00 00 00 00 20"));
    }

    #[test]
    fn reply_len_counts_only_reading_records() {
        let mut packet = Packet::new(layout32());
        packet.records.push(Record {
            select: 0x0F,
            write_base: 0x10,
            writes: vec![1, 2, 3],
            ..Default::default()
        });
        packet.records.push(Record {
            select: 0x0F,
            reads: vec![0x10, 0x14],
            ..Default::default()
        });
        assert_eq!(packet.reply_len(), 4 + 4 + 4 * 3);
        assert_eq!(packet.read_count(), 2);
    }

    #[test]
    fn address_overflow() {
        let mut packet = Packet::new(Layout::new(DataWidth::W16, DataWidth::W32));
        packet.records.push(Record {
            select: 0x0F,
            reads: vec![0x1_0000],
            ..Default::default()
        });
        assert!(matches!(
            packet.encode(),
            Err(Error::AddressOverflow { address: 0x1_0000, .. })
        ));
    }

    #[test]
    fn too_many_operations() {
        let mut packet = Packet::new(layout32());
        packet.records.push(Record {
            select: 0x0F,
            reads: vec![0; 256],
            ..Default::default()
        });
        assert_eq!(packet.encode(), Err(Error::TooManyOperations(256)));
    }

    #[test]
    fn truncated_record() {
        let bytes = hex!("4E 6F 10 44" "00 0F 01 00" "00 00 10 00");
        assert_eq!(Packet::decode(&bytes), Err(Error::Truncated));
    }

    #[test]
    fn probe_is_not_a_data_packet() {
        let bytes = hex!("4E 6F 11 F7 00 00 00 00");
        assert_eq!(Packet::decode(&bytes), Err(Error::UnexpectedProbe));
    }
}
