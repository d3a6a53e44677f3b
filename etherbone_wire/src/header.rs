use crate::width::WidthSet;
use crate::{Error, MAGIC, PROBE_PACKET_LEN, VERSION};

/// Flags carried in the low nibble of the third header byte.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HeaderFlags(u8);

impl HeaderFlags {
    /// Sender will not issue reads, receiver must not wait for them.
    pub const NO_READS: HeaderFlags = HeaderFlags(0x04);
    /// Packet is an answer to a probe.
    pub const PROBE_RESPONSE: HeaderFlags = HeaderFlags(0x02);
    /// Packet is a probe, the receiver must answer with its supported widths.
    pub const PROBE: HeaderFlags = HeaderFlags(0x01);

    pub const fn empty() -> Self {
        HeaderFlags(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        HeaderFlags(bits & 0x07)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: HeaderFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn with(self, other: HeaderFlags) -> Self {
        HeaderFlags(self.0 | other.0)
    }
}

/// Etherbone packet header.
///
/// ```text
///  0      7 8     15 16   19 20 23 24   27 28  31
/// +--------+--------+-------+-----+-------+------+
/// |    magic 0x4E6F | ver=1 |flags| addr  | port |
/// +--------+--------+-------+-----+-------+------+
/// ```
/// `addr` and `port` are width sets. Probes advertise every supported size,
/// data packets carry exactly one negotiated size in each.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Header {
    pub flags: HeaderFlags,
    pub address_widths: WidthSet,
    pub data_widths: WidthSet,
}

impl Header {
    pub const LEN: usize = 4;

    pub fn probe(address_widths: WidthSet, data_widths: WidthSet) -> Self {
        Header {
            flags: HeaderFlags::PROBE,
            address_widths,
            data_widths,
        }
    }

    pub fn probe_response(address_widths: WidthSet, data_widths: WidthSet) -> Self {
        Header {
            flags: HeaderFlags::PROBE_RESPONSE,
            address_widths,
            data_widths,
        }
    }

    pub fn is_probe(&self) -> bool {
        self.flags.contains(HeaderFlags::PROBE)
    }

    pub fn is_probe_response(&self) -> bool {
        self.flags.contains(HeaderFlags::PROBE_RESPONSE)
    }

    pub fn to_bytes(&self) -> [u8; Header::LEN] {
        let magic = MAGIC.to_be_bytes();
        [
            magic[0],
            magic[1],
            (VERSION << 4) | self.flags.bits(),
            (self.address_widths.bits() << 4) | self.data_widths.bits(),
        ]
    }

    /// Write the header and zero padding up to `len` bytes.
    pub(crate) fn write_padded(&self, out: &mut Vec<u8>, len: usize) {
        out.extend_from_slice(&self.to_bytes());
        out.resize(out.len() + len.saturating_sub(Header::LEN), 0);
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < Header::LEN {
            return Err(Error::Truncated);
        }
        let magic = u16::from_be_bytes([bytes[0], bytes[1]]);
        if magic != MAGIC {
            return Err(Error::BadMagic(magic));
        }
        let version = bytes[2] >> 4;
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }
        Ok(Header {
            flags: HeaderFlags::from_bits(bytes[2]),
            address_widths: WidthSet::from_bits(bytes[3] >> 4),
            data_widths: WidthSet::from_bits(bytes[3]),
        })
    }

    /// Probe or probe response, padded to its fixed length.
    pub fn encode_probe(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PROBE_PACKET_LEN);
        self.write_padded(&mut out, PROBE_PACKET_LEN);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn probe_layout() {
        let probe = Header::probe(WidthSet::ALL, WidthSet::from_bits(0x07)).encode_probe();
        assert_eq!(probe, hex!("4E 6F 11 F7 00 00 00 00"));
    }

    #[test]
    fn header_round_trip() {
        let header = Header::probe_response(WidthSet::from_bits(0x04), WidthSet::from_bits(0x06));
        let decoded = Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.is_probe_response());
        assert!(!decoded.is_probe());
    }

    #[test]
    fn rejects_foreign_datagrams() {
        assert_eq!(
            Header::from_bytes(&hex!("DA 7A 63 A1")),
            Err(Error::BadMagic(0xDA7A))
        );
        assert_eq!(
            Header::from_bytes(&hex!("4E 6F 24 44")),
            Err(Error::UnsupportedVersion(2))
        );
        assert_eq!(Header::from_bytes(&hex!("4E 6F")), Err(Error::Truncated));
    }
}
