//! Self-Describing Bus records.
//!
//! Every record is 64 bytes, big endian, with the record type in the last byte.
//! A table starts with an interconnect record whose `records` field counts the table length
//! including itself.

use strum_macros::FromRepr;

use crate::width::{Endianness, WidthSet};
use crate::Error;

pub const SDB_MAGIC: u32 = 0x5344_422D;
pub const SDB_RECORD_LEN: usize = 64;
pub const SDB_NAME_LEN: usize = 19;

/// Bit in `bus_specific` of a Wishbone device record, set when the slave is little endian.
pub const BUS_SPECIFIC_LITTLE_ENDIAN: u32 = 0x80;

#[derive(Copy, Clone, Debug, Eq, PartialEq, FromRepr)]
#[repr(u8)]
pub enum RecordType {
    Interconnect = 0x00,
    Device = 0x01,
    Bridge = 0x02,
    Integration = 0x80,
    RepoUrl = 0x81,
    Synthesis = 0x82,
    Empty = 0xFF,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum BusType {
    #[default]
    Wishbone,
    Other(u8),
}

impl BusType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => BusType::Wishbone,
            other => BusType::Other(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            BusType::Wishbone => 0,
            BusType::Other(b) => b,
        }
    }
}

/// Vendor, device and build identification shared by most record kinds.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Product {
    pub vendor_id: u64,
    pub device_id: u32,
    pub version: u32,
    /// BCD encoded `YYYYMMDD`.
    pub date: u32,
    pub name: String,
}

/// Address range claimed by a device, bridge or interconnect.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Component {
    pub addr_first: u64,
    pub addr_last: u64,
    pub product: Product,
}

impl Component {
    pub fn contains(&self, address: u64) -> bool {
        (self.addr_first..=self.addr_last).contains(&address)
    }

    pub fn size(&self) -> u64 {
        self.addr_last.wrapping_sub(self.addr_first).wrapping_add(1)
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Interconnect {
    pub records: u16,
    pub version: u8,
    pub bus_type: BusType,
    pub component: Component,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Device {
    pub abi_class: u16,
    pub abi_ver_major: u8,
    pub abi_ver_minor: u8,
    pub bus_specific: u32,
    pub component: Component,
}

impl Device {
    pub fn widths(&self) -> WidthSet {
        WidthSet::from_bits(self.bus_specific as u8)
    }

    pub fn endian(&self) -> Endianness {
        if self.bus_specific & BUS_SPECIFIC_LITTLE_ENDIAN != 0 {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    pub fn bus_specific_for(widths: WidthSet, endian: Endianness) -> u32 {
        let le = match endian {
            Endianness::Little => BUS_SPECIFIC_LITTLE_ENDIAN,
            Endianness::Big => 0,
        };
        widths.bits() as u32 | le
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bridge {
    /// Address of the child table, relative to the bridge's own bus.
    pub sdb_child: u64,
    pub component: Component,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Synthesis {
    pub syn_name: String,
    pub commit_id: [u8; 16],
    pub tool_name: String,
    pub tool_version: u32,
    pub date: u32,
    pub user_name: String,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SdbRecord {
    Interconnect(Interconnect),
    Device(Device),
    Bridge(Bridge),
    Integration(Product),
    RepoUrl(String),
    Synthesis(Synthesis),
    Empty,
    /// Record type this decoder does not know, kept so a listing can show it.
    Unknown(u8),
}

impl SdbRecord {
    pub fn record_type(&self) -> Option<RecordType> {
        Some(match self {
            SdbRecord::Interconnect(_) => RecordType::Interconnect,
            SdbRecord::Device(_) => RecordType::Device,
            SdbRecord::Bridge(_) => RecordType::Bridge,
            SdbRecord::Integration(_) => RecordType::Integration,
            SdbRecord::RepoUrl(_) => RecordType::RepoUrl,
            SdbRecord::Synthesis(_) => RecordType::Synthesis,
            SdbRecord::Empty => RecordType::Empty,
            SdbRecord::Unknown(_) => return None,
        })
    }

    pub fn component(&self) -> Option<&Component> {
        match self {
            SdbRecord::Interconnect(i) => Some(&i.component),
            SdbRecord::Device(d) => Some(&d.component),
            SdbRecord::Bridge(b) => Some(&b.component),
            _ => None,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<SdbRecord, Error> {
        let rec: &[u8; SDB_RECORD_LEN] = bytes
            .get(..SDB_RECORD_LEN)
            .and_then(|b| b.try_into().ok())
            .ok_or(Error::Truncated)?;
        let ty = rec[SDB_RECORD_LEN - 1];
        let record = match RecordType::from_repr(ty) {
            Some(RecordType::Interconnect) => {
                let magic = be_u32(rec, 0);
                if magic != SDB_MAGIC {
                    return Err(Error::BadSdbMagic(magic));
                }
                SdbRecord::Interconnect(Interconnect {
                    records: u16::from_be_bytes([rec[4], rec[5]]),
                    version: rec[6],
                    bus_type: BusType::from_byte(rec[7]),
                    component: decode_component(rec),
                })
            }
            Some(RecordType::Device) => SdbRecord::Device(Device {
                abi_class: u16::from_be_bytes([rec[0], rec[1]]),
                abi_ver_major: rec[2],
                abi_ver_minor: rec[3],
                bus_specific: be_u32(rec, 4),
                component: decode_component(rec),
            }),
            Some(RecordType::Bridge) => SdbRecord::Bridge(Bridge {
                sdb_child: be_u64(rec, 0),
                component: decode_component(rec),
            }),
            Some(RecordType::Integration) => SdbRecord::Integration(decode_product(rec)),
            Some(RecordType::RepoUrl) => SdbRecord::RepoUrl(text(&rec[..63])),
            Some(RecordType::Synthesis) => {
                let mut commit_id = [0u8; 16];
                commit_id.copy_from_slice(&rec[16..32]);
                SdbRecord::Synthesis(Synthesis {
                    syn_name: text(&rec[0..16]),
                    commit_id,
                    tool_name: text(&rec[32..40]),
                    tool_version: be_u32(rec, 40),
                    date: be_u32(rec, 44),
                    user_name: text(&rec[48..63]),
                })
            }
            Some(RecordType::Empty) => SdbRecord::Empty,
            None => SdbRecord::Unknown(ty),
        };
        Ok(record)
    }

    pub fn encode(&self) -> [u8; SDB_RECORD_LEN] {
        let mut rec = [0u8; SDB_RECORD_LEN];
        match self {
            SdbRecord::Interconnect(i) => {
                rec[0..4].copy_from_slice(&SDB_MAGIC.to_be_bytes());
                rec[4..6].copy_from_slice(&i.records.to_be_bytes());
                rec[6] = i.version;
                rec[7] = i.bus_type.to_byte();
                encode_component(&mut rec, &i.component);
            }
            SdbRecord::Device(d) => {
                rec[0..2].copy_from_slice(&d.abi_class.to_be_bytes());
                rec[2] = d.abi_ver_major;
                rec[3] = d.abi_ver_minor;
                rec[4..8].copy_from_slice(&d.bus_specific.to_be_bytes());
                encode_component(&mut rec, &d.component);
            }
            SdbRecord::Bridge(b) => {
                rec[0..8].copy_from_slice(&b.sdb_child.to_be_bytes());
                encode_component(&mut rec, &b.component);
            }
            SdbRecord::Integration(p) => encode_product(&mut rec, p),
            SdbRecord::RepoUrl(url) => put_text(&mut rec[..63], url),
            SdbRecord::Synthesis(s) => {
                put_text(&mut rec[0..16], &s.syn_name);
                rec[16..32].copy_from_slice(&s.commit_id);
                put_text(&mut rec[32..40], &s.tool_name);
                rec[40..44].copy_from_slice(&s.tool_version.to_be_bytes());
                rec[44..48].copy_from_slice(&s.date.to_be_bytes());
                put_text(&mut rec[48..63], &s.user_name);
            }
            SdbRecord::Empty | SdbRecord::Unknown(_) => {}
        }
        rec[SDB_RECORD_LEN - 1] = match self {
            SdbRecord::Unknown(ty) => *ty,
            other => other.record_type().map(|t| t as u8).unwrap_or(0xFF),
        };
        rec
    }
}

fn be_u32(rec: &[u8; SDB_RECORD_LEN], at: usize) -> u32 {
    u32::from_be_bytes([rec[at], rec[at + 1], rec[at + 2], rec[at + 3]])
}

fn be_u64(rec: &[u8; SDB_RECORD_LEN], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&rec[at..at + 8]);
    u64::from_be_bytes(b)
}

fn text(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim_end().to_string()
}

fn put_text(dst: &mut [u8], s: &str) {
    let len = s.len().min(dst.len());
    dst[..len].copy_from_slice(&s.as_bytes()[..len]);
    dst[len..].fill(b' ');
}

fn decode_product(rec: &[u8; SDB_RECORD_LEN]) -> Product {
    Product {
        vendor_id: be_u64(rec, 0x18),
        device_id: be_u32(rec, 0x20),
        version: be_u32(rec, 0x24),
        date: be_u32(rec, 0x28),
        name: text(&rec[0x2C..0x2C + SDB_NAME_LEN]),
    }
}

fn encode_product(rec: &mut [u8; SDB_RECORD_LEN], p: &Product) {
    rec[0x18..0x20].copy_from_slice(&p.vendor_id.to_be_bytes());
    rec[0x20..0x24].copy_from_slice(&p.device_id.to_be_bytes());
    rec[0x24..0x28].copy_from_slice(&p.version.to_be_bytes());
    rec[0x28..0x2C].copy_from_slice(&p.date.to_be_bytes());
    put_text(&mut rec[0x2C..0x2C + SDB_NAME_LEN], &p.name);
}

fn decode_component(rec: &[u8; SDB_RECORD_LEN]) -> Component {
    Component {
        addr_first: be_u64(rec, 0x08),
        addr_last: be_u64(rec, 0x10),
        product: decode_product(rec),
    }
}

fn encode_component(rec: &mut [u8; SDB_RECORD_LEN], c: &Component) {
    rec[0x08..0x10].copy_from_slice(&c.addr_first.to_be_bytes());
    rec[0x10..0x18].copy_from_slice(&c.addr_last.to_be_bytes());
    encode_product(rec, &c.product);
}

/// Decode a whole table. The interconnect record must come first.
pub fn decode_table(bytes: &[u8]) -> Result<(Interconnect, Vec<SdbRecord>), Error> {
    let SdbRecord::Interconnect(head) = SdbRecord::decode(bytes)? else {
        return Err(Error::BadSdbMagic(bytes.get(..4).map_or(0, |b| {
            u32::from_be_bytes([b[0], b[1], b[2], b[3]])
        })));
    };
    let records = bytes
        .chunks(SDB_RECORD_LEN)
        .take(head.records as usize)
        .skip(1)
        .map(SdbRecord::decode)
        .collect::<Result<Vec<_>, _>>()?;
    if records.len() + 1 < head.records as usize {
        return Err(Error::Truncated);
    }
    Ok((head, records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn gpio() -> SdbRecord {
        SdbRecord::Device(Device {
            abi_class: 0,
            abi_ver_major: 1,
            abi_ver_minor: 0,
            bus_specific: Device::bus_specific_for(WidthSet::from_bits(0x04), Endianness::Big),
            component: Component {
                addr_first: 0x100,
                addr_last: 0x1FF,
                product: Product {
                    vendor_id: 0x651,
                    device_id: 0x35AA_6B96,
                    version: 1,
                    date: 0x2012_0305,
                    name: "GSI_GPIO_32".into(),
                },
            },
        })
    }

    #[test]
    fn device_record_layout() {
        let rec = gpio().encode();
        assert_eq!(
            rec,
            hex!(
                "00 00 01 00 00 00 00 04"
                "00 00 00 00 00 00 01 00"
                "00 00 00 00 00 00 01 FF"
                "00 00 00 00 00 00 06 51"
                "35 AA 6B 96 00 00 00 01"
                "20 12 03 05 47 53 49 5F"
                "47 50 49 4F 5F 33 32 20"
                "20 20 20 20 20 20 20 01"
            )
        );
        assert_eq!(SdbRecord::decode(&rec).unwrap(), gpio());
    }

    #[test]
    fn little_endian_flag() {
        let SdbRecord::Device(mut dev) = gpio() else {
            unreachable!()
        };
        assert_eq!(dev.endian(), Endianness::Big);
        dev.bus_specific |= BUS_SPECIFIC_LITTLE_ENDIAN;
        assert_eq!(dev.endian(), Endianness::Little);
        assert_eq!(dev.widths().bits(), 0x04);
    }

    #[test]
    fn table_with_bridge() {
        let head = SdbRecord::Interconnect(Interconnect {
            records: 3,
            version: 1,
            bus_type: BusType::Wishbone,
            component: Component {
                addr_first: 0,
                addr_last: 0xFFFF,
                product: Product {
                    name: "WB4-Crossbar".into(),
                    ..Default::default()
                },
            },
        });
        let bridge = SdbRecord::Bridge(Bridge {
            sdb_child: 0x800,
            component: Component {
                addr_first: 0x8000,
                addr_last: 0xFFFF,
                product: Product::default(),
            },
        });
        let mut bytes = Vec::new();
        for r in [&head, &gpio(), &bridge] {
            bytes.extend_from_slice(&r.encode());
        }
        let (ic, records) = decode_table(&bytes).unwrap();
        assert_eq!(ic.records, 3);
        assert_eq!(ic.component.product.name, "WB4-Crossbar");
        assert_eq!(records, vec![gpio(), bridge]);

        assert_eq!(decode_table(&bytes[..128]), Err(Error::Truncated));
    }

    #[test]
    fn bad_magic() {
        let mut rec = [0u8; SDB_RECORD_LEN];
        rec[0..4].copy_from_slice(&hex!("DE AD BE EF"));
        assert_eq!(SdbRecord::decode(&rec), Err(Error::BadSdbMagic(0xDEAD_BEEF)));
    }

    #[test]
    fn unknown_record_type_is_kept() {
        let mut rec = [0u8; SDB_RECORD_LEN];
        rec[63] = 0x42;
        assert_eq!(SdbRecord::decode(&rec), Ok(SdbRecord::Unknown(0x42)));
    }
}
