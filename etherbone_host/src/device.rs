use std::time::Duration;

use etherbone_wire::{
    CONFIG_ERROR_REGISTER, CONFIG_SDB_ADDRESS, DataWidth, Format, Header, Lane, Layout, Packet,
    PROBE_PACKET_LEN, Record, RecordFlags, WidthSet,
};
use tracing::{debug, trace, warn};

use crate::Error;
use crate::link::Link;

/// Open Etherbone device: a link plus the widths negotiated over it.
pub struct EbDevice {
    link: Box<dyn Link>,
    layout: Layout,
    timeout: Duration,
}

impl EbDevice {
    /// Probe the slave up to `attempts` times and settle on the widest address and data size both ends support.
    pub fn open(mut link: Box<dyn Link>, attempts: u32, timeout: Duration) -> Result<Self, Error> {
        let probe = Header::probe(WidthSet::ALL, WidthSet::ALL).encode_probe();
        let mut last = String::from("no attempts made");
        for attempt in 1..=attempts.max(1) {
            trace!("probe attempt {attempt}");
            if let Err(e) = link.send(&probe) {
                last = e.to_string();
                continue;
            }
            let reply = match link.receive(PROBE_PACKET_LEN, timeout) {
                Ok(reply) => reply,
                Err(e) => {
                    debug!("probe attempt {attempt} failed: {e}");
                    last = e.to_string();
                    continue;
                }
            };
            match negotiate(&reply) {
                Ok(layout) => {
                    debug!(
                        "negotiated {} address and {} data",
                        layout.address, layout.data
                    );
                    return Ok(EbDevice {
                        link,
                        layout,
                        timeout,
                    });
                }
                Err(reason) => {
                    // A slave that answers with garbage will keep doing so.
                    _ = link.close();
                    return Err(Error::DeviceOpenFailed {
                        attempts: attempt,
                        reason,
                    });
                }
            }
        }
        _ = link.close();
        Err(Error::DeviceOpenFailed {
            attempts: attempts.max(1),
            reason: last,
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Data width of the link.
    pub fn line(&self) -> DataWidth {
        self.layout.data
    }

    pub fn cycle(&mut self) -> Cycle<'_> {
        Cycle {
            device: self,
            ops: Vec::new(),
        }
    }

    /// Read the root SDB table address from config space.
    pub fn sdb_root(&mut self) -> Result<u64, Error> {
        let line = self.line();
        let words = 8 / line.bytes();
        let mut cycle = self.cycle();
        for i in 0..words {
            cycle.read(
                CONFIG_SDB_ADDRESS + (i * line.bytes()) as u64,
                Format::full(line),
                true,
            );
        }
        let values = cycle.run()?;
        Ok(values
            .iter()
            .fold(0u64, |acc, w| acc.checked_shl(line.bits()).unwrap_or(0) | w))
    }

    /// Read `len` bytes of big endian memory starting at the line-aligned `address`.
    pub fn read_bytes(&mut self, address: u64, len: usize) -> Result<Vec<u8>, Error> {
        let line = self.line();
        let w = line.bytes();
        let mut cycle = self.cycle();
        for i in 0..len.div_ceil(w) {
            cycle.read(address + (i * w) as u64, Format::full(line), false);
        }
        let words = cycle.run()?;
        let mut bytes = Vec::with_capacity(words.len() * w);
        for word in words {
            bytes.extend_from_slice(&word.to_be_bytes()[8 - w..]);
        }
        bytes.truncate(len);
        Ok(bytes)
    }

    pub fn close(mut self) -> Result<(), Error> {
        self.link
            .close()
            .map_err(|e| Error::TransportCloseFailed(e.to_string()))
    }
}

fn negotiate(reply: &[u8]) -> Result<Layout, String> {
    let header = Header::from_bytes(reply).map_err(|e| e.to_string())?;
    if !header.is_probe_response() {
        return Err(etherbone_wire::Error::NotProbeResponse.to_string());
    }
    let address = header.address_widths.largest();
    let data = header.data_widths.largest();
    match (address, data) {
        (Some(address), Some(data)) => Ok(Layout::new(address, data)),
        _ => Err(format!(
            "no common widths, slave offers address {:?} data {:?}",
            header.address_widths, header.data_widths
        )),
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum OpKind {
    Read,
    Write(u64),
}

#[derive(Copy, Clone, Debug)]
struct PendingOp {
    kind: OpKind,
    address: u64,
    format: Format,
    config: bool,
}

/// One Wishbone cycle: operations are queued and sent in a single packet by [Cycle::run].
pub struct Cycle<'d> {
    device: &'d mut EbDevice,
    ops: Vec<PendingOp>,
}

impl Cycle<'_> {
    pub fn read(&mut self, address: u64, format: Format, config: bool) -> &mut Self {
        self.ops.push(PendingOp {
            kind: OpKind::Read,
            address,
            format,
            config,
        });
        self
    }

    pub fn write(&mut self, address: u64, format: Format, value: u64, config: bool) -> &mut Self {
        self.ops.push(PendingOp {
            kind: OpKind::Write(value),
            address,
            format,
            config,
        });
        self
    }

    /// Send the cycle and wait for completion. Returns read values in queue order, already
    /// shifted down to their operand size.
    pub fn run(self) -> Result<Vec<u64>, Error> {
        let layout = self.device.layout;
        let (packet, lanes) = build_packet(layout, &self.ops)?;
        let bytes = packet
            .encode()
            .map_err(|e| Error::CycleOpenFailed(e.to_string()))?;
        trace!("cycle: {} ops, {} bytes", self.ops.len(), bytes.len());

        let link = &mut self.device.link;
        link.send(&bytes)?;
        let reply = link
            .receive(packet.reply_len(), self.device.timeout)?;
        let reply = Packet::decode(&reply).map_err(|e| Error::CycleFailed(e.to_string()))?;

        let mut data: Vec<u64> = reply
            .records
            .into_iter()
            .flat_map(|r| r.writes.into_iter())
            .collect();
        if data.len() != packet.read_count() {
            return Err(Error::CycleFailed(format!(
                "expected {} read results, got {}",
                packet.read_count(),
                data.len()
            )));
        }
        let status = data.pop().unwrap_or(0);
        let bus_ops = self.ops.iter().filter(|op| !op.config).count();
        let faults = status & low_bits(bus_ops);
        if faults != 0 {
            warn!("slave reported bus errors {faults:#b} for the last {bus_ops} operations");
        }

        let reads = self
            .ops
            .iter()
            .zip(lanes.iter())
            .filter(|(op, _)| op.kind == OpKind::Read);
        Ok(reads
            .zip(data)
            .map(|((op, lane), word)| lane.extract(op.format, word))
            .collect())
    }
}

fn low_bits(n: usize) -> u64 {
    if n >= 64 { u64::MAX } else { (1u64 << n) - 1 }
}

/// Pack queued operations into records: consecutive reads sharing byte enables and address space
/// go into one record, as do writes to consecutive words. The cycle always ends with a read of
/// the error register so that the slave has something to answer.
fn build_packet(layout: Layout, ops: &[PendingOp]) -> Result<(Packet, Vec<Lane>), Error> {
    let line = layout.data;
    let mut packet = Packet::new(layout);
    let mut lanes = Vec::with_capacity(ops.len());
    for op in ops {
        let lane = Lane::locate(op.address, op.format, line)
            .map_err(|e| Error::CycleOpenFailed(e.to_string()))?;
        lanes.push(lane);
        let last = packet.records.last_mut();
        match op.kind {
            OpKind::Read => {
                let flags = if op.config {
                    RecordFlags::RCA
                } else {
                    RecordFlags::empty()
                };
                match last {
                    Some(r)
                        if r.writes.is_empty()
                            && r.select == lane.select
                            && r.flags == flags
                            && r.reads.len() < etherbone_wire::MAX_RECORD_OPS =>
                    {
                        r.reads.push(lane.address);
                    }
                    _ => packet.records.push(Record {
                        flags,
                        select: lane.select,
                        reads: vec![lane.address],
                        ..Default::default()
                    }),
                }
            }
            OpKind::Write(value) => {
                let flags = if op.config {
                    RecordFlags::WCA
                } else {
                    RecordFlags::empty()
                };
                let word = lane.insert(op.format, value);
                match last {
                    Some(r)
                        if r.reads.is_empty()
                            && r.select == lane.select
                            && r.flags == flags
                            && r.writes.len() < etherbone_wire::MAX_RECORD_OPS
                            && r.write_base + (r.writes.len() * line.bytes()) as u64
                                == lane.address =>
                    {
                        r.writes.push(word);
                    }
                    _ => packet.records.push(Record {
                        flags,
                        select: lane.select,
                        write_base: lane.address,
                        writes: vec![word],
                        ..Default::default()
                    }),
                }
            }
        }
    }
    let status = Lane::locate(
        CONFIG_ERROR_REGISTER + 8 - line.bytes() as u64,
        Format::full(line),
        line,
    )
    .map_err(|e| Error::CycleOpenFailed(e.to_string()))?;
    packet.records.push(Record {
        flags: RecordFlags::RCA.with(RecordFlags::CYC),
        select: status.select,
        reads: vec![status.address],
        ..Default::default()
    });
    Ok((packet, lanes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherbone_wire::Endianness;
    use hex_literal::hex;

    fn pending(kind: OpKind, address: u64, size: DataWidth) -> PendingOp {
        PendingOp {
            kind,
            address,
            format: Format::new(size, Some(Endianness::Big)),
            config: false,
        }
    }

    #[test]
    fn reads_share_a_record() {
        let layout = Layout::new(DataWidth::W32, DataWidth::W32);
        let ops = [
            pending(OpKind::Read, 0x100, DataWidth::W32),
            pending(OpKind::Read, 0x104, DataWidth::W32),
            pending(OpKind::Read, 0x101, DataWidth::W8),
        ];
        let (packet, lanes) = build_packet(layout, &ops).unwrap();
        assert_eq!(lanes.len(), 3);
        assert_eq!(packet.records.len(), 3);
        assert_eq!(packet.records[0].reads, vec![0x100, 0x104]);
        assert_eq!(packet.records[1].select, 0b0100);
        let status = &packet.records[2];
        assert_eq!(status.reads, vec![0x4]);
        assert!(status.flags.contains(RecordFlags::RCA));
        assert!(status.flags.contains(RecordFlags::CYC));
        assert_eq!(status.select, 0x0F);
    }

    #[test]
    fn consecutive_writes_share_a_record() {
        let layout = Layout::new(DataWidth::W32, DataWidth::W32);
        let ops = [
            pending(OpKind::Write(1), 0x200, DataWidth::W32),
            pending(OpKind::Write(2), 0x204, DataWidth::W32),
            pending(OpKind::Write(3), 0x300, DataWidth::W32),
        ];
        let (packet, _) = build_packet(layout, &ops).unwrap();
        assert_eq!(packet.records[0].writes, vec![1, 2]);
        assert_eq!(packet.records[1].write_base, 0x300);
        let bytes = packet.encode().unwrap();
        assert_eq!(
            &bytes[..20],
            &hex!("4E 6F 10 44" "00 0F 02 00" "00 00 02 00" "00 00 00 01" "00 00 00 02")
        );
    }

    #[test]
    fn status_read_on_wide_line() {
        let layout = Layout::new(DataWidth::W32, DataWidth::W64);
        let (packet, _) = build_packet(layout, &[]).unwrap();
        assert_eq!(packet.records[0].reads, vec![0x0]);
        assert_eq!(packet.records[0].select, 0xFF);
    }
}
