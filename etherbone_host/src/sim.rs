//! Software Etherbone slave with an SDB described memory map.
//!
//! Used by tests and by `ebone sim` to stand in for real hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use etherbone_wire::sdb::{self, SDB_RECORD_LEN, SdbRecord};
use etherbone_wire::{
    DataWidth, Endianness, Header, Layout, Packet, Record, RecordFlags, WidthSet, select_to_mask,
};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

use crate::link::{Connector, Link, LinkError};
use crate::target::NetworkTarget;

pub const SIM_VENDOR_ID: u64 = 0x0000_0000_0000_0651;

/// A Wishbone slave to put on the simulated bus.
#[derive(Clone, Debug)]
pub struct DeviceLayout {
    pub name: String,
    /// Relative to the bus the device sits on.
    pub base: u64,
    pub size: u64,
    pub endian: Endianness,
    pub widths: WidthSet,
    pub vendor_id: u64,
    pub device_id: u32,
}

impl DeviceLayout {
    pub fn new(name: impl Into<String>, base: u64, size: u64) -> Self {
        DeviceLayout {
            name: name.into(),
            base,
            size,
            endian: Endianness::Big,
            widths: WidthSet::ALL,
            vendor_id: SIM_VENDOR_ID,
            device_id: 0,
        }
    }

    pub fn endian(mut self, endian: Endianness) -> Self {
        self.endian = endian;
        self
    }

    pub fn widths(mut self, widths: WidthSet) -> Self {
        self.widths = widths;
        self
    }

    pub fn ids(mut self, vendor_id: u64, device_id: u32) -> Self {
        self.vendor_id = vendor_id;
        self.device_id = device_id;
        self
    }
}

/// A bridge to a nested bus.
#[derive(Clone, Debug)]
pub struct BridgeLayout {
    pub name: String,
    pub base: u64,
    pub size: u64,
    /// Child table address relative to the parent bus, defaults to the top of the bridge window.
    pub sdb_child: Option<u64>,
    pub bus: SimBus,
}

impl BridgeLayout {
    pub fn new(name: impl Into<String>, base: u64, size: u64) -> Self {
        BridgeLayout {
            name: name.into(),
            base,
            size,
            sdb_child: None,
            bus: SimBus::default(),
        }
    }

    pub fn sdb_child(mut self, address: u64) -> Self {
        self.sdb_child = Some(address);
        self
    }

    pub fn device(mut self, layout: DeviceLayout) -> Self {
        self.bus.nodes.push(SimNode::Device(layout));
        self
    }

    pub fn bridge(mut self, layout: BridgeLayout) -> Self {
        self.bus.nodes.push(SimNode::Bridge(layout));
        self
    }
}

#[derive(Clone, Debug)]
pub enum SimNode {
    Device(DeviceLayout),
    Bridge(BridgeLayout),
    Empty,
}

#[derive(Clone, Debug, Default)]
pub struct SimBus {
    pub nodes: Vec<SimNode>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SimOpKind {
    Read,
    Write,
}

/// One operation the slave executed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SimOp {
    pub kind: SimOpKind,
    /// Bus address, aligned to the line width.
    pub address: u64,
    pub select: u8,
    /// Number of enabled byte lanes.
    pub size: usize,
    /// Written or returned bus word.
    pub value: u64,
    pub config: bool,
    pub fault: bool,
}

struct Region {
    name: String,
    base: u64,
    bytes: Vec<u8>,
    endian: Endianness,
    widths: WidthSet,
}

impl Region {
    fn contains(&self, address: u64) -> bool {
        address >= self.base && address - self.base < self.bytes.len() as u64
    }
}

pub struct SimDeviceBuilder {
    line: DataWidth,
    address: DataWidth,
    sdb_root: u64,
    bus: SimBus,
    raw: Vec<Region>,
    record_ops: bool,
}

impl SimDeviceBuilder {
    /// Keep a log of every executed operation, on by default.
    pub fn record_ops(mut self, record: bool) -> Self {
        self.record_ops = record;
        self
    }

    pub fn line_width(mut self, width: DataWidth) -> Self {
        self.line = width;
        self
    }

    pub fn address_width(mut self, width: DataWidth) -> Self {
        self.address = width;
        self
    }

    /// Where the root SDB table is placed.
    pub fn sdb_root(mut self, address: u64) -> Self {
        self.sdb_root = address;
        self
    }

    pub fn device(mut self, layout: DeviceLayout) -> Self {
        self.bus.nodes.push(SimNode::Device(layout));
        self
    }

    pub fn bridge(mut self, layout: BridgeLayout) -> Self {
        self.bus.nodes.push(SimNode::Bridge(layout));
        self
    }

    pub fn empty_record(mut self) -> Self {
        self.bus.nodes.push(SimNode::Empty);
        self
    }

    /// Memory not described by SDB.
    pub fn raw_region(mut self, base: u64, bytes: Vec<u8>, endian: Endianness) -> Self {
        self.raw.push(Region {
            name: format!("raw@{base:#x}"),
            base,
            bytes,
            endian,
            widths: WidthSet::ALL,
        });
        self
    }

    pub fn build(self) -> SimDevice {
        let mut regions = Vec::new();
        let top = self.address.max_value();
        let root = (self.sdb_root, 0u64, self.bus, "sim-crossbar".to_string(), top);
        let mut pending = vec![root];
        while let Some((table_at, bus_base, bus, name, last)) = pending.pop() {
            let mut table = vec![SdbRecord::Interconnect(sdb::Interconnect {
                records: (bus.nodes.len() + 1) as u16,
                version: 1,
                bus_type: sdb::BusType::Wishbone,
                component: component(0, last, &name, SIM_VENDOR_ID, 0),
            })];
            for node in bus.nodes {
                match node {
                    SimNode::Device(d) => {
                        table.push(SdbRecord::Device(sdb::Device {
                            abi_class: 0,
                            abi_ver_major: 1,
                            abi_ver_minor: 0,
                            bus_specific: sdb::Device::bus_specific_for(d.widths, d.endian),
                            component: component(
                                d.base,
                                d.base + d.size - 1,
                                &d.name,
                                d.vendor_id,
                                d.device_id,
                            ),
                        }));
                        regions.push(Region {
                            name: d.name,
                            base: bus_base + d.base,
                            bytes: vec![0; d.size as usize],
                            endian: d.endian,
                            widths: d.widths,
                        });
                    }
                    SimNode::Bridge(b) => {
                        let table_len = (b.bus.nodes.len() as u64 + 1) * SDB_RECORD_LEN as u64;
                        let child = b
                            .sdb_child
                            .unwrap_or((b.base + b.size - table_len) & !(SDB_RECORD_LEN as u64 - 1));
                        table.push(SdbRecord::Bridge(sdb::Bridge {
                            sdb_child: child,
                            component: component(
                                b.base,
                                b.base + b.size - 1,
                                &b.name,
                                SIM_VENDOR_ID,
                                0,
                            ),
                        }));
                        pending.push((bus_base + child, bus_base + b.base, b.bus, b.name, b.size - 1));
                    }
                    SimNode::Empty => table.push(SdbRecord::Empty),
                }
            }
            let mut rom = Vec::with_capacity(table.len() * SDB_RECORD_LEN);
            for record in &table {
                rom.extend_from_slice(&record.encode());
            }
            regions.push(Region {
                name: format!("sdb@{table_at:#x}"),
                base: table_at,
                bytes: rom,
                endian: Endianness::Big,
                widths: WidthSet::ALL,
            });
        }
        // Tables first so that a table inside a bridge window shadows the devices there.
        regions.sort_by_key(|r| !r.name.starts_with("sdb@"));
        regions.extend(self.raw);
        SimDevice {
            address: self.address,
            line: self.line,
            sdb_root: self.sdb_root,
            regions,
            error_register: 0,
            ops: Vec::new(),
            record_ops: self.record_ops,
            probes: 0,
            unresponsive: false,
        }
    }
}

fn component(first: u64, last: u64, name: &str, vendor_id: u64, device_id: u32) -> sdb::Component {
    sdb::Component {
        addr_first: first,
        addr_last: last,
        product: sdb::Product {
            vendor_id,
            device_id,
            version: 1,
            date: 0x2024_0101,
            name: name.to_string(),
        },
    }
}

/// Simulated Etherbone slave.
pub struct SimDevice {
    address: DataWidth,
    line: DataWidth,
    sdb_root: u64,
    regions: Vec<Region>,
    error_register: u64,
    ops: Vec<SimOp>,
    record_ops: bool,
    probes: usize,
    unresponsive: bool,
}

impl SimDevice {
    pub fn builder() -> SimDeviceBuilder {
        SimDeviceBuilder {
            line: DataWidth::W32,
            address: DataWidth::W32,
            sdb_root: 0xF000,
            bus: SimBus::default(),
            raw: Vec::new(),
            record_ops: true,
        }
    }

    /// Every operation executed so far, config space included.
    pub fn ops(&self) -> &[SimOp] {
        &self.ops
    }

    /// Operations on the bus proper.
    pub fn bus_ops(&self) -> impl Iterator<Item = &SimOp> {
        self.ops.iter().filter(|op| !op.config)
    }

    /// Bus writes outside of the SDB tables.
    pub fn writes(&self) -> Vec<SimOp> {
        self.bus_ops()
            .filter(|op| op.kind == SimOpKind::Write)
            .copied()
            .collect()
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Stop answering, links then run into their timeout.
    pub fn set_unresponsive(&mut self, unresponsive: bool) {
        self.unresponsive = unresponsive;
    }

    /// Raw bytes in address order.
    pub fn peek(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        (0..len as u64)
            .map(|i| self.byte(address + i))
            .collect::<Option<Vec<u8>>>()
    }

    pub fn poke(&mut self, address: u64, bytes: &[u8]) -> bool {
        bytes.iter().enumerate().all(|(i, b)| {
            match self.regions.iter_mut().find(|r| r.contains(address + i as u64)) {
                Some(r) => {
                    r.bytes[(address + i as u64 - r.base) as usize] = *b;
                    true
                }
                None => false,
            }
        })
    }

    fn byte(&self, address: u64) -> Option<u8> {
        let r = self.regions.iter().find(|r| r.contains(address))?;
        Some(r.bytes[(address - r.base) as usize])
    }

    /// Answer one request. `None` means no reply is sent.
    pub fn handle(&mut self, request: &[u8]) -> Option<Vec<u8>> {
        if self.unresponsive {
            trace!("sim: dropping {} bytes", request.len());
            return None;
        }
        let header = match Header::from_bytes(request) {
            Ok(header) => header,
            Err(e) => {
                warn!("sim: bad request: {e}");
                return None;
            }
        };
        if header.is_probe() {
            self.probes += 1;
            let reply = Header::probe_response(
                WidthSet::up_to(self.address),
                WidthSet::up_to(self.line),
            );
            return Some(reply.encode_probe());
        }
        let packet = match Packet::decode(request) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("sim: bad packet: {e}");
                return None;
            }
        };
        let layout = packet.layout;
        let mut reply = Packet::new(layout);
        for record in &packet.records {
            self.apply_writes(layout, record);
            if record.reads.is_empty() {
                continue;
            }
            let config = record.flags.contains(RecordFlags::RCA);
            let values = record
                .reads
                .iter()
                .map(|a| self.read(layout.data, *a, record.select, config))
                .collect();
            let mut flags = RecordFlags::empty();
            flags.set(RecordFlags::WCA, record.flags.contains(RecordFlags::BCA));
            reply.records.push(Record {
                flags,
                select: record.select,
                write_base: record.read_base,
                writes: values,
                ..Default::default()
            });
        }
        match reply.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("sim: cannot encode reply: {e}");
                None
            }
        }
    }

    fn apply_writes(&mut self, layout: Layout, record: &Record) {
        let config = record.flags.contains(RecordFlags::WCA);
        let step = if record.flags.contains(RecordFlags::WFF) {
            0
        } else {
            layout.data.bytes() as u64
        };
        for (i, value) in record.writes.iter().enumerate() {
            let address = record.write_base + step * i as u64;
            self.write(layout.data, address, record.select, *value, config);
        }
    }

    fn lane_address(region: &Region, aligned: u64, lane: u32, line: DataWidth) -> u64 {
        match region.endian {
            Endianness::Big => aligned + (line.bytes() as u64 - 1 - lane as u64),
            Endianness::Little => aligned + lane as u64,
        }
    }

    fn config_word(&self, line: DataWidth, address: u64) -> u64 {
        let mut space = [0u8; 16];
        space[..8].copy_from_slice(&self.error_register.to_be_bytes());
        space[8..].copy_from_slice(&self.sdb_root.to_be_bytes());
        (0..line.bytes() as u64).fold(0u64, |acc, i| {
            let b = space.get((address + i) as usize).copied().unwrap_or(0);
            (acc << 8) | b as u64
        })
    }

    /// Region claiming every enabled lane, if the access is legal for it.
    fn region_for(&self, line: DataWidth, aligned: u64, select: u8) -> Option<usize> {
        let size = select.count_ones() as usize;
        let lanes: Vec<u32> = (0..line.bytes() as u32)
            .filter(|l| select & (1 << l) != 0)
            .collect();
        let first = *lanes.first()?;
        let idx = self.regions.iter().position(|r| {
            r.contains(Self::lane_address(r, aligned, first, line))
        })?;
        let region = &self.regions[idx];
        let legal = DataWidth::from_bytes(size).is_some_and(|w| region.widths.contains(w))
            && lanes
                .iter()
                .all(|l| region.contains(Self::lane_address(region, aligned, *l, line)));
        legal.then_some(idx)
    }

    fn read(&mut self, line: DataWidth, address: u64, select: u8, config: bool) -> u64 {
        let (value, fault) = if config {
            (self.config_word(line, address) & select_to_mask(select), false)
        } else {
            match self.region_for(line, address, select) {
                Some(idx) => {
                    let region = &self.regions[idx];
                    let value = (0..line.bytes() as u32)
                        .filter(|l| select & (1 << l) != 0)
                        .fold(0u64, |acc, l| {
                            let at = Self::lane_address(region, address, l, line) - region.base;
                            acc | ((region.bytes[at as usize] as u64) << (8 * l))
                        });
                    (value, false)
                }
                None => (0, true),
            }
        };
        self.record(SimOpKind::Read, address, select, value, config, fault);
        value
    }

    fn write(&mut self, line: DataWidth, address: u64, select: u8, value: u64, config: bool) {
        let mut fault = false;
        if config {
            debug!("sim: ignoring config write {address:#x} = {value:#x}");
        } else {
            match self.region_for(line, address, select) {
                Some(idx) => {
                    let region = &mut self.regions[idx];
                    for l in (0..line.bytes() as u32).filter(|l| select & (1 << l) != 0) {
                        let at = Self::lane_address(region, address, l, line) - region.base;
                        region.bytes[at as usize] = (value >> (8 * l)) as u8;
                    }
                    trace!("sim: {} <- {value:#x} at {address:#x}", region.name);
                }
                None => fault = true,
            }
        }
        self.record(SimOpKind::Write, address, select, value, config, fault);
    }

    fn record(
        &mut self,
        kind: SimOpKind,
        address: u64,
        select: u8,
        value: u64,
        config: bool,
        fault: bool,
    ) {
        if !config {
            self.error_register = (self.error_register << 1) | fault as u64;
        }
        if fault {
            debug!("sim: bus error on {kind:?} at {address:#x} select {select:#b}");
        }
        if !self.record_ops {
            return;
        }
        self.ops.push(SimOp {
            kind,
            address,
            select,
            size: select.count_ones() as usize,
            value,
            config,
            fault,
        });
    }
}

/// Shared simulated device handed out as links.
#[derive(Clone)]
pub struct SimConnector {
    device: Arc<Mutex<SimDevice>>,
    refuse: bool,
}

impl SimConnector {
    pub fn new(device: SimDevice) -> Self {
        SimConnector {
            device: Arc::new(Mutex::new(device)),
            refuse: false,
        }
    }

    pub fn device(&self) -> Arc<Mutex<SimDevice>> {
        self.device.clone()
    }

    /// Fail every connect, as if nothing listened at the target.
    pub fn set_refuse(&mut self, refuse: bool) {
        self.refuse = refuse;
    }

    /// Run `f` with the device locked.
    pub fn with_device<T>(&self, f: impl FnOnce(&mut SimDevice) -> T) -> T {
        let mut dev = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut dev)
    }
}

impl Connector for SimConnector {
    fn connect(
        &mut self,
        target: &NetworkTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn Link>, LinkError> {
        if self.refuse {
            return Err(LinkError::Io(format!("connection to {target} refused")));
        }
        Ok(Box::new(SimLink {
            device: self.device.clone(),
            replies: VecDeque::new(),
            closed: false,
        }))
    }
}

struct SimLink {
    device: Arc<Mutex<SimDevice>>,
    replies: VecDeque<Vec<u8>>,
    closed: bool,
}

impl Link for SimLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        let mut dev = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(reply) = dev.handle(bytes) {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    fn receive(&mut self, _expected_len: usize, _timeout: Duration) -> Result<Vec<u8>, LinkError> {
        if self.closed {
            return Err(LinkError::Closed);
        }
        self.replies.pop_front().ok_or(LinkError::Timeout)
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.closed = true;
        Ok(())
    }
}

/// Answer Etherbone datagrams arriving on `socket` until an I/O error occurs.
pub async fn serve_udp(socket: UdpSocket, device: Arc<Mutex<SimDevice>>) -> std::io::Result<()> {
    debug!("sim: serving on {:?}", socket.local_addr());
    let mut buf = vec![0u8; 65_535];
    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let reply = {
            let mut dev = device.lock().unwrap_or_else(PoisonError::into_inner);
            dev.handle(&buf[..len])
        };
        if let Some(reply) = reply {
            socket.send_to(&reply, peer).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherbone_wire::sdb::decode_table;
    use hex_literal::hex;

    fn sim() -> SimDevice {
        SimDevice::builder()
            .device(DeviceLayout::new("BE", 0x1000, 0x100))
            .device(DeviceLayout::new("LE", 0x2000, 0x100).endian(Endianness::Little))
            .device(
                DeviceLayout::new("BYTES", 0x3000, 0x10).widths(WidthSet::from(DataWidth::W8)),
            )
            .build()
    }

    #[test]
    fn answers_probe() {
        let mut dev = sim();
        let reply = dev.handle(&hex!("4E 6F 11 FF 00 00 00 00")).unwrap();
        assert_eq!(reply, hex!("4E 6F 12 77 00 00 00 00"));
        assert_eq!(dev.probes(), 1);
    }

    #[test]
    fn lane_mapping_follows_endianness() {
        let mut dev = sim();
        dev.write(DataWidth::W32, 0x1000, 0x0F, 0x1122_3344, false);
        assert_eq!(dev.peek(0x1000, 4).unwrap(), hex!("11 22 33 44"));
        dev.write(DataWidth::W32, 0x2000, 0x0F, 0x1122_3344, false);
        assert_eq!(dev.peek(0x2000, 4).unwrap(), hex!("44 33 22 11"));
        // Byte lane 2 of a big endian slave is the byte at offset 1.
        assert_eq!(dev.read(DataWidth::W32, 0x1000, 0b0100, false), 0x0022_0000);
    }

    #[test]
    fn unsupported_size_faults() {
        let mut dev = sim();
        dev.read(DataWidth::W32, 0x3000, 0x0F, false);
        dev.read(DataWidth::W32, 0x3000, 0x01, false);
        dev.read(DataWidth::W32, 0x9000, 0x0F, false);
        let faults: Vec<bool> = dev.ops().iter().map(|op| op.fault).collect();
        assert_eq!(faults, vec![true, false, true]);
        assert_eq!(dev.error_register, 0b101);
    }

    #[test]
    fn sdb_rom_describes_devices() {
        let dev = sim();
        let rom = dev.peek(0xF000, 4 * SDB_RECORD_LEN).unwrap();
        let (head, records) = decode_table(&rom).unwrap();
        assert_eq!(head.records, 4);
        let SdbRecord::Device(le) = &records[1] else {
            panic!("expected a device record");
        };
        assert_eq!(le.component.addr_first, 0x2000);
        assert_eq!(le.component.addr_last, 0x20FF);
        assert_eq!(le.endian(), Endianness::Little);
        assert_eq!(le.component.product.name, "LE");
    }

    #[test]
    fn config_space_holds_sdb_address() {
        let mut dev = sim();
        assert_eq!(dev.read(DataWidth::W32, 0x0C, 0x0F, true), 0xF000);
        assert_eq!(dev.read(DataWidth::W32, 0x08, 0x0F, true), 0);
        assert!(dev.bus_ops().next().is_none());
    }

    #[test]
    fn op_log_can_be_disabled() {
        let mut dev = SimDevice::builder()
            .device(DeviceLayout::new("BYTES", 0x3000, 0x10).widths(WidthSet::from(DataWidth::W8)))
            .record_ops(false)
            .build();
        dev.write(DataWidth::W32, 0x3000, 0x01, 0xAB, false);
        dev.read(DataWidth::W32, 0x3000, 0x0F, false);
        assert!(dev.ops().is_empty());
        assert_eq!(dev.peek(0x3003, 1).unwrap(), hex!("AB"));
        assert_eq!(dev.error_register, 0b01);
    }

    #[test]
    fn unresponsive_drops_everything() {
        let mut dev = sim();
        dev.set_unresponsive(true);
        assert!(dev.handle(&hex!("4E 6F 11 FF 00 00 00 00")).is_none());
    }
}
