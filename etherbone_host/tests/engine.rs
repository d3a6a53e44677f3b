use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use etherbone_host::sim::{BridgeLayout, DeviceLayout, SimConnector, SimDevice, SimOpKind};
use etherbone_host::{
    Access, AccessMode, BusEngine, Connector, EngineConfig, Error, EtherboneEngine, Link,
    LinkError, MaskOp, NetworkTarget,
};
use etherbone_wire::{DataWidth, Endianness, Header, WidthSet};
use hex_literal::hex;

fn board() -> SimDevice {
    SimDevice::builder()
        .device(DeviceLayout::new("GPIO", 0x1000, 0x100).ids(0x651, 0x35aa_6b96))
        .device(
            DeviceLayout::new("BYTES", 0x3000, 0x10).widths(WidthSet::from(DataWidth::W8)),
        )
        .device(
            DeviceLayout::new("WORD", 0x4000, 0x10).widths(WidthSet::from(DataWidth::W32)),
        )
        .device(
            DeviceLayout::new("HALF", 0x5000, 0x10)
                .endian(Endianness::Little)
                .widths(WidthSet::from(DataWidth::W16)),
        )
        .bridge(
            BridgeLayout::new("sub-crossbar", 0x10000, 0x10000).device(
                DeviceLayout::new("UART", 0x200, 0x100)
                    .endian(Endianness::Little)
                    .ids(0x651, 0xe2d1_3d04),
            ),
        )
        .raw_region(0x8000, vec![0; 16], Endianness::Big)
        .build()
}

fn engine() -> (EtherboneEngine<SimConnector>, SimConnector) {
    let connector = SimConnector::new(board());
    (EtherboneEngine::new(connector.clone()), connector)
}

fn read(engine: &mut impl BusEngine, address: u64, align: DataWidth) -> Result<u64, Error> {
    engine.read(
        &Access::new(address)
            .with_mode(AccessMode::Read)
            .with_align(align),
    )
}

fn write(engine: &mut impl BusEngine, address: u64, align: DataWidth, value: u64) -> Result<(), Error> {
    engine.write(
        &Access::new(address)
            .with_mode(AccessMode::Write)
            .with_align(align)
            .with_value(value),
    )
}

fn writes_in(connector: &SimConnector, first: u64, last: u64) -> Vec<(u8, usize)> {
    connector.with_device(|dev| {
        dev.writes()
            .iter()
            .filter(|op| (first..=last).contains(&op.address))
            .map(|op| (op.select, op.size))
            .collect()
    })
}

#[test]
fn native_round_trip() {
    let (mut engine, connector) = engine();
    write(&mut engine, 0x1010, DataWidth::W32, 0xCAFE_F00D).unwrap();
    assert_eq!(read(&mut engine, 0x1010, DataWidth::W32).unwrap(), 0xCAFE_F00D);
    write(&mut engine, 0x1021, DataWidth::W8, 0x5A).unwrap();
    assert_eq!(read(&mut engine, 0x1021, DataWidth::W8).unwrap(), 0x5A);
    connector.with_device(|dev| {
        assert_eq!(dev.peek(0x1010, 4).unwrap(), hex!("CA FE F0 0D"));
        assert_eq!(dev.peek(0x1020, 4).unwrap(), hex!("00 5A 00 00"));
    });
}

#[test]
fn values_are_truncated_to_operand_size() {
    let (mut engine, connector) = engine();
    write(&mut engine, 0x1030, DataWidth::W16, 0x1234_5678).unwrap();
    connector.with_device(|dev| {
        assert_eq!(dev.peek(0x1030, 4).unwrap(), hex!("56 78 00 00"));
    });
}

#[test]
fn fragments_into_byte_writes() {
    let (mut engine, connector) = engine();
    write(&mut engine, 0x3004, DataWidth::W32, 0xDEAD_BEEF).unwrap();
    assert_eq!(
        writes_in(&connector, 0x3000, 0x300F),
        vec![(0b1000, 1), (0b0100, 1), (0b0010, 1), (0b0001, 1)]
    );
    connector.with_device(|dev| {
        assert_eq!(dev.peek(0x3004, 4).unwrap(), hex!("DE AD BE EF"));
    });
    assert_eq!(read(&mut engine, 0x3004, DataWidth::W32).unwrap(), 0xDEAD_BEEF);
}

#[test]
fn fragments_little_endian_high_chunk_first() {
    let (mut engine, connector) = engine();
    write(&mut engine, 0x5000, DataWidth::W32, 0x1122_3344).unwrap();
    assert_eq!(
        writes_in(&connector, 0x5000, 0x500F),
        vec![(0b1100, 2), (0b0011, 2)]
    );
    connector.with_device(|dev| {
        assert_eq!(dev.peek(0x5000, 4).unwrap(), hex!("44 33 22 11"));
    });
    assert_eq!(read(&mut engine, 0x5000, DataWidth::W32).unwrap(), 0x1122_3344);
}

#[test]
fn wide_operand_on_narrow_line() {
    let (mut engine, connector) = engine();
    write(&mut engine, 0x1040, DataWidth::W64, 0x0102_0304_0506_0708).unwrap();
    assert_eq!(writes_in(&connector, 0x1040, 0x1047).len(), 2);
    connector.with_device(|dev| {
        assert_eq!(dev.peek(0x1040, 8).unwrap(), hex!("01 02 03 04 05 06 07 08"));
    });
    assert_eq!(
        read(&mut engine, 0x1040, DataWidth::W64).unwrap(),
        0x0102_0304_0506_0708
    );
}

#[test]
fn widened_write_keeps_neighbour_bits() {
    let (mut engine, connector) = engine();
    connector.with_device(|dev| assert!(dev.poke(0x4000, &hex!("11 22 33 44"))));
    write(&mut engine, 0x4001, DataWidth::W8, 0xAB).unwrap();
    connector.with_device(|dev| {
        assert_eq!(dev.peek(0x4000, 4).unwrap(), hex!("11 AB 33 44"));
        let word_ops: Vec<SimOpKind> = dev
            .bus_ops()
            .filter(|op| op.address == 0x4000)
            .map(|op| op.kind)
            .collect();
        assert_eq!(word_ops, vec![SimOpKind::Read, SimOpKind::Write]);
    });
    assert_eq!(read(&mut engine, 0x4001, DataWidth::W8).unwrap(), 0xAB);
    assert_eq!(read(&mut engine, 0x4002, DataWidth::W16).unwrap(), 0x3344);
}

#[test]
fn misaligned_widened_access_is_refused() {
    let (mut engine, connector) = engine();
    connector.with_device(|dev| assert!(dev.poke(0x4000, &hex!("11 22 33 44"))));
    assert_eq!(
        write(&mut engine, 0x4003, DataWidth::W16, 0xBEEF),
        Err(Error::Misaligned {
            size: DataWidth::W16,
            address: 0x4003
        })
    );
    assert_eq!(
        read(&mut engine, 0x4001, DataWidth::W16),
        Err(Error::Misaligned {
            size: DataWidth::W16,
            address: 0x4001
        })
    );
    connector.with_device(|dev| {
        assert!(dev.bus_ops().all(|op| !(0x4000..0x4010).contains(&op.address)));
        assert_eq!(dev.peek(0x4000, 4).unwrap(), hex!("11 22 33 44"));
    });
}

#[test]
fn device_behind_bridge() {
    let (mut engine, connector) = engine();
    write(&mut engine, 0x10201, DataWidth::W8, 0x77).unwrap();
    connector.with_device(|dev| {
        assert_eq!(dev.peek(0x10200, 4).unwrap(), hex!("00 77 00 00"));
    });
    assert_eq!(read(&mut engine, 0x10200, DataWidth::W32).unwrap(), 0x7700);
}

#[test]
fn undescribed_memory_needs_full_width() {
    let (mut engine, _) = engine();
    write(&mut engine, 0x8004, DataWidth::W32, 0x0BAD_F00D).unwrap();
    assert_eq!(read(&mut engine, 0x8004, DataWidth::W32).unwrap(), 0x0BAD_F00D);
    assert_eq!(
        read(&mut engine, 0x8005, DataWidth::W8),
        Err(Error::UnknownEndianness { address: 0x8005 })
    );
}

#[test]
fn masks_apply_on_both_directions() {
    let (mut engine, connector) = engine();
    engine
        .write(
            &Access::new(0x1050)
                .with_mode(AccessMode::Write)
                .with_value(0x0F)
                .with_mask(0xF0, MaskOp::Or),
        )
        .unwrap();
    connector.with_device(|dev| assert_eq!(dev.peek(0x1050, 4).unwrap(), hex!("00 00 00 FF")));
    let value = engine
        .read(
            &Access::new(0x1050)
                .with_mode(AccessMode::Read)
                .with_mask(0x0F, MaskOp::And),
        )
        .unwrap();
    assert_eq!(value, 0x0F);
}

#[test]
fn write_after_read_sets_bits() {
    let (mut engine, connector) = engine();
    connector.with_device(|dev| assert!(dev.poke(0x1060, &hex!("00 00 00 01"))));
    let access = Access::new(0x1060)
        .with_mode(AccessMode::WriteAfterRead)
        .with_mask(0x100, MaskOp::Or);
    engine.write_after_read(&access).unwrap();
    connector.with_device(|dev| assert_eq!(dev.peek(0x1060, 4).unwrap(), hex!("00 00 01 01")));
    assert_eq!(access.mode, AccessMode::WriteAfterRead);
    assert_eq!(access.mask, 0x100);
}

#[test]
fn config_space_read() {
    let (mut engine, _) = engine();
    let access = Access::new(0x0C)
        .with_mode(AccessMode::Read)
        .with_config(true);
    assert_eq!(engine.read(&access).unwrap(), 0xF000);
}

#[test]
fn wrong_engine_path() {
    let (mut engine, connector) = engine();
    let access = Access::new(0x1000).with_mode(AccessMode::Write);
    assert_eq!(
        engine.read(&access),
        Err(Error::InvalidOperation {
            expected: AccessMode::Read,
            actual: AccessMode::Write
        })
    );
    connector.with_device(|dev| assert_eq!(dev.probes(), 0));
}

#[test]
fn autoincrement_and_reset() {
    let (mut engine, connector) = engine();
    let mut access = Access::new(0x1080)
        .with_mode(AccessMode::Write)
        .with_autoincrement(1);
    for value in [1, 2, 3] {
        access.value = value;
        access.execute(&mut engine).unwrap();
    }
    assert_eq!(access.address, 0x108C);
    access.reset();
    assert_eq!(access.address, 0x1080);
    connector.with_device(|dev| {
        assert_eq!(
            dev.peek(0x1080, 12).unwrap(),
            hex!("00 00 00 01 00 00 00 02 00 00 00 03")
        );
    });
}

#[test]
fn failed_execute_does_not_advance() {
    let (mut engine, mut connector) = engine();
    connector.set_refuse(true);
    let mut engine_refusing = EtherboneEngine::new(connector);
    let mut access = Access::new(0x1000)
        .with_mode(AccessMode::Read)
        .with_autoincrement(4);
    assert!(matches!(
        access.execute(&mut engine_refusing),
        Err(Error::TransportOpenFailed { .. })
    ));
    assert_eq!(access.address, 0x1000);
    assert!(access.execute(&mut engine).is_ok());
    assert_eq!(access.address, 0x1010);
}

#[test]
fn unresponsive_device_fails_open() {
    let (mut engine, connector) = engine();
    connector.with_device(|dev| dev.set_unresponsive(true));
    assert_eq!(
        read(&mut engine, 0x1000, DataWidth::W32),
        Err(Error::DeviceOpenFailed {
            attempts: 3,
            reason: "Timeout".into()
        })
    );
}

/// Answers probes but swallows every data packet.
struct ProbeOnly;

struct ProbeOnlyLink {
    replies: VecDeque<Vec<u8>>,
}

impl Connector for ProbeOnly {
    fn connect(
        &mut self,
        _target: &NetworkTarget,
        _timeout: Duration,
    ) -> Result<Box<dyn Link>, LinkError> {
        Ok(Box::new(ProbeOnlyLink {
            replies: VecDeque::new(),
        }))
    }
}

impl Link for ProbeOnlyLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        if Header::from_bytes(bytes).is_ok_and(|h| h.is_probe()) {
            let reply = Header::probe_response(WidthSet::ALL, WidthSet::up_to(DataWidth::W32));
            self.replies.push_back(reply.encode_probe());
        }
        Ok(())
    }

    fn receive(&mut self, _expected_len: usize, _timeout: Duration) -> Result<Vec<u8>, LinkError> {
        self.replies.pop_front().ok_or(LinkError::Timeout)
    }

    fn close(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

#[test]
fn silent_cycle_times_out() {
    let mut engine = EtherboneEngine::new(ProbeOnly);
    assert_eq!(read(&mut engine, 0x1000, DataWidth::W32), Err(Error::Timeout));
    let mut engine = EtherboneEngine::new(ProbeOnly).with_config(EngineConfig {
        probe: false,
        ..Default::default()
    });
    assert_eq!(read(&mut engine, 0x1000, DataWidth::W32), Err(Error::Timeout));
}

#[derive(Clone, Default)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn scan_lists_nested_buses() {
    let connector = SimConnector::new(board());
    let out = SharedBuf::default();
    let mut engine = EtherboneEngine::new(connector).with_scan_sink(Box::new(out.clone()));
    engine
        .scan(&Access::new(0).with_mode(AccessMode::Scan))
        .unwrap();
    let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "BusPath        VendorID         Product   BaseAddress(Hex)  Description"
    );
    assert_eq!(lines.len(), 1 + 6);
    assert_eq!(&lines[1][..15], format!("1{}", " ".repeat(14)));
    let tokens: Vec<Vec<&str>> = lines[1..]
        .iter()
        .map(|l| l.split_whitespace().collect())
        .collect();
    assert_eq!(tokens[0], vec!["1", "0000000000000651:35aa6b96", "1000", "GPIO"]);
    assert_eq!(tokens[4][0], "5");
    assert_eq!(tokens[4][3], "sub-crossbar");
    assert_eq!(tokens[5], vec!["5.1", "0000000000000651:e2d13d04", "10200", "UART"]);
}

#[test]
fn scan_skips_malformed_bridges_and_bounds_depth() {
    let deep = BridgeLayout::new("l1", 0x10000, 0x10000).bridge(
        BridgeLayout::new("l2", 0x0, 0x8000)
            .bridge(BridgeLayout::new("l3", 0x0, 0x4000).device(DeviceLayout::new("leaf", 0, 0x100))),
    );
    let sim = SimDevice::builder()
        .bridge(deep)
        .bridge(BridgeLayout::new("broken", 0x40000, 0x1000).sdb_child(0x20))
        .build();
    let mut engine = EtherboneEngine::new(SimConnector::new(sim)).with_config(EngineConfig {
        max_scan_depth: 2,
        ..Default::default()
    });
    let nodes = engine.scan_topology(&NetworkTarget::default()).unwrap();
    let paths: Vec<String> = nodes.iter().map(|n| n.path_id()).collect();
    assert_eq!(paths, vec!["1", "1.1", "1.1.1", "2"]);
}
