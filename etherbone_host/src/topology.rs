//! SDB walk over an open device: address lookup and full bus listing.

use std::collections::HashSet;
use std::io::{self, Write};

use etherbone_wire::sdb::{self, SDB_RECORD_LEN, SdbRecord};
use tracing::{debug, trace, warn};

use crate::Error;
use crate::device::EbDevice;

/// One SDB table with every record moved into absolute addresses.
#[derive(Clone, Debug)]
pub struct Table {
    pub address: u64,
    pub interconnect: sdb::Interconnect,
    pub records: Vec<SdbRecord>,
}

/// Read the table at `address` describing a bus mapped at `base`.
pub fn read_table(dev: &mut EbDevice, address: u64, base: u64) -> Result<Table, Error> {
    trace!("reading SDB table at {address:#x}, bus base {base:#x}");
    let head = dev.read_bytes(address, SDB_RECORD_LEN)?;
    let SdbRecord::Interconnect(interconnect) = SdbRecord::decode(&head).map_err(scan_error)?
    else {
        return Err(Error::TopologyScanFailed(format!(
            "no interconnect record at {address:#x}"
        )));
    };
    let count = (interconnect.records as usize).saturating_sub(1);
    let bytes = if count > 0 {
        dev.read_bytes(address + SDB_RECORD_LEN as u64, count * SDB_RECORD_LEN)?
    } else {
        Vec::new()
    };
    let records = bytes
        .chunks(SDB_RECORD_LEN)
        .map(|rec| SdbRecord::decode(rec).map(|r| relocate(r, base)))
        .collect::<Result<Vec<_>, _>>()
        .map_err(scan_error)?;
    Ok(Table {
        address,
        interconnect,
        records,
    })
}

fn scan_error(e: etherbone_wire::Error) -> Error {
    Error::TopologyScanFailed(e.to_string())
}

fn relocate(record: SdbRecord, base: u64) -> SdbRecord {
    let shift = |c: &mut sdb::Component| {
        c.addr_first = c.addr_first.wrapping_add(base);
        c.addr_last = c.addr_last.wrapping_add(base);
    };
    match record {
        SdbRecord::Device(mut d) => {
            shift(&mut d.component);
            SdbRecord::Device(d)
        }
        SdbRecord::Bridge(mut b) => {
            shift(&mut b.component);
            b.sdb_child = b.sdb_child.wrapping_add(base);
            SdbRecord::Bridge(b)
        }
        other => other,
    }
}

/// A bridge is followed only if it sits inside its parent range and its child table sits inside the bridge.
fn bridge_is_sane(bridge: &sdb::Bridge, parent: (u64, u64)) -> bool {
    let c = &bridge.component;
    c.addr_first >= parent.0
        && c.addr_last <= parent.1
        && c.addr_first <= c.addr_last
        && bridge.sdb_child >= c.addr_first
        && bridge.sdb_child <= c.addr_last.saturating_sub(SDB_RECORD_LEN as u64)
}

/// Find the device record that covers `address`, descending through bridges.
///
/// `None` means no record claims the address, the caller then knows neither widths nor byte order.
pub fn find_by_address(
    dev: &mut EbDevice,
    root: u64,
    address: u64,
    max_depth: usize,
) -> Result<Option<sdb::Device>, Error> {
    let mut table_address = root;
    let mut base = 0;
    let mut range = (0, dev.layout().address.max_value());
    for depth in 0..=max_depth {
        let table = read_table(dev, table_address, base)?;
        let mut next = None;
        for record in table.records {
            match record {
                SdbRecord::Device(d) if d.component.contains(address) => {
                    trace!(
                        "{address:#x} belongs to {} at depth {depth}",
                        d.component.product.name
                    );
                    return Ok(Some(d));
                }
                SdbRecord::Bridge(b) if b.component.contains(address) => {
                    if bridge_is_sane(&b, range) {
                        next = Some(b);
                        break;
                    }
                    warn!(
                        "bridge {} covering {address:#x} is malformed",
                        b.component.product.name
                    );
                }
                _ => {}
            }
        }
        let Some(bridge) = next else {
            return Ok(None);
        };
        table_address = bridge.sdb_child;
        base = bridge.component.addr_first;
        range = (bridge.component.addr_first, bridge.component.addr_last);
    }
    Err(Error::TopologyScanFailed(format!(
        "bridges nested deeper than {max_depth} levels"
    )))
}

/// One line of a bus listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScanNode {
    /// 1-based position of the record in each table from the root down.
    pub path: Vec<usize>,
    pub record: SdbRecord,
}

impl ScanNode {
    pub fn path_id(&self) -> String {
        path_string(&self.path)
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

struct Frame {
    records: Vec<SdbRecord>,
    next: usize,
    path: Vec<usize>,
    range: (u64, u64),
}

/// Walk the whole bus tree depth first, listing every record in table order with
/// bridge contents right after the bridge.
///
/// Tables are never read twice and nesting stops at `max_depth`, so a looping or
/// absurdly deep description cannot run away.
pub fn scan(dev: &mut EbDevice, root: u64, max_depth: usize) -> Result<Vec<ScanNode>, Error> {
    let root_table = read_table(dev, root, 0)?;
    debug!(
        "root SDB table at {root:#x} with {} records",
        root_table.records.len()
    );
    let mut visited = HashSet::from([root]);
    let mut nodes = Vec::new();
    let mut stack = vec![Frame {
        records: root_table.records,
        next: 0,
        path: Vec::new(),
        range: (0, dev.layout().address.max_value()),
    }];

    while let Some(frame) = stack.last_mut() {
        let Some(record) = frame.records.get(frame.next).cloned() else {
            stack.pop();
            continue;
        };
        frame.next += 1;
        let mut path = frame.path.clone();
        path.push(frame.next);
        let range = frame.range;

        let child = match &record {
            SdbRecord::Bridge(b) if bridge_is_sane(b, range) => Some(b.clone()),
            SdbRecord::Bridge(b) => {
                warn!("not descending into malformed bridge {}", b.component.product.name);
                None
            }
            _ => None,
        };
        nodes.push(ScanNode {
            path: path.clone(),
            record,
        });

        let Some(bridge) = child else {
            continue;
        };
        if path.len() > max_depth {
            warn!("bridge at {} exceeds depth limit {max_depth}", path_string(&path));
            continue;
        }
        if !visited.insert(bridge.sdb_child) {
            warn!("SDB table at {:#x} already listed", bridge.sdb_child);
            continue;
        }
        match read_table(dev, bridge.sdb_child, bridge.component.addr_first) {
            Ok(table) => stack.push(Frame {
                records: table.records,
                next: 0,
                path,
                range: (bridge.component.addr_first, bridge.component.addr_last),
            }),
            Err(e) => warn!("failed to read SDB table behind {}: {e}", path_string(&path)),
        }
    }
    Ok(nodes)
}

fn path_string(path: &[usize]) -> String {
    path.iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

pub const LISTING_HEADER: &str =
    "BusPath        VendorID         Product   BaseAddress(Hex)  Description";

/// Print nodes as a fixed-column bus listing.
pub fn write_listing(out: &mut dyn Write, nodes: &[ScanNode]) -> io::Result<()> {
    writeln!(out, "{LISTING_HEADER}")?;
    for node in nodes {
        write!(out, "{:<15}", node.path_id())?;
        match &node.record {
            SdbRecord::Device(sdb::Device { component, .. })
            | SdbRecord::Bridge(sdb::Bridge { component, .. }) => writeln!(
                out,
                "{:016x}:{:08x}  {:>16x}  {}",
                component.product.vendor_id,
                component.product.device_id,
                component.addr_first,
                component.product.name
            )?,
            _ => writeln!(out, "---")?,
        }
    }
    Ok(())
}
