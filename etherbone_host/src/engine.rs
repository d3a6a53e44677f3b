use std::io::Write;

use etherbone_wire::{DataWidth, Endianness, Format, WidthSet};
use tracing::{debug, info, trace};

use crate::Error;
use crate::access::{Access, AccessMode};
use crate::device::EbDevice;
use crate::link::Connector;
use crate::plan::Plan;
use crate::target::NetworkTarget;
use crate::timeout::Timeout;
use crate::topology::{self, ScanNode};

/// Single-shot bus transactions described by an [Access].
///
/// Every call is independent: whatever connection it needs is opened and closed inside the call.
pub trait BusEngine {
    /// Read `align` bytes at the access' effective address, the mask is applied to the result.
    fn read(&mut self, access: &Access) -> Result<u64, Error>;

    /// Write `mask OP value`, truncated to `align` bytes.
    fn write(&mut self, access: &Access) -> Result<(), Error>;

    /// Read, apply the mask, write the result back.
    fn write_after_read(&mut self, access: &Access) -> Result<(), Error>;

    /// Print the bus topology of the access target.
    fn scan(&mut self, access: &Access) -> Result<(), Error>;
}

#[derive(Copy, Clone, Debug)]
pub struct EngineConfig {
    pub timeout: Timeout,
    /// Probes sent before giving up on a device.
    pub open_attempts: u32,
    /// Look up widths and byte order of the target in SDB before each access.
    pub probe: bool,
    pub max_scan_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            timeout: Timeout::Default,
            open_attempts: 3,
            probe: true,
            max_scan_depth: 16,
        }
    }
}

/// [BusEngine] speaking Etherbone through links from `C`.
pub struct EtherboneEngine<C> {
    connector: C,
    config: EngineConfig,
    scan_sink: Box<dyn Write + Send>,
}

impl<C: Connector> EtherboneEngine<C> {
    pub fn new(connector: C) -> Self {
        EtherboneEngine {
            connector,
            config: EngineConfig::default(),
            scan_sink: Box::new(std::io::stdout()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Where [BusEngine::scan] prints its listing, stdout by default.
    pub fn with_scan_sink(mut self, sink: Box<dyn Write + Send>) -> Self {
        self.scan_sink = sink;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn connector_mut(&mut self) -> &mut C {
        &mut self.connector
    }

    fn open(&mut self, target: &NetworkTarget) -> Result<EbDevice, Error> {
        let timeout = self.config.timeout.duration();
        let link = self
            .connector
            .connect(target, timeout)
            .map_err(|e| Error::TransportOpenFailed {
                target: target.to_string(),
                reason: e.to_string(),
            })?;
        EbDevice::open(link, self.config.open_attempts, timeout)
    }

    /// Open a device, run `f` on it and close it again. A failure of `f` wins over a close failure.
    fn session<T>(
        &mut self,
        target: &NetworkTarget,
        f: impl FnOnce(&mut EbDevice, &EngineConfig) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut dev = self.open(target)?;
        let r = f(&mut dev, &self.config);
        let closed = dev.close();
        let value = r?;
        closed?;
        Ok(value)
    }

    /// Walk the SDB tree of `target` and return every record found.
    pub fn scan_topology(&mut self, target: &NetworkTarget) -> Result<Vec<ScanNode>, Error> {
        self.session(target, |dev, config| {
            let root = dev.sdb_root().map_err(into_scan_error)?;
            topology::scan(dev, root, config.max_scan_depth).map_err(into_scan_error)
        })
    }
}

fn into_scan_error(e: Error) -> Error {
    match e {
        Error::Timeout | Error::TopologyScanFailed(_) => e,
        other => Error::TopologyScanFailed(other.to_string()),
    }
}

/// Sizes and byte order to use for `address`.
fn target_info(
    dev: &mut EbDevice,
    config: &EngineConfig,
    address: u64,
    is_config: bool,
) -> Result<(WidthSet, Option<Endianness>), Error> {
    if is_config {
        return Ok((WidthSet::up_to(dev.line()), Some(Endianness::Big)));
    }
    if !config.probe {
        return Ok((WidthSet::ALL, None));
    }
    let root = dev.sdb_root().map_err(into_scan_error)?;
    match topology::find_by_address(dev, root, address, config.max_scan_depth)
        .map_err(into_scan_error)?
    {
        Some(record) => {
            trace!(
                "{address:#x} is in {}: {} endian, sizes {:?}",
                record.component.product.name,
                record.endian(),
                record.widths()
            );
            Ok((record.widths(), Some(record.endian())))
        }
        None => {
            debug!("{address:#x} is not described by SDB, byte order unknown");
            Ok((WidthSet::ALL, None))
        }
    }
}

fn plan_for(
    dev: &mut EbDevice,
    config: &EngineConfig,
    address: u64,
    size: DataWidth,
    is_config: bool,
) -> Result<Plan, Error> {
    let (widths, endian) = target_info(dev, config, address, is_config)?;
    let plan = Plan::new(address, size, endian, widths, dev.line())?;
    debug!("{} access of {size} at {address:#x}", plan.kind());
    Ok(plan)
}

fn read_with(dev: &mut EbDevice, plan: &Plan, is_config: bool) -> Result<u64, Error> {
    let mut cycle = dev.cycle();
    for (address, format) in plan.operations() {
        cycle.read(address, format, is_config);
    }
    let parts = cycle.run()?;
    Ok(plan.assemble(&parts))
}

fn write_with(dev: &mut EbDevice, plan: &Plan, value: u64, is_config: bool) -> Result<(), Error> {
    match plan {
        Plan::Widen { wide, aligned, .. } => {
            let word = read_with_wide(dev, *aligned, *wide, is_config)?;
            let merged = plan.merge(word, value);
            trace!("widened write: {word:#x} -> {merged:#x}");
            let mut cycle = dev.cycle();
            cycle.write(*aligned, *wide, merged, is_config);
            cycle.run()?;
        }
        _ => {
            let mut cycle = dev.cycle();
            for ((address, format), part) in plan.operations().into_iter().zip(plan.split(value)) {
                cycle.write(address, format, part, is_config);
            }
            cycle.run()?;
        }
    }
    Ok(())
}

fn read_with_wide(
    dev: &mut EbDevice,
    address: u64,
    format: Format,
    is_config: bool,
) -> Result<u64, Error> {
    let mut cycle = dev.cycle();
    cycle.read(address, format, is_config);
    cycle
        .run()?
        .first()
        .copied()
        .ok_or_else(|| Error::CycleFailed("no data for widened read".into()))
}

fn masked_write_value(access: &Access, value: u64) -> u64 {
    access.mask_op.apply(access.mask, value) & access.align.value_mask()
}

impl<C: Connector> BusEngine for EtherboneEngine<C> {
    fn read(&mut self, access: &Access) -> Result<u64, Error> {
        access.expect_mode(AccessMode::Read)?;
        let address = access.effective_address();
        let data = self.session(&access.target, |dev, config| {
            let plan = plan_for(dev, config, address, access.align, access.is_config)?;
            read_with(dev, &plan, access.is_config)
        })?;
        let value = access.mask_op.apply(access.mask, data);
        debug!("read {address:#x} = {data:#x}, masked {value:#x}");
        Ok(value)
    }

    fn write(&mut self, access: &Access) -> Result<(), Error> {
        access.expect_mode(AccessMode::Write)?;
        let address = access.effective_address();
        let value = masked_write_value(access, access.value);
        self.session(&access.target, |dev, config| {
            let plan = plan_for(dev, config, address, access.align, access.is_config)?;
            write_with(dev, &plan, value, access.is_config)
        })?;
        debug!("write {address:#x} = {value:#x}");
        Ok(())
    }

    fn write_after_read(&mut self, access: &Access) -> Result<(), Error> {
        access.expect_mode(AccessMode::WriteAfterRead)?;
        let address = access.effective_address();
        let value = self.session(&access.target, |dev, config| {
            let plan = plan_for(dev, config, address, access.align, access.is_config)?;
            let data = read_with(dev, &plan, access.is_config)?;
            let value = access.mask_op.apply(access.mask, data) & access.align.value_mask();
            write_with(dev, &plan, value, access.is_config)?;
            Ok(value)
        })?;
        debug!("read-modify-write {address:#x} = {value:#x}");
        Ok(())
    }

    fn scan(&mut self, access: &Access) -> Result<(), Error> {
        access.expect_mode(AccessMode::Scan)?;
        let nodes = self.scan_topology(&access.target)?;
        info!("{} SDB records on {}", nodes.len(), access.target);
        topology::write_listing(&mut self.scan_sink, &nodes)
            .and_then(|_| self.scan_sink.flush())
            .map_err(|e| Error::TopologyScanFailed(e.to_string()))
    }
}
