use std::collections::HashMap;

use etherbone_host::BusEngine;
use tracing::warn;

use crate::params::ParamOperation;
use crate::{Device, Error};

/// All devices reachable by one application.
#[derive(Clone, Debug, Default)]
pub struct System {
    devices: HashMap<String, Device>,
}

impl System {
    pub fn new() -> Self {
        System::default()
    }

    pub fn add_device(&mut self, device: Device) -> Result<(), Error> {
        if self.devices.contains_key(&device.name) {
            warn!("device '{}' already registered", device.name);
            return Err(Error::DuplicateDevice(device.name));
        }
        self.devices.insert(device.name.clone(), device);
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&Device> {
        self.devices.get(name)
    }

    pub fn device_mut(&mut self, name: &str) -> Option<&mut Device> {
        self.devices.get_mut(name)
    }

    pub fn device_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.devices.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn execute<E: BusEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        device: &str,
        operation: &str,
        params: &ParamOperation,
    ) -> Result<Vec<u64>, Error> {
        self.lookup(device)?.execute(engine, operation, params)
    }

    pub fn reset(&mut self, device: &str, operation: &str) -> Result<(), Error> {
        self.lookup(device)?.reset(operation)
    }

    pub fn reset_all(&mut self) {
        self.devices.values_mut().for_each(Device::reset_all);
    }

    fn lookup(&mut self, device: &str) -> Result<&mut Device, Error> {
        match self.devices.get_mut(device) {
            Some(dev) => Ok(dev),
            None => {
                warn!("no device '{device}'");
                Err(Error::DeviceNotFound(device.to_string()))
            }
        }
    }
}
