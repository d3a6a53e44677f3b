use std::collections::HashMap;

use etherbone_host::BusEngine;
use tracing::warn;

use crate::params::ParamOperation;
use crate::{Error, Operation};

/// Named set of operations, usually one per board or IP block.
#[derive(Clone, Debug)]
pub struct Device {
    pub name: String,
    pub doc: String,
    operations: HashMap<String, Operation>,
}

impl Device {
    pub fn new(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Device {
            name: name.into(),
            doc: doc.into(),
            operations: HashMap::new(),
        }
    }

    pub fn add_operation(&mut self, operation: Operation) -> Result<(), Error> {
        if self.operations.contains_key(&operation.name) {
            warn!("{}: operation '{}' already registered", self.name, operation.name);
            return Err(Error::DuplicateOperation {
                device: self.name.clone(),
                operation: operation.name,
            });
        }
        self.operations.insert(operation.name.clone(), operation);
        Ok(())
    }

    pub fn with_operation(mut self, operation: Operation) -> Result<Self, Error> {
        self.add_operation(operation)?;
        Ok(self)
    }

    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.operations.get(name)
    }

    pub fn operation_mut(&mut self, name: &str) -> Option<&mut Operation> {
        self.operations.get_mut(name)
    }

    /// Operation names, sorted.
    pub fn operation_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.operations.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn execute<E: BusEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        operation: &str,
        params: &ParamOperation,
    ) -> Result<Vec<u64>, Error> {
        self.lookup(operation)?.execute(engine, params)
    }

    /// Undo the autoincrement drift of one operation.
    pub fn reset(&mut self, operation: &str) -> Result<(), Error> {
        self.lookup(operation)?.reset();
        Ok(())
    }

    /// Reset every operation to its initial addresses.
    pub fn reset_all(&mut self) {
        self.operations.values_mut().for_each(Operation::reset);
    }

    fn lookup(&mut self, operation: &str) -> Result<&mut Operation, Error> {
        match self.operations.get_mut(operation) {
            Some(op) => Ok(op),
            None => {
                warn!("{}: no operation '{operation}'", self.name);
                Err(Error::OperationNotFound {
                    device: self.name.clone(),
                    operation: operation.to_string(),
                })
            }
        }
    }
}
