use std::fmt;
use std::str::FromStr;

use etherbone_wire::DataWidth;
use strum_macros::FromRepr;
use tracing::trace;

use crate::Error;
use crate::engine::BusEngine;
use crate::target::NetworkTarget;

/// What an access does when executed. The discriminants are the letters used in configuration files.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, FromRepr)]
#[repr(u8)]
pub enum AccessMode {
    Read = b'R',
    Write = b'W',
    #[default]
    Scan = b'S',
    /// Read, combine with the mask, write the result back.
    WriteAfterRead = b'C',
}

impl FromStr for AccessMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().bytes();
        match (chars.next(), chars.next()) {
            (Some(c), None) => AccessMode::from_repr(c.to_ascii_uppercase())
                .ok_or_else(|| Error::Parse(format!("unknown access mode '{s}'"))),
            _ => Err(Error::Parse(format!("unknown access mode '{s}'"))),
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8 as char)
    }
}

/// How `mask` is combined with a value.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum MaskOp {
    #[default]
    Or,
    And,
}

impl MaskOp {
    pub fn apply(self, mask: u64, value: u64) -> u64 {
        match self {
            MaskOp::Or => value | mask,
            MaskOp::And => value & mask,
        }
    }
}

impl FromStr for MaskOp {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OR" => Ok(MaskOp::Or),
            "AND" => Ok(MaskOp::And),
            _ => Err(Error::Parse(format!("unknown mask operator '{s}'"))),
        }
    }
}

/// Template of one register access.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Access {
    pub address: u64,
    /// Address restored by [Access::reset].
    pub address_init: u64,
    pub offset: u64,
    /// Value to write, or the last value read.
    pub value: u64,
    pub mask: u64,
    pub mask_op: MaskOp,
    /// Target the Etherbone config space instead of the bus.
    pub is_config: bool,
    pub mode: AccessMode,
    pub align: DataWidth,
    /// Step in units of `align` added to `address` after every successful execute.
    pub autoincrement: i64,
    pub target: NetworkTarget,
}

impl Default for Access {
    fn default() -> Self {
        Access {
            address: 0,
            address_init: 0,
            offset: 0,
            value: 0,
            mask: 0,
            mask_op: MaskOp::Or,
            is_config: false,
            mode: AccessMode::Scan,
            align: DataWidth::W32,
            autoincrement: 0,
            target: NetworkTarget::default(),
        }
    }
}

impl Access {
    pub fn new(address: u64) -> Self {
        Access {
            address,
            address_init: address,
            ..Default::default()
        }
    }

    pub fn with_mode(mut self, mode: AccessMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    pub fn with_mask(mut self, mask: u64, op: MaskOp) -> Self {
        self.mask = mask;
        self.mask_op = op;
        self
    }

    pub fn with_align(mut self, align: DataWidth) -> Self {
        self.align = align;
        self
    }

    pub fn with_autoincrement(mut self, step: i64) -> Self {
        self.autoincrement = step;
        self
    }

    pub fn with_config(mut self, is_config: bool) -> Self {
        self.is_config = is_config;
        self
    }

    pub fn with_target(mut self, target: NetworkTarget) -> Self {
        self.target = target;
        self
    }

    /// Bus address the next execute will touch.
    pub fn effective_address(&self) -> u64 {
        self.address.wrapping_add(self.offset)
    }

    pub fn reset(&mut self) {
        self.address = self.address_init;
    }

    /// Check that this access is meant for the `expected` engine path.
    pub fn expect_mode(&self, expected: AccessMode) -> Result<(), Error> {
        if self.mode == expected {
            Ok(())
        } else {
            Err(Error::InvalidOperation {
                expected,
                actual: self.mode,
            })
        }
    }

    /// Run the access on `engine` according to its mode. Reads store and return the value.
    pub fn execute<E: BusEngine + ?Sized>(&mut self, engine: &mut E) -> Result<Option<u64>, Error> {
        trace!("execute {self}");
        let read = match self.mode {
            AccessMode::Read => {
                let value = engine.read(self)?;
                self.value = value;
                Some(value)
            }
            AccessMode::Write => {
                engine.write(self)?;
                None
            }
            AccessMode::WriteAfterRead => {
                engine.write_after_read(self)?;
                None
            }
            AccessMode::Scan => {
                engine.scan(self)?;
                None
            }
        };
        self.advance();
        Ok(read)
    }

    fn advance(&mut self) {
        let step = self.autoincrement.wrapping_mul(self.align.bytes() as i64);
        self.address = self.address.wrapping_add_signed(step);
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}{:#x}+{:#x} {} value={:#x} mask={:?}({:#x}) @ {}",
            self.mode,
            if self.is_config { "cfg:" } else { "" },
            self.address,
            self.offset,
            self.align,
            self.value,
            self.mask_op,
            self.mask,
            self.target
        )
    }
}
