use anyhow::{Context, Result};
use etherbone_host::{EngineConfig, EtherboneEngine, NetConnector, NetworkTarget, Timeout};
use etherbone_ops::{
    Access, AccessMode, ExecutePolicy, MismatchPolicy, Operation, ParamConfig, ParamOperation,
    RetryPolicy,
};

use crate::cli::{Cli, Register};

pub(crate) struct Session {
    engine: EtherboneEngine<NetConnector>,
    policy: ExecutePolicy,
    target: NetworkTarget,
}

impl Session {
    pub(crate) fn new(cli: &Cli) -> Result<Self> {
        let connector = NetConnector::new().context("Starting network runtime")?;
        let config = EngineConfig {
            timeout: cli.timeout_ms.map(Timeout::Millis).unwrap_or_default(),
            open_attempts: cli.attempts,
            probe: !cli.no_probe,
            max_scan_depth: cli.max_depth,
        };
        Ok(Session {
            engine: EtherboneEngine::new(connector).with_config(config),
            policy: ExecutePolicy {
                mismatch: MismatchPolicy::Strict,
                retry: RetryPolicy {
                    max_retries: cli.retries.0,
                },
            },
            target: cli.target.clone(),
        })
    }

    fn access(&self, reg: &Register, mode: AccessMode) -> Access {
        Access::new(reg.address)
            .with_mode(mode)
            .with_offset(reg.offset)
            .with_align(reg.width)
            .with_mask(reg.mask, reg.mask_op)
            .with_config(reg.config)
            .with_target(self.target.clone())
    }

    fn operation(&self, name: &str, access: Access) -> Operation {
        Operation::new(name, "")
            .with_step(access, ParamConfig::none())
            .with_policy(self.policy)
    }

    pub(crate) fn scan(&mut self) -> Result<()> {
        let access = Access::new(0)
            .with_mode(AccessMode::Scan)
            .with_target(self.target.clone());
        let mut op = self.operation("scan", access);
        op.execute(&mut self.engine, &ParamOperation::with_len(1))
            .with_context(|| format!("Scanning {}", self.target))?;
        Ok(())
    }

    pub(crate) fn read(&mut self, reg: &Register, count: u32) -> Result<()> {
        let mut op = self.operation(
            "read",
            self.access(reg, AccessMode::Read).with_autoincrement(1),
        );
        let digits = reg.width.bytes() * 2;
        for _ in 0..count {
            let address = op.steps()[0].access.effective_address();
            let values = op
                .execute(&mut self.engine, &ParamOperation::with_len(1))
                .with_context(|| format!("Reading {address:#x} on {}", self.target))?;
            for value in values {
                println!("{address:#010x}: {value:#0w$x}", w = digits + 2);
            }
        }
        Ok(())
    }

    pub(crate) fn write(&mut self, reg: &Register, value: u64) -> Result<()> {
        let mut op = self.operation(
            "write",
            self.access(reg, AccessMode::Write).with_value(value),
        );
        op.execute(&mut self.engine, &ParamOperation::with_len(1))
            .with_context(|| format!("Writing {:#x} on {}", reg.address, self.target))?;
        Ok(())
    }

    pub(crate) fn rmw(&mut self, reg: &Register) -> Result<()> {
        let mut op = self.operation("rmw", self.access(reg, AccessMode::WriteAfterRead));
        op.execute(&mut self.engine, &ParamOperation::with_len(1))
            .with_context(|| {
                format!(
                    "Read-modify-write of {:#x} on {}",
                    reg.address, self.target
                )
            })?;
        Ok(())
    }
}
