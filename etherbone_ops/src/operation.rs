use etherbone_host::{Access, AccessMode, BusEngine};
use tracing::{debug, error, warn};

use crate::Error;
use crate::bind::bind;
use crate::params::{ParamConfig, ParamOperation};

/// What to do when the caller's fields do not match what an access requires.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum MismatchPolicy {
    /// Log and skip the access, the rest of the operation still runs.
    #[default]
    Skip,
    /// Stop and return the mismatch.
    Strict,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first failed attempt. `None` retries forever.
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: Some(3),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ExecutePolicy {
    pub mismatch: MismatchPolicy,
    pub retry: RetryPolicy,
}

/// One access template and the fields its caller has to provide.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Step {
    pub access: Access,
    pub config: ParamConfig,
}

/// Named sequence of accesses executed in order.
#[derive(Clone, Debug)]
pub struct Operation {
    pub name: String,
    pub doc: String,
    pub policy: ExecutePolicy,
    steps: Vec<Step>,
}

impl Operation {
    pub fn new(name: impl Into<String>, doc: impl Into<String>) -> Self {
        Operation {
            name: name.into(),
            doc: doc.into(),
            policy: ExecutePolicy::default(),
            steps: Vec::new(),
        }
    }

    pub fn with_step(mut self, access: Access, config: ParamConfig) -> Self {
        self.push(access, config);
        self
    }

    pub fn with_policy(mut self, policy: ExecutePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn push(&mut self, access: Access, config: ParamConfig) {
        self.steps.push(Step { access, config });
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Bind every step to its caller values and run it on `engine`.
    ///
    /// Returns one value per executed read, so the result can be shorter than the step list.
    pub fn execute<E: BusEngine + ?Sized>(
        &mut self,
        engine: &mut E,
        params: &ParamOperation,
    ) -> Result<Vec<u64>, Error> {
        if params.len() != self.steps.len() {
            match self.policy.mismatch {
                MismatchPolicy::Strict => {
                    return Err(Error::ParameterCount {
                        operation: self.name.clone(),
                        expected: self.steps.len(),
                        given: params.len(),
                    });
                }
                MismatchPolicy::Skip => warn!(
                    "{}: {} parameter sets for {} accesses, extra entries are ignored",
                    self.name,
                    params.len(),
                    self.steps.len()
                ),
            }
        }

        let mut results = Vec::new();
        for (index, (step, given)) in self.steps.iter_mut().zip(params.iter()).enumerate() {
            let mut access = match bind(&step.access, &step.config, given) {
                Ok(access) => access,
                Err(e @ Error::ParameterMismatch { .. })
                    if self.policy.mismatch == MismatchPolicy::Skip =>
                {
                    warn!("{}: skipping access {index}: {}", self.name, e.at(index));
                    continue;
                }
                Err(e) => return Err(e.at(index)),
            };

            let mut attempts = 0u32;
            let read = loop {
                attempts += 1;
                match access.execute(engine) {
                    Ok(read) => break read,
                    Err(e) => match self.policy.retry.max_retries {
                        Some(max) if attempts > max => {
                            error!(
                                "{}: access {index} failed {attempts} times, giving up: {e}",
                                self.name
                            );
                            return Err(Error::RetriesExhausted {
                                operation: self.name.clone(),
                                index,
                                attempts,
                                source: e,
                            });
                        }
                        _ => warn!("{}: access {index} attempt {attempts} failed: {e}", self.name),
                    },
                }
            };
            step.access.address = access.address;

            if access.mode == AccessMode::Read {
                let value = read.unwrap_or(access.value);
                debug!("{}: access {index} read {value:#x}", self.name);
                results.push(value);
            }
        }
        Ok(results)
    }

    /// Undo autoincrement drift of every step.
    pub fn reset(&mut self) {
        self.steps.iter_mut().for_each(|s| s.access.reset());
    }
}
