use std::time::Duration;

const SELECTED_DEFAULTS: usize = cfg!(feature = "default-timeout-100ms") as usize
    + cfg!(feature = "default-timeout-250ms") as usize
    + cfg!(feature = "default-timeout-1s") as usize;

const _: () = assert!(
    SELECTED_DEFAULTS == 1,
    "etherbone_host needs exactly one default-timeout-* feature"
);

/// Used when neither the caller nor the command line asks for a specific wait.
const DEFAULT_TIMEOUT: Duration = if cfg!(feature = "default-timeout-100ms") {
    Duration::from_millis(100)
} else if cfg!(feature = "default-timeout-250ms") {
    Duration::from_millis(250)
} else {
    Duration::from_secs(1)
};

/// How long a link waits for the slave to answer.
///
/// The same bound applies to every probe while opening a device and to the reply of each cycle,
/// so an unresponsive slave costs `open_attempts` times this before the open fails.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Timeout {
    /// Compile time default of this build.
    #[default]
    Default,
    Millis(u64),
}

impl Timeout {
    pub fn duration(&self) -> Duration {
        match self {
            Timeout::Default => DEFAULT_TIMEOUT,
            Timeout::Millis(millis) => Duration::from_millis(*millis),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(value: Duration) -> Self {
        Timeout::Millis(value.as_millis() as u64)
    }
}
