use std::time::Duration;

use crate::target::NetworkTarget;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Timeout")]
    Timeout,
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Link is closed")]
    Closed,
}

impl From<std::io::Error> for LinkError {
    fn from(value: std::io::Error) -> Self {
        LinkError::Io(value.to_string())
    }
}

/// Blocking packet link to one Etherbone slave.
pub trait Link: Send {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Wait for one reply. Datagram links return whatever arrived, stream links read exactly
    /// `expected_len` bytes.
    fn receive(&mut self, expected_len: usize, timeout: Duration) -> Result<Vec<u8>, LinkError>;

    fn close(&mut self) -> Result<(), LinkError>;
}

/// Opens links, one per bus access.
pub trait Connector {
    fn connect(
        &mut self,
        target: &NetworkTarget,
        timeout: Duration,
    ) -> Result<Box<dyn Link>, LinkError>;
}
