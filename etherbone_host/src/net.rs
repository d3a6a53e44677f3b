use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, trace};

use crate::link::{Connector, Link, LinkError};
use crate::target::{NetworkTarget, Proto};

const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Opens UDP and TCP links to real devices.
///
/// Links are blocking, they drive their socket on a private current-thread runtime,
/// so this must not be used from inside another tokio runtime.
#[derive(Clone)]
pub struct NetConnector {
    rt: Arc<Runtime>,
}

impl NetConnector {
    pub fn new() -> Result<Self, LinkError> {
        let rt = Builder::new_current_thread().enable_all().build()?;
        Ok(NetConnector { rt: Arc::new(rt) })
    }
}

impl Connector for NetConnector {
    fn connect(
        &mut self,
        target: &NetworkTarget,
        timeout: Duration,
    ) -> Result<Box<dyn Link>, LinkError> {
        let remote = (target.host.as_str(), target.port);
        debug!("connecting to {target}");
        match target.proto {
            Proto::Udp => {
                let socket = self.rt.block_on(async {
                    let socket = UdpSocket::bind("0.0.0.0:0").await?;
                    tokio::time::timeout(timeout, socket.connect(remote))
                        .await
                        .map_err(|_| LinkError::Timeout)??;
                    Ok::<_, LinkError>(socket)
                })?;
                trace!("udp local addr: {:?}", socket.local_addr());
                Ok(Box::new(UdpLink {
                    rt: self.rt.clone(),
                    socket,
                }))
            }
            Proto::Tcp => {
                let stream = self.rt.block_on(async {
                    tokio::time::timeout(timeout, TcpStream::connect(remote))
                        .await
                        .map_err(|_| LinkError::Timeout)?
                        .map_err(LinkError::from)
                })?;
                stream.set_nodelay(true)?;
                Ok(Box::new(TcpLink {
                    rt: self.rt.clone(),
                    stream: Some(stream),
                }))
            }
        }
    }
}

struct UdpLink {
    rt: Arc<Runtime>,
    socket: UdpSocket,
}

impl Link for UdpLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        self.rt.block_on(self.socket.send(bytes))?;
        Ok(())
    }

    fn receive(&mut self, _expected_len: usize, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self.rt.block_on(async {
            tokio::time::timeout(timeout, self.socket.recv(&mut buf))
                .await
                .map_err(|_| LinkError::Timeout)?
                .map_err(LinkError::from)
        })?;
        buf.truncate(len);
        Ok(buf)
    }

    fn close(&mut self) -> Result<(), LinkError> {
        Ok(())
    }
}

struct TcpLink {
    rt: Arc<Runtime>,
    stream: Option<TcpStream>,
}

impl Link for TcpLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::Closed)?;
        self.rt.block_on(stream.write_all(bytes))?;
        Ok(())
    }

    fn receive(&mut self, expected_len: usize, timeout: Duration) -> Result<Vec<u8>, LinkError> {
        let stream = self.stream.as_mut().ok_or(LinkError::Closed)?;
        let mut buf = vec![0u8; expected_len];
        self.rt.block_on(async {
            tokio::time::timeout(timeout, stream.read_exact(&mut buf))
                .await
                .map_err(|_| LinkError::Timeout)?
                .map_err(LinkError::from)
        })?;
        Ok(buf)
    }

    fn close(&mut self) -> Result<(), LinkError> {
        let Some(mut stream) = self.stream.take() else {
            return Err(LinkError::Closed);
        };
        self.rt.block_on(stream.shutdown())?;
        Ok(())
    }
}
