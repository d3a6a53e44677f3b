use std::fmt;
use std::str::FromStr;

use etherbone_wire::DEFAULT_PORT;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Proto {
    #[default]
    Udp,
    Tcp,
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proto::Udp => f.write_str("udp"),
            Proto::Tcp => f.write_str("tcp"),
        }
    }
}

/// Where an Etherbone slave is reached: `<proto>/<host>[/<port>]`, e.g. `udp/192.168.0.10`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct NetworkTarget {
    pub proto: Proto,
    pub host: String,
    pub port: u16,
}

impl NetworkTarget {
    pub fn new(proto: Proto, host: impl Into<String>) -> Self {
        NetworkTarget {
            proto,
            host: host.into(),
            port: DEFAULT_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

impl Default for NetworkTarget {
    fn default() -> Self {
        NetworkTarget::new(Proto::Udp, "localhost")
    }
}

impl fmt::Display for NetworkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEFAULT_PORT {
            write!(f, "{}/{}", self.proto, self.host)
        } else {
            write!(f, "{}/{}/{}", self.proto, self.host, self.port)
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("Expected <proto>/<host>[/<port>], got '{0}'")]
    Format(String),
    #[error("Unknown transport '{0}', expected udp or tcp")]
    Proto(String),
    #[error("Bad port '{0}'")]
    Port(String),
}

impl FromStr for NetworkTarget {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        let (Some(proto), Some(host)) = (parts.next(), parts.next()) else {
            return Err(TargetParseError::Format(s.to_string()));
        };
        if host.is_empty() {
            return Err(TargetParseError::Format(s.to_string()));
        }
        let proto = match proto.to_ascii_lowercase().as_str() {
            "udp" => Proto::Udp,
            "tcp" => Proto::Tcp,
            _ => return Err(TargetParseError::Proto(proto.to_string())),
        };
        let port = match parts.next() {
            Some(port) => port
                .parse()
                .map_err(|_| TargetParseError::Port(port.to_string()))?,
            None => DEFAULT_PORT,
        };
        if parts.next().is_some() {
            return Err(TargetParseError::Format(s.to_string()));
        }
        Ok(NetworkTarget {
            proto,
            host: host.to_string(),
            port,
        })
    }
}
