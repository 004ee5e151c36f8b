use std::{fmt, str::FromStr};

use thiserror::Error;

/// `local:remote`: expose the hidden side's `local_port` as `remote_port` on
/// the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelMapping {
    pub local_port: u16,
    pub remote_port: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingParseError {
    #[error("bad ports {0:?} (expected local:remote)")]
    Format(String),
    #[error("bad port {0:?} in {1:?}")]
    Port(String, String),
}

impl FromStr for TunnelMapping {
    type Err = MappingParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let Some((local, remote)) = raw.split_once(':') else {
            return Err(MappingParseError::Format(s.to_string()));
        };
        let port = |p: &str| {
            p.trim()
                .parse::<u16>()
                .map_err(|_| MappingParseError::Port(p.to_string(), s.to_string()))
        };
        Ok(Self {
            local_port: port(local)?,
            remote_port: port(remote)?,
        })
    }
}

impl fmt::Display for TunnelMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local_port, self.remote_port)
    }
}
