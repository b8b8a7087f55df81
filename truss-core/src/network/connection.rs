use std::fmt;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::channel::{ChannelOptions, SecureChannel};
use crate::error::TrussError;

/// Port used when a configured one is reserved or missing.
pub const DEFAULT_PORT: u16 = 8080;

/// Ports at or below this are refused.
pub const MIN_PORT: u16 = 1024;

/// Where a truss node listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    host: String,
    port: u16,
}

impl ConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Replaces a privileged port with [`DEFAULT_PORT`].
    pub fn with_usable_port(mut self) -> Self {
        self.port = usable_port(self.port);
        self
    }

    /// Open a TCP connection and wrap it in a channel keyed by `psk`.
    pub async fn connect(
        &self,
        psk: &str,
        options: ChannelOptions,
    ) -> Result<SecureChannel<TcpStream>, TrussError> {
        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;
        debug!(peer = %self, "connected");
        Ok(SecureChannel::new(stream, psk, options))
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Ports must be above 1024; anything else falls back to 8080.
pub fn usable_port(port: u16) -> u16 {
    if port > MIN_PORT {
        port
    } else {
        warn!(port, fallback = DEFAULT_PORT, "port out of range; using default");
        DEFAULT_PORT
    }
}
