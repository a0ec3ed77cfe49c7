//! Configuration and constants shared by the endpoint, relays, and CLI.

use clap::ValueEnum;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Chunk size for reading the local source channel (1 MiB).
pub const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Listen backlog for the server role. Only one peer is ever accepted.
pub const LISTEN_BACKLOG: u32 = 1;

/// Address the server binds to and the client connects to.
///
/// Reaching a remote host is a matter of changing [`BridgeConfig::host`];
/// the wire protocol does not care.
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Which side of the TCP connection this process plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    /// Bind, listen, and accept a single peer
    #[value(name = "s")]
    Server,
    /// Connect to a listening peer
    #[value(name = "c")]
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Server => f.write_str("server"),
            Role::Client => f.write_str("client"),
        }
    }
}

/// Everything needed to run one bridge session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub role: Role,
    pub host: IpAddr,
    pub port: u16,
    /// Channel the bridge writes received data into (consumed locally).
    pub read_pipe: PathBuf,
    /// Channel the bridge reads outgoing data from (produced locally).
    pub write_pipe: PathBuf,
}

impl BridgeConfig {
    /// Creates a config targeting [`DEFAULT_HOST`].
    pub fn new(
        role: Role,
        port: u16,
        read_pipe: impl Into<PathBuf>,
        write_pipe: impl Into<PathBuf>,
    ) -> Self {
        Self {
            role,
            host: DEFAULT_HOST,
            port,
            read_pipe: read_pipe.into(),
            write_pipe: write_pipe.into(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_uses_loopback() {
        let config = BridgeConfig::new(Role::Client, 9001, "/tmp/rd", "/tmp/wr");
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.socket_addr(), "127.0.0.1:9001".parse().unwrap());
        assert_eq!(config.read_pipe, PathBuf::from("/tmp/rd"));
        assert_eq!(config.write_pipe, PathBuf::from("/tmp/wr"));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Server.to_string(), "server");
        assert_eq!(Role::Client.to_string(), "client");
    }
}
