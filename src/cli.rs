//! CLI definitions for ppmap.

use clap::{builder::PossibleValuesParser, Parser};
use std::path::PathBuf;

use crate::common::{BridgeConfig, Role};
use crate::error::{Error, Result};

/// Bridge one TCP connection to a pair of local pipes.
#[derive(Debug, Parser)]
#[command(name = "ppmap")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log level (debug|info|warn|error)
    #[arg(long, default_value = "info", value_parser = PossibleValuesParser::new(["debug", "info", "warn", "error"]))]
    pub log_level: String,

    /// Operation type: s (server) or c (client)
    #[arg(value_enum)]
    pub role: Role,

    /// TCP port (1-65535)
    #[arg(value_parser = parse_port_digits)]
    pub port: String,

    /// Pipe the local process reads from (data received from the peer)
    pub read_pipe: PathBuf,

    /// Pipe the local process writes to (data sent to the peer)
    pub write_pipe: PathBuf,
}

/// Accepts any run of decimal digits; the range is checked later so every
/// numeric port outside 1-65535 fails the same way.
fn parse_port_digits(s: &str) -> std::result::Result<String, String> {
    if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        Ok(s.to_string())
    } else {
        Err(format!("`{s}` is not a port number"))
    }
}

impl Cli {
    /// Validates the arguments clap cannot check on its own.
    pub fn bridge_config(&self) -> Result<BridgeConfig> {
        let port = self
            .port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| {
                Error::Config(format!("invalid port number {}: expected 1-65535", self.port))
            })?;

        Ok(BridgeConfig::new(
            self.role,
            port,
            self.read_pipe.clone(),
            self.write_pipe.clone(),
        ))
    }
}
