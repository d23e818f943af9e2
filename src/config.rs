//! # Configuration
//!
//! Settings for the command and monitoring endpoint.
//!
//! This module provides the subset of daemon configuration the endpoint
//! consumes: the command port, the per-family bind addresses, and the path
//! of the local control socket.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//!
//! ## Security Considerations
//! - The default bind addresses are the loopback addresses; exposing the
//!   command port on a routable interface should be combined with a CIDR
//!   allow table, since remote callers can still issue the open subset of
//!   commands.
//! - Access to the local socket is controlled entirely by filesystem
//!   permissions on its parent directory.

use crate::error::{CmdMonError, Result};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::{Path, PathBuf};

/// Default UDP port of the command endpoint.
pub const DEFAULT_COMMAND_PORT: u16 = 323;

/// Configuration of the command and monitoring endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandConfig {
    /// UDP port for the IPv4 and IPv6 command sockets. 0 disables both.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bind address for the IPv4 command socket; loopback when absent.
    #[serde(default)]
    pub bind_address: Option<Ipv4Addr>,

    /// Bind address for the IPv6 command socket; loopback when absent.
    #[serde(default)]
    pub bind_address6: Option<Ipv6Addr>,

    /// Path of the local datagram socket; `None` disables it.
    #[serde(default)]
    pub socket_path: Option<PathBuf>,
}

fn default_port() -> u16 {
    DEFAULT_COMMAND_PORT
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_COMMAND_PORT,
            bind_address: None,
            bind_address6: None,
            socket_path: None,
        }
    }
}

impl CommandConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| CmdMonError::Config(format!("Failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| CmdMonError::Config(format!("Failed to parse TOML: {e}")))
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.port == 0 && self.socket_path.is_none() {
            errors.push(
                "command port is 0 and no socket path is set; the endpoint would be unreachable"
                    .to_string(),
            );
        }

        if let Some(path) = &self.socket_path {
            if path.as_os_str().is_empty() {
                errors.push("socket_path is empty; omit it to disable the local socket".into());
            }
            // sun_path limit on every supported platform
            if path.as_os_str().len() >= 108 {
                errors.push(format!("socket_path {} is too long", path.display()));
            }
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(CmdMonError::Config(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}
