//! # Command Server
//!
//! The long-lived state object behind the command and monitoring endpoint:
//! up to three datagram sockets, the command-namespace CIDR table, and the
//! dispatcher that routes validated requests into the daemon.
//!
//! ## Lifecycle
//! - [`CmdMon::bind`] verifies the length-table invariants and opens the
//!   IP sockets.
//! - [`CmdMon::open_local_socket`] creates the filesystem-namespace socket
//!   and is called separately, after the process has dropped privileges.
//! - [`CmdMon::run`] serves until the cancellation token fires; one
//!   datagram is fully processed, reply included, before the next read.
//! - [`CmdMon::shutdown`] closes the sockets and removes the local socket
//!   node.
//!
//! There are no process-wide singletons: all state lives in the `CmdMon`
//! value, so a second initialization is unrepresentable rather than a
//! runtime error.

mod access;
mod dispatch;
mod handlers;
mod transport;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::CommandConfig;
use crate::daemon::{AccessTable, Collaborators, FilterStatus};
use crate::error::Result;
use crate::protocol::request;
use crate::protocol::wire::Addr;
use transport::{Transport, RX_BUFFER_LEN};

pub use access::{Permission, Trust};

/// The command and monitoring endpoint.
pub struct CmdMon {
    transport: Transport,
    /// The command-namespace CIDR table, owned for the endpoint's whole
    /// lifetime.
    access: Box<dyn AccessTable>,
    daemon: Collaborators,
    socket_path: Option<PathBuf>,
}

impl CmdMon {
    /// Open the IP command sockets and take ownership of the command
    /// access table. Fails when the configuration requests a command port
    /// and neither IP family socket can be bound.
    pub async fn bind(
        config: &CommandConfig,
        daemon: Collaborators,
        access: Box<dyn AccessTable>,
    ) -> Result<CmdMon> {
        request::verify_length_table();

        let transport = Transport::bind(config).await?;
        info!(port = config.port, "command endpoint ready");

        Ok(CmdMon {
            transport,
            access,
            daemon,
            socket_path: config.socket_path.clone(),
        })
    }

    /// Create the local command socket. Separate from [`CmdMon::bind`]
    /// because it must run after the process has dropped privileges, so
    /// the socket node gets the unprivileged ownership.
    pub fn open_local_socket(&mut self) -> Result<()> {
        if let Some(path) = self.socket_path.clone() {
            self.transport.open_local(&path)?;
        }
        Ok(())
    }

    /// Serve requests until `shutdown` is cancelled. Requests are handled
    /// strictly one at a time in the order the sockets deliver them.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut buf = [0u8; RX_BUFFER_LEN];
        loop {
            let received = tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                r = self.transport.recv(&mut buf) => r,
            };
            match received {
                Ok(Some((len, origin))) => self.process_datagram(&buf[..len], &origin),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "error reading from command socket"),
            }
        }
    }

    /// Tear the endpoint down, unlinking the local socket node.
    pub fn shutdown(mut self) {
        self.transport.close();
    }

    /// Mutate the command-namespace CIDR table.
    pub fn add_access_restriction(
        &self,
        address: Addr,
        subnet_bits: i32,
        allow: bool,
        all: bool,
    ) -> FilterStatus {
        match (allow, all) {
            (true, false) => self.access.allow(address, subnet_bits),
            (true, true) => self.access.allow_all(address, subnet_bits),
            (false, false) => self.access.deny(address, subnet_bits),
            (false, true) => self.access.deny_all(address, subnet_bits),
        }
    }

    /// Query the command-namespace CIDR table.
    pub fn check_access_restriction(&self, address: Addr) -> bool {
        self.access.is_allowed(address)
    }
}
