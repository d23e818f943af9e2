//! # cmdmon
//!
//! Command and monitoring endpoint for a clock-discipline daemon.
//!
//! This crate implements the request/reply endpoint through which a
//! privileged local administration client, and optionally remote
//! operators, inspect daemon state and mutate its configuration at
//! runtime. It speaks a versioned, fixed-layout binary protocol over
//! three datagram transports with distinct trust assumptions:
//!
//! - **IPv4 UDP** and **IPv6 UDP** on the configured command port
//! - a **filesystem-namespace datagram socket**, whose callers are
//!   unconditionally trusted because filesystem permissions gate access
//!
//! Authorization layers socket-origin trust, a CIDR allow/deny table and
//! a static per-opcode permission class; callers denied by the CIDR table
//! are dropped without a reply. Handlers are thin adapters into the
//! daemon subsystems behind the [`daemon`] traits and never block: the
//! endpoint runs on a cooperative, strictly serial receive loop.
//!
//! ## Example
//! ```ignore
//! use cmdmon::config::CommandConfig;
//! use cmdmon::server::CmdMon;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = CommandConfig::from_file("cmdmon.toml")?;
//! let mut server = CmdMon::bind(&config, collaborators, access_table).await?;
//! // ... drop privileges ...
//! server.open_local_socket()?;
//!
//! let shutdown = CancellationToken::new();
//! server.run(shutdown.clone()).await;
//! server.shutdown();
//! ```
//!
//! Encryption, streamed replies and remote authentication are explicitly
//! out of scope; remote callers invoking a mutating command are answered
//! with an unauthorized status.

pub mod config;
pub mod daemon;
pub mod error;
pub mod protocol;
pub mod server;

pub use config::CommandConfig;
pub use error::{CmdMonError, Result};
pub use server::CmdMon;
