//! # Error Types
//!
//! Error handling for the command and monitoring endpoint.
//!
//! This module defines the error variants that can occur while standing up
//! or tearing down the endpoint and while moving packets through the wire
//! codec.
//!
//! ## Error Categories
//! - **I/O Errors**: socket creation, bind, and datagram failures
//! - **Configuration Errors**: unusable bind addresses or socket paths
//! - **Codec Errors**: packets that cannot be decoded or encoded
//!
//! Per-request protocol violations (wrong version, short payload, unknown
//! opcode) are not errors at this level: the dispatcher answers them with a
//! reply status or drops them, so they never propagate as `Err`.

use std::io;
use thiserror::Error;

/// Primary error type for endpoint operations.
#[derive(Error, Debug)]
pub enum CmdMonError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The configuration requested a command port but neither IP family
    /// socket could be bound.
    #[error("could not open any command socket")]
    NoCommandSocket,

    #[error("packet too short: need {need} bytes, got {got}")]
    ShortPacket { need: usize, got: usize },

    #[error("unknown command {0}")]
    UnknownCommand(u16),

    #[error("unknown reply tag {0}")]
    UnknownReplyTag(u16),

    #[error("unknown status {0}")]
    UnknownStatus(u16),

    #[error("wrong packet type {0}")]
    WrongPacketType(u8),
}

/// Type alias for Results using CmdMonError
pub type Result<T> = std::result::Result<T, CmdMonError>;
