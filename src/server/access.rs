//! Per-opcode permission classes and the layered authorization rule.

use crate::protocol::request::N_REQUEST_TYPES;

/// Static permission class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// Any caller that reached the dispatcher.
    Open,
    /// Loopback or local-socket callers. Unused by current opcodes, kept
    /// for forward compatibility.
    Local,
    /// Local-socket callers only. Historically these opcodes required
    /// authentication; that has been removed.
    Auth,
}

/// Trust level of a packet's origin, attached at the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trust {
    Remote,
    Loopback,
    /// The filesystem-namespace socket; access to it is restricted to
    /// privileged users by filesystem permissions.
    LocalSocket,
}

/// Permission classes indexed by opcode. The length is the opcode count;
/// both stay in lockstep or the server will not construct.
pub(crate) const PERMISSIONS: [Permission; N_REQUEST_TYPES] = [
    Permission::Open, // NULL
    Permission::Auth, // ONLINE
    Permission::Auth, // OFFLINE
    Permission::Auth, // BURST
    Permission::Auth, // MODIFY_MINPOLL
    Permission::Auth, // MODIFY_MAXPOLL
    Permission::Auth, // DUMP
    Permission::Auth, // MODIFY_MAXDELAY
    Permission::Auth, // MODIFY_MAXDELAYRATIO
    Permission::Auth, // MODIFY_MAXUPDATESKEW
    Permission::Open, // LOGON
    Permission::Auth, // SETTIME
    Permission::Auth, // LOCAL
    Permission::Auth, // MANUAL
    Permission::Open, // N_SOURCES
    Permission::Open, // SOURCE_DATA
    Permission::Auth, // REKEY
    Permission::Auth, // ALLOW
    Permission::Auth, // ALLOWALL
    Permission::Auth, // DENY
    Permission::Auth, // DENYALL
    Permission::Auth, // CMDALLOW
    Permission::Auth, // CMDALLOWALL
    Permission::Auth, // CMDDENY
    Permission::Auth, // CMDDENYALL
    Permission::Auth, // ACCHECK
    Permission::Auth, // CMDACCHECK
    Permission::Auth, // ADD_SERVER
    Permission::Auth, // ADD_PEER
    Permission::Auth, // DEL_SOURCE
    Permission::Auth, // WRITERTC
    Permission::Auth, // DFREQ
    Permission::Auth, // DOFFSET
    Permission::Open, // TRACKING
    Permission::Open, // SOURCESTATS
    Permission::Open, // RTCREPORT
    Permission::Auth, // TRIMRTC
    Permission::Auth, // CYCLELOGS
    Permission::Auth, // SUBNETS_ACCESSED
    Permission::Auth, // CLIENT_ACCESSES
    Permission::Auth, // CLIENT_ACCESSES_BY_INDEX
    Permission::Open, // MANUAL_LIST
    Permission::Auth, // MANUAL_DELETE
    Permission::Auth, // MAKESTEP
    Permission::Open, // ACTIVITY
    Permission::Auth, // MODIFY_MINSTRATUM
    Permission::Auth, // MODIFY_POLLTARGET
    Permission::Auth, // MODIFY_MAXDELAYDEVRATIO
    Permission::Auth, // RESELECT
    Permission::Auth, // RESELECTDISTANCE
    Permission::Auth, // MODIFY_MAKESTEP
    Permission::Open, // SMOOTHING
    Permission::Auth, // SMOOTHTIME
    Permission::Auth, // REFRESH
];

/// The per-opcode permission check, a pure function of origin trust and
/// permission class. Everything from the local socket is allowed.
pub(crate) fn is_authorized(trust: Trust, permission: Permission) -> bool {
    match trust {
        Trust::LocalSocket => true,
        Trust::Loopback => !matches!(permission, Permission::Auth),
        Trust::Remote => matches!(permission, Permission::Open),
    }
}
