//! # Wire Protocol
//!
//! The versioned, fixed-layout command and monitoring protocol.
//!
//! Each exchange is a single request datagram answered by at most one reply
//! datagram. All multi-byte integers are network order; timestamps travel as
//! (seconds, microseconds) pairs; IP addresses carry an explicit family tag;
//! non-integer quantities use a packed 32-bit floating point form.
//!
//! Both directions are implemented: the daemon decodes requests and encodes
//! replies, and client tooling (and the test suite) does the reverse.
//!
//! ## Modules
//! - [`wire`]: scalar codecs (float, address, timestamp)
//! - [`request`]: opcodes, request payloads, per-opcode lengths
//! - [`reply`]: status taxonomy, reply tags and payloads

pub mod reply;
pub mod request;
pub mod wire;


/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 6;

/// Lowest caller version that understands a BAD-VERSION reply. Mismatched
/// callers at or above this floor get one so they can downgrade; older
/// callers are dropped silently.
pub const VERSION_MISMATCH_COMPAT: u8 = 5;

/// Packet type of a request.
pub const PKT_TYPE_CMD_REQUEST: u8 = 1;
/// Packet type of a reply.
pub const PKT_TYPE_CMD_REPLY: u8 = 2;

/// Offset of the payload union in a request packet. The legacy utoken,
/// token and auth fields before it remain on the wire for size
/// compatibility and are ignored.
pub const REQUEST_HEADER_LEN: usize = 36;

/// Offset of the payload union in a reply packet.
pub const REPLY_HEADER_LEN: usize = 28;

/// Upper bound on per-opcode request padding.
pub const MAX_PADDING_LEN: usize = 16;

/// Row limit of a CLIENT_ACCESSES_BY_INDEX reply page.
pub const MAX_CLIENT_ACCESSES: usize = 8;

/// Row limit of a MANUAL_LIST reply.
pub const MAX_MANUAL_LIST_SAMPLES: usize = 32;
