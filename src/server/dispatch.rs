//! The validation pipeline between a received datagram and a handler.

use tracing::debug;

use super::access::{is_authorized, Trust, PERMISSIONS};
use super::transport::Origin;
use super::CmdMon;
use crate::daemon::CommandClass;
use crate::protocol::reply::{Reply, Status};
use crate::protocol::request::{OpCode, RequestHeader, RequestPayload};
use crate::protocol::{
    PKT_TYPE_CMD_REQUEST, PROTOCOL_VERSION, REPLY_HEADER_LEN, REQUEST_HEADER_LEN,
    VERSION_MISMATCH_COMPAT,
};

impl CmdMon {
    /// Validate one datagram and run at most one handler. Every malformed
    /// packet bumps the bad-packet account; callers denied by the CIDR
    /// table are dropped before any accounting and stay invisible.
    pub(super) fn process_datagram(&self, datagram: &[u8], origin: &Origin) {
        let now = self.daemon.scheduler.last_event_time();
        let trust = origin.trust();
        let from_addr = origin.wire_addr();

        debug!(bytes = datagram.len(), from = %origin, "received command packet");

        if trust == Trust::Remote && !self.access.is_allowed(from_addr) {
            return;
        }

        let header = match RequestHeader::peek(datagram) {
            Some(header) => header,
            None => {
                self.daemon.client_log.record_command(from_addr, CommandClass::BadPacket, now);
                return;
            }
        };

        let expected = header.expected_len(datagram.len());
        if expected < REQUEST_HEADER_LEN
            || datagram.len() < REPLY_HEADER_LEN
            || header.pkt_type != PKT_TYPE_CMD_REQUEST
            || header.res1 != 0
            || header.res2 != 0
        {
            self.daemon.client_log.record_command(from_addr, CommandClass::BadPacket, now);
            return;
        }

        let mut reply = Reply::template();

        if header.version != PROTOCOL_VERSION {
            debug!(
                version = header.version,
                expected = PROTOCOL_VERSION,
                from = %origin,
                "command packet with wrong protocol version"
            );
            self.daemon.client_log.record_command(from_addr, CommandClass::BadPacket, now);
            if header.version >= VERSION_MISMATCH_COMPAT {
                reply.status = Status::BadPktVersion;
                self.transmit_reply(&reply, &header, origin);
            }
            return;
        }

        let op = match OpCode::from_u16(header.command) {
            Some(op) => op,
            None => {
                debug!(command = header.command, from = %origin, "invalid command");
                self.daemon.client_log.record_command(from_addr, CommandClass::BadPacket, now);
                reply.status = Status::Invalid;
                self.transmit_reply(&reply, &header, origin);
                return;
            }
        };

        if datagram.len() < expected {
            debug!(from = %origin, "incorrectly sized command packet");
            self.daemon.client_log.record_command(from_addr, CommandClass::BadPacket, now);
            reply.status = Status::BadPktLength;
            self.transmit_reply(&reply, &header, origin);
            return;
        }

        self.daemon.client_log.record_command(from_addr, CommandClass::Normal, now);

        if !is_authorized(trust, PERMISSIONS[op as usize]) {
            reply.status = Status::Unauthorized;
        } else {
            let payload = RequestPayload::decode(op, &mut &datagram[REQUEST_HEADER_LEN..])
                .unwrap_or_else(|| {
                    unreachable!("retired opcodes are dropped by the length check")
                });
            self.dispatch(payload, now, &mut reply);
        }

        self.transmit_reply(&reply, &header, origin);
    }

    fn transmit_reply(&self, reply: &Reply, request: &RequestHeader, origin: &Origin) {
        let bytes = reply.encode(request.command, request.sequence);
        self.transport.send_reply(&bytes, origin);
    }
}
