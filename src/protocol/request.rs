//! Request packets: opcodes, payloads, and the per-opcode length table.

use bytes::{Buf, BufMut};

use super::wire::{self, Addr, WireTimestamp};
use super::{PKT_TYPE_CMD_REQUEST, PROTOCOL_VERSION, REPLY_HEADER_LEN, REQUEST_HEADER_LEN};
use crate::error::{CmdMonError, Result};

/// Number of request opcodes, retired ones included.
pub const N_REQUEST_TYPES: usize = 54;

/// Flag bits of an ADD_SERVER / ADD_PEER request.
pub const ADDSRC_ONLINE: u32 = 0x1;
pub const ADDSRC_AUTOOFFLINE: u32 = 0x2;
pub const ADDSRC_IBURST: u32 = 0x4;
pub const ADDSRC_PREFER: u32 = 0x8;
pub const ADDSRC_NOSELECT: u32 = 0x10;

/// MANUAL request options.
pub const MANUAL_DISABLE: i32 = 0;
pub const MANUAL_ENABLE: i32 = 1;
pub const MANUAL_RESET: i32 = 2;

/// SMOOTHTIME request options.
pub const SMOOTHTIME_RESET: i32 = 0;
pub const SMOOTHTIME_ACTIVATE: i32 = 1;

/// Request opcodes. The numbering is part of the wire protocol and
/// includes two retired entries whose command length is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OpCode {
    Null = 0,
    Online = 1,
    Offline = 2,
    Burst = 3,
    ModifyMinpoll = 4,
    ModifyMaxpoll = 5,
    Dump = 6,
    ModifyMaxdelay = 7,
    ModifyMaxdelayRatio = 8,
    ModifyMaxupdateskew = 9,
    Logon = 10,
    Settime = 11,
    Local = 12,
    Manual = 13,
    NSources = 14,
    SourceData = 15,
    Rekey = 16,
    Allow = 17,
    AllowAll = 18,
    Deny = 19,
    DenyAll = 20,
    CmdAllow = 21,
    CmdAllowAll = 22,
    CmdDeny = 23,
    CmdDenyAll = 24,
    AcCheck = 25,
    CmdAcCheck = 26,
    AddServer = 27,
    AddPeer = 28,
    DelSource = 29,
    WriteRtc = 30,
    Dfreq = 31,
    Doffset = 32,
    Tracking = 33,
    Sourcestats = 34,
    RtcReport = 35,
    TrimRtc = 36,
    CycleLogs = 37,
    SubnetsAccessed = 38,
    ClientAccesses = 39,
    ClientAccessesByIndex = 40,
    ManualList = 41,
    ManualDelete = 42,
    MakeStep = 43,
    Activity = 44,
    ModifyMinstratum = 45,
    ModifyPolltarget = 46,
    ModifyMaxdelayDevRatio = 47,
    Reselect = 48,
    ReselectDistance = 49,
    ModifyMakestep = 50,
    Smoothing = 51,
    SmoothTime = 52,
    Refresh = 53,
}

impl OpCode {
    pub fn from_u16(value: u16) -> Option<OpCode> {
        use OpCode::*;
        Some(match value {
            0 => Null,
            1 => Online,
            2 => Offline,
            3 => Burst,
            4 => ModifyMinpoll,
            5 => ModifyMaxpoll,
            6 => Dump,
            7 => ModifyMaxdelay,
            8 => ModifyMaxdelayRatio,
            9 => ModifyMaxupdateskew,
            10 => Logon,
            11 => Settime,
            12 => Local,
            13 => Manual,
            14 => NSources,
            15 => SourceData,
            16 => Rekey,
            17 => Allow,
            18 => AllowAll,
            19 => Deny,
            20 => DenyAll,
            21 => CmdAllow,
            22 => CmdAllowAll,
            23 => CmdDeny,
            24 => CmdDenyAll,
            25 => AcCheck,
            26 => CmdAcCheck,
            27 => AddServer,
            28 => AddPeer,
            29 => DelSource,
            30 => WriteRtc,
            31 => Dfreq,
            32 => Doffset,
            33 => Tracking,
            34 => Sourcestats,
            35 => RtcReport,
            36 => TrimRtc,
            37 => CycleLogs,
            38 => SubnetsAccessed,
            39 => ClientAccesses,
            40 => ClientAccessesByIndex,
            41 => ManualList,
            42 => ManualDelete,
            43 => MakeStep,
            44 => Activity,
            45 => ModifyMinstratum,
            46 => ModifyPolltarget,
            47 => ModifyMaxdelayDevRatio,
            48 => Reselect,
            49 => ReselectDistance,
            50 => ModifyMakestep,
            51 => Smoothing,
            52 => SmoothTime,
            53 => Refresh,
            _ => return None,
        })
    }

    /// Size of the opcode's payload, excluding header and padding.
    pub fn payload_len(self) -> usize {
        use OpCode::*;
        match self {
            Null | NSources | Rekey | WriteRtc | Tracking | RtcReport | TrimRtc | CycleLogs
            | ManualList | MakeStep | Activity | Reselect | Smoothing | Refresh => 0,
            Online | Offline => 2 * Addr::WIRE_LEN,
            Burst => 2 * Addr::WIRE_LEN + 8,
            ModifyMinpoll | ModifyMaxpoll | ModifyMinstratum | ModifyPolltarget => {
                Addr::WIRE_LEN + 4
            }
            ModifyMaxdelay | ModifyMaxdelayRatio | ModifyMaxdelayDevRatio => Addr::WIRE_LEN + 4,
            ModifyMaxupdateskew => 4,
            ModifyMakestep => 8,
            Dump => 4,
            Logon | Settime => WireTimestamp::WIRE_LEN,
            Local => 8,
            Manual => 4,
            SourceData | Sourcestats => 4,
            Allow | AllowAll | Deny | DenyAll | CmdAllow | CmdAllowAll | CmdDeny | CmdDenyAll => {
                Addr::WIRE_LEN + 4
            }
            AcCheck | CmdAcCheck => Addr::WIRE_LEN,
            AddServer | AddPeer => Addr::WIRE_LEN + 32,
            DelSource => Addr::WIRE_LEN,
            Dfreq => 4,
            Doffset => 8,
            SubnetsAccessed | ClientAccesses => 0,
            ClientAccessesByIndex => 8,
            ManualDelete => 4,
            ReselectDistance => 4,
            SmoothTime => 4,
        }
    }

    /// Trailing unused bytes inside the opcode's payload union.
    pub fn padding_len(self) -> usize {
        match self {
            OpCode::Dump => 4,
            _ => 0,
        }
    }

    /// Total length of a request carrying this opcode, or zero for retired
    /// opcodes the daemon no longer understands.
    pub fn command_len(self) -> usize {
        match self {
            OpCode::SubnetsAccessed | OpCode::ClientAccesses => 0,
            _ => REQUEST_HEADER_LEN + self.payload_len(),
        }
    }
}

/// ALLOW / DENY family payload, both namespaces.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AllowDeny {
    pub ip: Addr,
    pub subnet_bits: i32,
}

/// ACCHECK / CMDACCHECK payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcCheck {
    pub ip: Addr,
}

/// ADD_SERVER / ADD_PEER payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NtpSource {
    pub ip_addr: Addr,
    pub port: u32,
    pub minpoll: i32,
    pub maxpoll: i32,
    pub presend_minpoll: i32,
    pub authkey: u32,
    pub max_delay: f64,
    pub max_delay_ratio: f64,
    pub flags: u32,
}

impl NtpSource {
    fn put<B: BufMut>(&self, buf: &mut B) {
        self.ip_addr.put(buf);
        buf.put_u32(self.port);
        buf.put_i32(self.minpoll);
        buf.put_i32(self.maxpoll);
        buf.put_i32(self.presend_minpoll);
        buf.put_u32(self.authkey);
        wire::put_float(buf, self.max_delay);
        wire::put_float(buf, self.max_delay_ratio);
        buf.put_u32(self.flags);
    }

    fn get<B: Buf>(buf: &mut B) -> Self {
        NtpSource {
            ip_addr: Addr::get(buf),
            port: buf.get_u32(),
            minpoll: buf.get_i32(),
            maxpoll: buf.get_i32(),
            presend_minpoll: buf.get_i32(),
            authkey: buf.get_u32(),
            max_delay: wire::get_float(buf),
            max_delay_ratio: wire::get_float(buf),
            flags: buf.get_u32(),
        }
    }
}

/// The opcode-tagged request payload. One variant per live opcode; the
/// opcode is the wire discriminator.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestPayload {
    Null,
    Online { mask: Addr, address: Addr },
    Offline { mask: Addr, address: Addr },
    Burst { mask: Addr, address: Addr, n_good_samples: i32, n_total_samples: i32 },
    ModifyMinpoll { address: Addr, new_minpoll: i32 },
    ModifyMaxpoll { address: Addr, new_maxpoll: i32 },
    Dump,
    ModifyMaxdelay { address: Addr, new_max_delay: f64 },
    ModifyMaxdelayRatio { address: Addr, new_max_delay_ratio: f64 },
    ModifyMaxupdateskew { new_max_update_skew: f64 },
    Logon { ts: WireTimestamp },
    Settime { ts: WireTimestamp },
    Local { on_off: i32, stratum: i32 },
    Manual { option: i32 },
    NSources,
    SourceData { index: i32 },
    Rekey,
    Allow(AllowDeny),
    AllowAll(AllowDeny),
    Deny(AllowDeny),
    DenyAll(AllowDeny),
    CmdAllow(AllowDeny),
    CmdAllowAll(AllowDeny),
    CmdDeny(AllowDeny),
    CmdDenyAll(AllowDeny),
    AcCheck(AcCheck),
    CmdAcCheck(AcCheck),
    AddServer(NtpSource),
    AddPeer(NtpSource),
    DelSource { ip_addr: Addr },
    WriteRtc,
    Dfreq { dfreq: f64 },
    Doffset { sec: i32, usec: i32 },
    Tracking,
    Sourcestats { index: i32 },
    RtcReport,
    TrimRtc,
    CycleLogs,
    ClientAccessesByIndex { first_index: u32, n_indices: u32 },
    ManualList,
    ManualDelete { index: i32 },
    MakeStep,
    Activity,
    ModifyMinstratum { address: Addr, new_min_stratum: i32 },
    ModifyPolltarget { address: Addr, new_poll_target: i32 },
    ModifyMaxdelayDevRatio { address: Addr, new_max_delay_dev_ratio: f64 },
    Reselect,
    ReselectDistance { distance: f64 },
    ModifyMakestep { limit: i32, threshold: f64 },
    Smoothing,
    SmoothTime { option: i32 },
    Refresh,
}

impl RequestPayload {
    /// Decode the payload named by `op` from `buf`. The caller must have
    /// verified that `buf` holds at least `op.payload_len()` bytes.
    ///
    /// Retired opcodes have no payload form and decode as `None`.
    pub fn decode<B: Buf>(op: OpCode, buf: &mut B) -> Option<RequestPayload> {
        use RequestPayload as P;
        Some(match op {
            OpCode::Null => P::Null,
            OpCode::Online => P::Online { mask: Addr::get(buf), address: Addr::get(buf) },
            OpCode::Offline => P::Offline { mask: Addr::get(buf), address: Addr::get(buf) },
            OpCode::Burst => P::Burst {
                mask: Addr::get(buf),
                address: Addr::get(buf),
                n_good_samples: buf.get_i32(),
                n_total_samples: buf.get_i32(),
            },
            OpCode::ModifyMinpoll => P::ModifyMinpoll {
                address: Addr::get(buf),
                new_minpoll: buf.get_i32(),
            },
            OpCode::ModifyMaxpoll => P::ModifyMaxpoll {
                address: Addr::get(buf),
                new_maxpoll: buf.get_i32(),
            },
            OpCode::Dump => P::Dump,
            OpCode::ModifyMaxdelay => P::ModifyMaxdelay {
                address: Addr::get(buf),
                new_max_delay: wire::get_float(buf),
            },
            OpCode::ModifyMaxdelayRatio => P::ModifyMaxdelayRatio {
                address: Addr::get(buf),
                new_max_delay_ratio: wire::get_float(buf),
            },
            OpCode::ModifyMaxupdateskew => P::ModifyMaxupdateskew {
                new_max_update_skew: wire::get_float(buf),
            },
            OpCode::Logon => P::Logon { ts: WireTimestamp::get(buf) },
            OpCode::Settime => P::Settime { ts: WireTimestamp::get(buf) },
            OpCode::Local => P::Local { on_off: buf.get_i32(), stratum: buf.get_i32() },
            OpCode::Manual => P::Manual { option: buf.get_i32() },
            OpCode::NSources => P::NSources,
            OpCode::SourceData => P::SourceData { index: buf.get_i32() },
            OpCode::Rekey => P::Rekey,
            OpCode::Allow => P::Allow(get_allow_deny(buf)),
            OpCode::AllowAll => P::AllowAll(get_allow_deny(buf)),
            OpCode::Deny => P::Deny(get_allow_deny(buf)),
            OpCode::DenyAll => P::DenyAll(get_allow_deny(buf)),
            OpCode::CmdAllow => P::CmdAllow(get_allow_deny(buf)),
            OpCode::CmdAllowAll => P::CmdAllowAll(get_allow_deny(buf)),
            OpCode::CmdDeny => P::CmdDeny(get_allow_deny(buf)),
            OpCode::CmdDenyAll => P::CmdDenyAll(get_allow_deny(buf)),
            OpCode::AcCheck => P::AcCheck(AcCheck { ip: Addr::get(buf) }),
            OpCode::CmdAcCheck => P::CmdAcCheck(AcCheck { ip: Addr::get(buf) }),
            OpCode::AddServer => P::AddServer(NtpSource::get(buf)),
            OpCode::AddPeer => P::AddPeer(NtpSource::get(buf)),
            OpCode::DelSource => P::DelSource { ip_addr: Addr::get(buf) },
            OpCode::WriteRtc => P::WriteRtc,
            OpCode::Dfreq => P::Dfreq { dfreq: wire::get_float(buf) },
            OpCode::Doffset => P::Doffset { sec: buf.get_i32(), usec: buf.get_i32() },
            OpCode::Tracking => P::Tracking,
            OpCode::Sourcestats => P::Sourcestats { index: buf.get_i32() },
            OpCode::RtcReport => P::RtcReport,
            OpCode::TrimRtc => P::TrimRtc,
            OpCode::CycleLogs => P::CycleLogs,
            OpCode::SubnetsAccessed | OpCode::ClientAccesses => return None,
            OpCode::ClientAccessesByIndex => P::ClientAccessesByIndex {
                first_index: buf.get_u32(),
                n_indices: buf.get_u32(),
            },
            OpCode::ManualList => P::ManualList,
            OpCode::ManualDelete => P::ManualDelete { index: buf.get_i32() },
            OpCode::MakeStep => P::MakeStep,
            OpCode::Activity => P::Activity,
            OpCode::ModifyMinstratum => P::ModifyMinstratum {
                address: Addr::get(buf),
                new_min_stratum: buf.get_i32(),
            },
            OpCode::ModifyPolltarget => P::ModifyPolltarget {
                address: Addr::get(buf),
                new_poll_target: buf.get_i32(),
            },
            OpCode::ModifyMaxdelayDevRatio => P::ModifyMaxdelayDevRatio {
                address: Addr::get(buf),
                new_max_delay_dev_ratio: wire::get_float(buf),
            },
            OpCode::Reselect => P::Reselect,
            OpCode::ReselectDistance => P::ReselectDistance { distance: wire::get_float(buf) },
            OpCode::ModifyMakestep => P::ModifyMakestep {
                limit: buf.get_i32(),
                threshold: wire::get_float(buf),
            },
            OpCode::Smoothing => P::Smoothing,
            OpCode::SmoothTime => P::SmoothTime { option: buf.get_i32() },
            OpCode::Refresh => P::Refresh,
        })
    }

    /// The opcode this payload travels under.
    pub fn opcode(&self) -> OpCode {
        use RequestPayload as P;
        match self {
            P::Null => OpCode::Null,
            P::Online { .. } => OpCode::Online,
            P::Offline { .. } => OpCode::Offline,
            P::Burst { .. } => OpCode::Burst,
            P::ModifyMinpoll { .. } => OpCode::ModifyMinpoll,
            P::ModifyMaxpoll { .. } => OpCode::ModifyMaxpoll,
            P::Dump => OpCode::Dump,
            P::ModifyMaxdelay { .. } => OpCode::ModifyMaxdelay,
            P::ModifyMaxdelayRatio { .. } => OpCode::ModifyMaxdelayRatio,
            P::ModifyMaxupdateskew { .. } => OpCode::ModifyMaxupdateskew,
            P::Logon { .. } => OpCode::Logon,
            P::Settime { .. } => OpCode::Settime,
            P::Local { .. } => OpCode::Local,
            P::Manual { .. } => OpCode::Manual,
            P::NSources => OpCode::NSources,
            P::SourceData { .. } => OpCode::SourceData,
            P::Rekey => OpCode::Rekey,
            P::Allow(_) => OpCode::Allow,
            P::AllowAll(_) => OpCode::AllowAll,
            P::Deny(_) => OpCode::Deny,
            P::DenyAll(_) => OpCode::DenyAll,
            P::CmdAllow(_) => OpCode::CmdAllow,
            P::CmdAllowAll(_) => OpCode::CmdAllowAll,
            P::CmdDeny(_) => OpCode::CmdDeny,
            P::CmdDenyAll(_) => OpCode::CmdDenyAll,
            P::AcCheck(_) => OpCode::AcCheck,
            P::CmdAcCheck(_) => OpCode::CmdAcCheck,
            P::AddServer(_) => OpCode::AddServer,
            P::AddPeer(_) => OpCode::AddPeer,
            P::DelSource { .. } => OpCode::DelSource,
            P::WriteRtc => OpCode::WriteRtc,
            P::Dfreq { .. } => OpCode::Dfreq,
            P::Doffset { .. } => OpCode::Doffset,
            P::Tracking => OpCode::Tracking,
            P::Sourcestats { .. } => OpCode::Sourcestats,
            P::RtcReport => OpCode::RtcReport,
            P::TrimRtc => OpCode::TrimRtc,
            P::CycleLogs => OpCode::CycleLogs,
            P::ClientAccessesByIndex { .. } => OpCode::ClientAccessesByIndex,
            P::ManualList => OpCode::ManualList,
            P::ManualDelete { .. } => OpCode::ManualDelete,
            P::MakeStep => OpCode::MakeStep,
            P::Activity => OpCode::Activity,
            P::ModifyMinstratum { .. } => OpCode::ModifyMinstratum,
            P::ModifyPolltarget { .. } => OpCode::ModifyPolltarget,
            P::ModifyMaxdelayDevRatio { .. } => OpCode::ModifyMaxdelayDevRatio,
            P::Reselect => OpCode::Reselect,
            P::ReselectDistance { .. } => OpCode::ReselectDistance,
            P::ModifyMakestep { .. } => OpCode::ModifyMakestep,
            P::Smoothing => OpCode::Smoothing,
            P::SmoothTime { .. } => OpCode::SmoothTime,
            P::Refresh => OpCode::Refresh,
        }
    }

    fn put<B: BufMut>(&self, buf: &mut B) {
        use RequestPayload as P;
        match self {
            P::Null | P::Dump | P::NSources | P::Rekey | P::WriteRtc | P::Tracking
            | P::RtcReport | P::TrimRtc | P::CycleLogs | P::ManualList | P::MakeStep
            | P::Activity | P::Reselect | P::Smoothing | P::Refresh => {}
            P::Online { mask, address } | P::Offline { mask, address } => {
                mask.put(buf);
                address.put(buf);
            }
            P::Burst { mask, address, n_good_samples, n_total_samples } => {
                mask.put(buf);
                address.put(buf);
                buf.put_i32(*n_good_samples);
                buf.put_i32(*n_total_samples);
            }
            P::ModifyMinpoll { address, new_minpoll } => {
                address.put(buf);
                buf.put_i32(*new_minpoll);
            }
            P::ModifyMaxpoll { address, new_maxpoll } => {
                address.put(buf);
                buf.put_i32(*new_maxpoll);
            }
            P::ModifyMaxdelay { address, new_max_delay } => {
                address.put(buf);
                wire::put_float(buf, *new_max_delay);
            }
            P::ModifyMaxdelayRatio { address, new_max_delay_ratio } => {
                address.put(buf);
                wire::put_float(buf, *new_max_delay_ratio);
            }
            P::ModifyMaxupdateskew { new_max_update_skew } => {
                wire::put_float(buf, *new_max_update_skew);
            }
            P::Logon { ts } | P::Settime { ts } => ts.put(buf),
            P::Local { on_off, stratum } => {
                buf.put_i32(*on_off);
                buf.put_i32(*stratum);
            }
            P::Manual { option } | P::SmoothTime { option } => buf.put_i32(*option),
            P::SourceData { index } | P::Sourcestats { index } | P::ManualDelete { index } => {
                buf.put_i32(*index)
            }
            P::Allow(ad) | P::AllowAll(ad) | P::Deny(ad) | P::DenyAll(ad) | P::CmdAllow(ad)
            | P::CmdAllowAll(ad) | P::CmdDeny(ad) | P::CmdDenyAll(ad) => {
                ad.ip.put(buf);
                buf.put_i32(ad.subnet_bits);
            }
            P::AcCheck(ac) | P::CmdAcCheck(ac) => ac.ip.put(buf),
            P::AddServer(src) | P::AddPeer(src) => src.put(buf),
            P::DelSource { ip_addr } => ip_addr.put(buf),
            P::Dfreq { dfreq } => wire::put_float(buf, *dfreq),
            P::Doffset { sec, usec } => {
                buf.put_i32(*sec);
                buf.put_i32(*usec);
            }
            P::ClientAccessesByIndex { first_index, n_indices } => {
                buf.put_u32(*first_index);
                buf.put_u32(*n_indices);
            }
            P::ModifyMinstratum { address, new_min_stratum } => {
                address.put(buf);
                buf.put_i32(*new_min_stratum);
            }
            P::ModifyPolltarget { address, new_poll_target } => {
                address.put(buf);
                buf.put_i32(*new_poll_target);
            }
            P::ModifyMaxdelayDevRatio { address, new_max_delay_dev_ratio } => {
                address.put(buf);
                wire::put_float(buf, *new_max_delay_dev_ratio);
            }
            P::ReselectDistance { distance } => wire::put_float(buf, *distance),
            P::ModifyMakestep { limit, threshold } => {
                buf.put_i32(*limit);
                wire::put_float(buf, *threshold);
            }
        }
    }
}

fn get_allow_deny<B: Buf>(buf: &mut B) -> AllowDeny {
    AllowDeny {
        ip: Addr::get(buf),
        subnet_bits: buf.get_i32(),
    }
}

/// A full in-memory request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub attempt: u16,
    pub sequence: u32,
    pub payload: RequestPayload,
}

impl Request {
    pub fn new(payload: RequestPayload) -> Self {
        Request { attempt: 0, sequence: 0, payload }
    }

    /// Serialize at the current protocol version, legacy auth fields
    /// zeroed, padded to the opcode's command length.
    pub fn encode(&self) -> Vec<u8> {
        let op = self.payload.opcode();
        let mut buf = Vec::with_capacity(op.command_len().max(REQUEST_HEADER_LEN));
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(PKT_TYPE_CMD_REQUEST);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16(op as u16);
        buf.put_u16(self.attempt);
        buf.put_u32(self.sequence);
        buf.put_u32(0); // utoken
        buf.put_u32(0); // token
        buf.put_slice(&[0u8; 16]); // auth
        self.payload.put(&mut buf);
        buf.resize(buf.len() + op.padding_len(), 0);
        buf
    }

    /// Strict decode of a request datagram. The server's dispatcher does
    /// its own staged validation to pick reply statuses; this entry point
    /// is for client tooling and tests.
    pub fn decode(bytes: &[u8]) -> Result<Request> {
        if bytes.len() < REQUEST_HEADER_LEN {
            return Err(CmdMonError::ShortPacket { need: REQUEST_HEADER_LEN, got: bytes.len() });
        }
        let mut buf = bytes;
        let _version = buf.get_u8();
        let pkt_type = buf.get_u8();
        if pkt_type != PKT_TYPE_CMD_REQUEST {
            return Err(CmdMonError::WrongPacketType(pkt_type));
        }
        buf.advance(2);
        let command = buf.get_u16();
        let attempt = buf.get_u16();
        let sequence = buf.get_u32();
        buf.advance(24); // utoken, token, auth
        let op = OpCode::from_u16(command).ok_or(CmdMonError::UnknownCommand(command))?;
        if bytes.len() < op.command_len() || op.command_len() == 0 {
            return Err(CmdMonError::ShortPacket { need: op.command_len(), got: bytes.len() });
        }
        let payload =
            RequestPayload::decode(op, &mut buf).ok_or(CmdMonError::UnknownCommand(command))?;
        Ok(Request { attempt, sequence, payload })
    }
}

/// The fixed leading fields of a request, read without interpreting the
/// payload. Used by the dispatcher's validation pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeader {
    pub version: u8,
    pub pkt_type: u8,
    pub res1: u8,
    pub res2: u8,
    pub command: u16,
    pub attempt: u16,
    pub sequence: u32,
}

impl RequestHeader {
    /// Peek the header fields. Needs only the 12 leading bytes; the
    /// dispatcher enforces its own stricter length floors.
    pub fn peek(bytes: &[u8]) -> Option<RequestHeader> {
        if bytes.len() < 12 {
            return None;
        }
        let mut buf = bytes;
        Some(RequestHeader {
            version: buf.get_u8(),
            pkt_type: buf.get_u8(),
            res1: buf.get_u8(),
            res2: buf.get_u8(),
            command: buf.get_u16(),
            attempt: buf.get_u16(),
            sequence: buf.get_u32(),
        })
    }

    /// Expected on-the-wire length for this header, as the dispatcher
    /// computes it: unknown opcodes fall back to the bare header so the
    /// opcode check can answer INVALID, retired opcodes report zero and
    /// are dropped as malformed.
    pub fn expected_len(&self, received_len: usize) -> usize {
        if received_len < REQUEST_HEADER_LEN {
            return 0;
        }
        match OpCode::from_u16(self.command) {
            Some(op) => op.command_len(),
            None => REQUEST_HEADER_LEN,
        }
    }
}

/// Length-table invariants, checked once at server construction exactly as
/// the daemon's init has always done.
pub(crate) fn verify_length_table() {
    for code in 0..N_REQUEST_TYPES as u16 {
        let op = OpCode::from_u16(code).expect("opcode table covers 0..N_REQUEST_TYPES");
        let command_len = op.command_len();
        let padding = op.padding_len();
        assert!(padding <= super::MAX_PADDING_LEN && padding <= command_len);
        assert!(command_len == 0 || command_len >= REQUEST_HEADER_LEN);
        // a reply header must always fit in the request buffer
        assert!(command_len == 0 || command_len >= REPLY_HEADER_LEN);
    }
}
