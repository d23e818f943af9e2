//! Reply packets: status taxonomy, reply tags, payloads, and the codec.

use bytes::{Buf, BufMut};

use super::wire::{self, Addr, WireTimestamp};
use super::{
    MAX_CLIENT_ACCESSES, MAX_MANUAL_LIST_SAMPLES, PKT_TYPE_CMD_REPLY, PROTOCOL_VERSION,
    REPLY_HEADER_LEN,
};
use crate::error::{CmdMonError, Result};

/// Reply status codes. Id 5 belonged to the removed authentication
/// timestamp check and stays unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Status {
    Success = 0,
    Failed = 1,
    Unauthorized = 2,
    Invalid = 3,
    NoSuchSource = 4,
    NotEnabled = 6,
    BadSubnet = 7,
    AccessAllowed = 8,
    AccessDenied = 9,
    NoHostAccess = 10,
    SourceAlreadyKnown = 11,
    TooManySources = 12,
    NoRtc = 13,
    BadRtcFile = 14,
    Inactive = 15,
    BadSample = 16,
    InvalidAf = 17,
    BadPktVersion = 18,
    BadPktLength = 19,
}

impl Status {
    pub fn from_u16(value: u16) -> Option<Status> {
        use Status::*;
        Some(match value {
            0 => Success,
            1 => Failed,
            2 => Unauthorized,
            3 => Invalid,
            4 => NoSuchSource,
            6 => NotEnabled,
            7 => BadSubnet,
            8 => AccessAllowed,
            9 => AccessDenied,
            10 => NoHostAccess,
            11 => SourceAlreadyKnown,
            12 => TooManySources,
            13 => NoRtc,
            14 => BadRtcFile,
            15 => Inactive,
            16 => BadSample,
            17 => InvalidAf,
            18 => BadPktVersion,
            19 => BadPktLength,
            _ => return None,
        })
    }
}

/// Reply variant tags. Ids 8 and 9 belonged to the retired subnet and
/// per-subnet client reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ReplyTag {
    Null = 1,
    NSources = 2,
    SourceData = 3,
    ManualTimestamp = 4,
    Tracking = 5,
    Sourcestats = 6,
    Rtc = 7,
    ClientAccessesByIndex = 10,
    ManualList = 11,
    Activity = 12,
    Smoothing = 13,
}

impl ReplyTag {
    pub fn from_u16(value: u16) -> Option<ReplyTag> {
        use ReplyTag::*;
        Some(match value {
            1 => Null,
            2 => NSources,
            3 => SourceData,
            4 => ManualTimestamp,
            5 => Tracking,
            6 => Sourcestats,
            7 => Rtc,
            10 => ClientAccessesByIndex,
            11 => ManualList,
            12 => Activity,
            13 => Smoothing,
            _ => return None,
        })
    }
}

/// SOURCE_DATA state codes.
pub const SD_STATE_SYNC: u16 = 0;
pub const SD_STATE_UNREACH: u16 = 1;
pub const SD_STATE_FALSETICKER: u16 = 2;
pub const SD_STATE_JITTERY: u16 = 3;
pub const SD_STATE_CANDIDATE: u16 = 4;
pub const SD_STATE_OUTLIER: u16 = 5;

/// SOURCE_DATA mode codes.
pub const SD_MODE_CLIENT: u16 = 0;
pub const SD_MODE_PEER: u16 = 1;
pub const SD_MODE_REF: u16 = 2;

/// SOURCE_DATA selection flags.
pub const SD_FLAG_NOSELECT: u16 = 0x1;
pub const SD_FLAG_PREFER: u16 = 0x2;

/// SMOOTHING flags.
pub const SMOOTHING_FLAG_ACTIVE: u32 = 0x1;
pub const SMOOTHING_FLAG_LEAPONLY: u32 = 0x2;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceDataReply {
    pub ip_addr: Addr,
    pub stratum: u16,
    pub poll: i16,
    pub state: u16,
    pub mode: u16,
    pub flags: u16,
    pub reachability: u16,
    pub since_sample: u32,
    pub orig_latest_meas: f64,
    pub latest_meas: f64,
    pub latest_meas_err: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackingReply {
    pub ref_id: u32,
    pub ip_addr: Addr,
    pub stratum: u16,
    pub leap_status: u16,
    pub ref_time: WireTimestamp,
    pub current_correction: f64,
    pub last_offset: f64,
    pub rms_offset: f64,
    pub freq_ppm: f64,
    pub resid_freq_ppm: f64,
    pub skew_ppm: f64,
    pub root_delay: f64,
    pub root_dispersion: f64,
    pub last_update_interval: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourcestatsReply {
    pub ref_id: u32,
    pub ip_addr: Addr,
    pub n_samples: u32,
    pub n_runs: u32,
    pub span_seconds: u32,
    pub resid_freq_ppm: f64,
    pub skew_ppm: f64,
    pub sd: f64,
    pub est_offset: f64,
    pub est_offset_err: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RtcReply {
    pub ref_time: WireTimestamp,
    pub n_samples: u16,
    pub n_runs: u16,
    pub span_seconds: u32,
    pub rtc_seconds_fast: f64,
    pub rtc_gain_rate_ppm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClientAccessRow {
    pub ip: Addr,
    pub client_hits: u32,
    pub peer_hits: u32,
    pub cmd_hits_auth: u32,
    pub cmd_hits_normal: u32,
    pub cmd_hits_bad: u32,
    pub last_ntp_hit_ago: u32,
    pub last_cmd_hit_ago: u32,
}

const CLIENT_ACCESS_ROW_LEN: usize = Addr::WIRE_LEN + 28;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ManualListSample {
    pub when: WireTimestamp,
    pub slewed_offset: f64,
    pub orig_offset: f64,
    pub residual: f64,
}

const MANUAL_LIST_SAMPLE_LEN: usize = WireTimestamp::WIRE_LEN + 12;

/// The reply-tagged payload union.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyPayload {
    Null,
    NSources {
        n_sources: i32,
    },
    SourceData(SourceDataReply),
    ManualTimestamp {
        centiseconds: i32,
        dfreq_ppm: f64,
        new_afreq_ppm: f64,
    },
    Tracking(TrackingReply),
    Sourcestats(SourcestatsReply),
    Rtc(RtcReply),
    /// Rows actually packed travel on the wire; skipped indices do not.
    ClientAccessesByIndex {
        n_indices: u32,
        next_index: u32,
        clients: Vec<ClientAccessRow>,
    },
    ManualList {
        samples: Vec<ManualListSample>,
    },
    Activity {
        online: i32,
        offline: i32,
        burst_online: i32,
        burst_offline: i32,
        unresolved: i32,
    },
    Smoothing {
        flags: u32,
        offset: f64,
        freq_ppm: f64,
        wander_ppm: f64,
        last_update_ago: f64,
        remaining_time: f64,
    },
}

impl ReplyPayload {
    pub fn tag(&self) -> ReplyTag {
        match self {
            ReplyPayload::Null => ReplyTag::Null,
            ReplyPayload::NSources { .. } => ReplyTag::NSources,
            ReplyPayload::SourceData(_) => ReplyTag::SourceData,
            ReplyPayload::ManualTimestamp { .. } => ReplyTag::ManualTimestamp,
            ReplyPayload::Tracking(_) => ReplyTag::Tracking,
            ReplyPayload::Sourcestats(_) => ReplyTag::Sourcestats,
            ReplyPayload::Rtc(_) => ReplyTag::Rtc,
            ReplyPayload::ClientAccessesByIndex { .. } => ReplyTag::ClientAccessesByIndex,
            ReplyPayload::ManualList { .. } => ReplyTag::ManualList,
            ReplyPayload::Activity { .. } => ReplyTag::Activity,
            ReplyPayload::Smoothing { .. } => ReplyTag::Smoothing,
        }
    }

    /// Encoded payload size. Variable-row replies count only the rows
    /// present.
    pub fn body_len(&self) -> usize {
        match self {
            ReplyPayload::Null => 0,
            ReplyPayload::NSources { .. } => 4,
            ReplyPayload::SourceData(_) => Addr::WIRE_LEN + 28,
            ReplyPayload::ManualTimestamp { .. } => 12,
            ReplyPayload::Tracking(_) => Addr::WIRE_LEN + WireTimestamp::WIRE_LEN + 44,
            ReplyPayload::Sourcestats(_) => Addr::WIRE_LEN + 36,
            ReplyPayload::Rtc(_) => WireTimestamp::WIRE_LEN + 16,
            ReplyPayload::ClientAccessesByIndex { clients, .. } => {
                12 + clients.len() * CLIENT_ACCESS_ROW_LEN
            }
            ReplyPayload::ManualList { samples } => 4 + samples.len() * MANUAL_LIST_SAMPLE_LEN,
            ReplyPayload::Activity { .. } => 20,
            ReplyPayload::Smoothing { .. } => 24,
        }
    }

    fn put<B: BufMut>(&self, buf: &mut B) {
        match self {
            ReplyPayload::Null => {}
            ReplyPayload::NSources { n_sources } => buf.put_i32(*n_sources),
            ReplyPayload::SourceData(sd) => {
                sd.ip_addr.put(buf);
                buf.put_u16(sd.stratum);
                buf.put_i16(sd.poll);
                buf.put_u16(sd.state);
                buf.put_u16(sd.mode);
                buf.put_u16(sd.flags);
                buf.put_u16(sd.reachability);
                buf.put_u32(sd.since_sample);
                wire::put_float(buf, sd.orig_latest_meas);
                wire::put_float(buf, sd.latest_meas);
                wire::put_float(buf, sd.latest_meas_err);
            }
            ReplyPayload::ManualTimestamp { centiseconds, dfreq_ppm, new_afreq_ppm } => {
                buf.put_i32(*centiseconds);
                wire::put_float(buf, *dfreq_ppm);
                wire::put_float(buf, *new_afreq_ppm);
            }
            ReplyPayload::Tracking(t) => {
                buf.put_u32(t.ref_id);
                t.ip_addr.put(buf);
                buf.put_u16(t.stratum);
                buf.put_u16(t.leap_status);
                t.ref_time.put(buf);
                wire::put_float(buf, t.current_correction);
                wire::put_float(buf, t.last_offset);
                wire::put_float(buf, t.rms_offset);
                wire::put_float(buf, t.freq_ppm);
                wire::put_float(buf, t.resid_freq_ppm);
                wire::put_float(buf, t.skew_ppm);
                wire::put_float(buf, t.root_delay);
                wire::put_float(buf, t.root_dispersion);
                wire::put_float(buf, t.last_update_interval);
            }
            ReplyPayload::Sourcestats(s) => {
                buf.put_u32(s.ref_id);
                s.ip_addr.put(buf);
                buf.put_u32(s.n_samples);
                buf.put_u32(s.n_runs);
                buf.put_u32(s.span_seconds);
                wire::put_float(buf, s.resid_freq_ppm);
                wire::put_float(buf, s.skew_ppm);
                wire::put_float(buf, s.sd);
                wire::put_float(buf, s.est_offset);
                wire::put_float(buf, s.est_offset_err);
            }
            ReplyPayload::Rtc(r) => {
                r.ref_time.put(buf);
                buf.put_u16(r.n_samples);
                buf.put_u16(r.n_runs);
                buf.put_u32(r.span_seconds);
                wire::put_float(buf, r.rtc_seconds_fast);
                wire::put_float(buf, r.rtc_gain_rate_ppm);
            }
            ReplyPayload::ClientAccessesByIndex { n_indices, next_index, clients } => {
                buf.put_u32(*n_indices);
                buf.put_u32(*next_index);
                buf.put_u32(clients.len() as u32);
                for row in clients {
                    row.ip.put(buf);
                    buf.put_u32(row.client_hits);
                    buf.put_u32(row.peer_hits);
                    buf.put_u32(row.cmd_hits_auth);
                    buf.put_u32(row.cmd_hits_normal);
                    buf.put_u32(row.cmd_hits_bad);
                    buf.put_u32(row.last_ntp_hit_ago);
                    buf.put_u32(row.last_cmd_hit_ago);
                }
            }
            ReplyPayload::ManualList { samples } => {
                buf.put_i32(samples.len() as i32);
                for sample in samples {
                    sample.when.put(buf);
                    wire::put_float(buf, sample.slewed_offset);
                    wire::put_float(buf, sample.orig_offset);
                    wire::put_float(buf, sample.residual);
                }
            }
            ReplyPayload::Activity { online, offline, burst_online, burst_offline, unresolved } => {
                buf.put_i32(*online);
                buf.put_i32(*offline);
                buf.put_i32(*burst_online);
                buf.put_i32(*burst_offline);
                buf.put_i32(*unresolved);
            }
            ReplyPayload::Smoothing {
                flags,
                offset,
                freq_ppm,
                wander_ppm,
                last_update_ago,
                remaining_time,
            } => {
                buf.put_u32(*flags);
                wire::put_float(buf, *offset);
                wire::put_float(buf, *freq_ppm);
                wire::put_float(buf, *wander_ppm);
                wire::put_float(buf, *last_update_ago);
                wire::put_float(buf, *remaining_time);
            }
        }
    }

    /// Bytes of payload the tag requires before any variable rows.
    fn fixed_len(tag: ReplyTag) -> usize {
        match tag {
            ReplyTag::Null => 0,
            ReplyTag::NSources => 4,
            ReplyTag::SourceData => Addr::WIRE_LEN + 28,
            ReplyTag::ManualTimestamp => 12,
            ReplyTag::Tracking => Addr::WIRE_LEN + WireTimestamp::WIRE_LEN + 44,
            ReplyTag::Sourcestats => Addr::WIRE_LEN + 36,
            ReplyTag::Rtc => WireTimestamp::WIRE_LEN + 16,
            ReplyTag::ClientAccessesByIndex => 12,
            ReplyTag::ManualList => 4,
            ReplyTag::Activity => 20,
            ReplyTag::Smoothing => 24,
        }
    }

    fn get<B: Buf>(tag: ReplyTag, buf: &mut B) -> Result<ReplyPayload> {
        if buf.remaining() < Self::fixed_len(tag) {
            return Err(CmdMonError::ShortPacket {
                need: Self::fixed_len(tag),
                got: buf.remaining(),
            });
        }
        Ok(match tag {
            ReplyTag::Null => ReplyPayload::Null,
            ReplyTag::NSources => ReplyPayload::NSources { n_sources: buf.get_i32() },
            ReplyTag::SourceData => ReplyPayload::SourceData(SourceDataReply {
                ip_addr: Addr::get(buf),
                stratum: buf.get_u16(),
                poll: buf.get_i16(),
                state: buf.get_u16(),
                mode: buf.get_u16(),
                flags: buf.get_u16(),
                reachability: buf.get_u16(),
                since_sample: buf.get_u32(),
                orig_latest_meas: wire::get_float(buf),
                latest_meas: wire::get_float(buf),
                latest_meas_err: wire::get_float(buf),
            }),
            ReplyTag::ManualTimestamp => ReplyPayload::ManualTimestamp {
                centiseconds: buf.get_i32(),
                dfreq_ppm: wire::get_float(buf),
                new_afreq_ppm: wire::get_float(buf),
            },
            ReplyTag::Tracking => ReplyPayload::Tracking(TrackingReply {
                ref_id: buf.get_u32(),
                ip_addr: Addr::get(buf),
                stratum: buf.get_u16(),
                leap_status: buf.get_u16(),
                ref_time: WireTimestamp::get(buf),
                current_correction: wire::get_float(buf),
                last_offset: wire::get_float(buf),
                rms_offset: wire::get_float(buf),
                freq_ppm: wire::get_float(buf),
                resid_freq_ppm: wire::get_float(buf),
                skew_ppm: wire::get_float(buf),
                root_delay: wire::get_float(buf),
                root_dispersion: wire::get_float(buf),
                last_update_interval: wire::get_float(buf),
            }),
            ReplyTag::Sourcestats => ReplyPayload::Sourcestats(SourcestatsReply {
                ref_id: buf.get_u32(),
                ip_addr: Addr::get(buf),
                n_samples: buf.get_u32(),
                n_runs: buf.get_u32(),
                span_seconds: buf.get_u32(),
                resid_freq_ppm: wire::get_float(buf),
                skew_ppm: wire::get_float(buf),
                sd: wire::get_float(buf),
                est_offset: wire::get_float(buf),
                est_offset_err: wire::get_float(buf),
            }),
            ReplyTag::Rtc => ReplyPayload::Rtc(RtcReply {
                ref_time: WireTimestamp::get(buf),
                n_samples: buf.get_u16(),
                n_runs: buf.get_u16(),
                span_seconds: buf.get_u32(),
                rtc_seconds_fast: wire::get_float(buf),
                rtc_gain_rate_ppm: wire::get_float(buf),
            }),
            ReplyTag::ClientAccessesByIndex => {
                let n_indices = buf.get_u32();
                let next_index = buf.get_u32();
                let n_clients = buf.get_u32() as usize;
                if n_clients > MAX_CLIENT_ACCESSES
                    || buf.remaining() < n_clients * CLIENT_ACCESS_ROW_LEN
                {
                    return Err(CmdMonError::ShortPacket {
                        need: n_clients * CLIENT_ACCESS_ROW_LEN,
                        got: buf.remaining(),
                    });
                }
                let mut clients = Vec::with_capacity(n_clients);
                for _ in 0..n_clients {
                    clients.push(ClientAccessRow {
                        ip: Addr::get(buf),
                        client_hits: buf.get_u32(),
                        peer_hits: buf.get_u32(),
                        cmd_hits_auth: buf.get_u32(),
                        cmd_hits_normal: buf.get_u32(),
                        cmd_hits_bad: buf.get_u32(),
                        last_ntp_hit_ago: buf.get_u32(),
                        last_cmd_hit_ago: buf.get_u32(),
                    });
                }
                ReplyPayload::ClientAccessesByIndex { n_indices, next_index, clients }
            }
            ReplyTag::ManualList => {
                let n_samples = buf.get_i32().clamp(0, MAX_MANUAL_LIST_SAMPLES as i32) as usize;
                if buf.remaining() < n_samples * MANUAL_LIST_SAMPLE_LEN {
                    return Err(CmdMonError::ShortPacket {
                        need: n_samples * MANUAL_LIST_SAMPLE_LEN,
                        got: buf.remaining(),
                    });
                }
                let mut samples = Vec::with_capacity(n_samples);
                for _ in 0..n_samples {
                    samples.push(ManualListSample {
                        when: WireTimestamp::get(buf),
                        slewed_offset: wire::get_float(buf),
                        orig_offset: wire::get_float(buf),
                        residual: wire::get_float(buf),
                    });
                }
                ReplyPayload::ManualList { samples }
            }
            ReplyTag::Activity => ReplyPayload::Activity {
                online: buf.get_i32(),
                offline: buf.get_i32(),
                burst_online: buf.get_i32(),
                burst_offline: buf.get_i32(),
                unresolved: buf.get_i32(),
            },
            ReplyTag::Smoothing => ReplyPayload::Smoothing {
                flags: buf.get_u32(),
                offset: wire::get_float(buf),
                freq_ppm: wire::get_float(buf),
                wander_ppm: wire::get_float(buf),
                last_update_ago: wire::get_float(buf),
                remaining_time: wire::get_float(buf),
            },
        })
    }
}

/// A reply under construction or received. The command and sequence echo
/// of the originating request travel separately through [`Reply::encode`]
/// so handlers never touch them.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: Status,
    pub payload: ReplyPayload,
}

impl Reply {
    /// The template the dispatcher hands to every handler.
    pub fn template() -> Reply {
        Reply { status: Status::Success, payload: ReplyPayload::Null }
    }

    /// Total encoded length.
    pub fn wire_len(&self) -> usize {
        REPLY_HEADER_LEN + self.payload.body_len()
    }

    /// Serialize, echoing the request's command and sequence.
    pub fn encode(&self, command: u16, sequence: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.wire_len());
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(PKT_TYPE_CMD_REPLY);
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u16(command);
        buf.put_u16(self.payload.tag() as u16);
        buf.put_u16(self.status as u16);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u32(sequence);
        buf.put_u32(0);
        buf.put_u32(0);
        self.payload.put(&mut buf);
        buf
    }
}

/// A decoded reply, as seen by a client.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedReply {
    pub version: u8,
    pub command: u16,
    pub status: Status,
    pub sequence: u32,
    pub payload: ReplyPayload,
}

impl DecodedReply {
    /// Reference decoder for reply datagrams.
    pub fn decode(bytes: &[u8]) -> Result<DecodedReply> {
        if bytes.len() < REPLY_HEADER_LEN {
            return Err(CmdMonError::ShortPacket { need: REPLY_HEADER_LEN, got: bytes.len() });
        }
        let mut buf = bytes;
        let version = buf.get_u8();
        let pkt_type = buf.get_u8();
        if pkt_type != PKT_TYPE_CMD_REPLY {
            return Err(CmdMonError::WrongPacketType(pkt_type));
        }
        buf.advance(2);
        let command = buf.get_u16();
        let tag_raw = buf.get_u16();
        let status_raw = buf.get_u16();
        buf.advance(6);
        let sequence = buf.get_u32();
        buf.advance(8);

        let tag = ReplyTag::from_u16(tag_raw).ok_or(CmdMonError::UnknownReplyTag(tag_raw))?;
        let status =
            Status::from_u16(status_raw).ok_or(CmdMonError::UnknownStatus(status_raw))?;
        let payload = ReplyPayload::get(tag, &mut buf)?;
        Ok(DecodedReply { version, command, status, sequence, payload })
    }
}
