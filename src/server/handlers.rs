//! One thin adapter per opcode: deserialize, call one daemon subsystem,
//! map its outcome onto the reply.

use std::time::SystemTime;

use tracing::info;

use super::CmdMon;
use crate::daemon::{
    reports::{SourceMode, SourceReport, SourceState},
    AccessTable, ClientLookup, FilterStatus, NtpSourceKind, RtcStatus, SelectOption, SourceKind,
    SourceParams, SourceStatus,
};
use crate::protocol::reply::{
    ClientAccessRow, ManualListSample, Reply, ReplyPayload, RtcReply, SourceDataReply,
    SourcestatsReply, Status, TrackingReply, SD_FLAG_NOSELECT, SD_FLAG_PREFER, SD_MODE_CLIENT,
    SD_MODE_PEER, SD_MODE_REF, SD_STATE_CANDIDATE, SD_STATE_FALSETICKER, SD_STATE_JITTERY,
    SD_STATE_OUTLIER, SD_STATE_SYNC, SD_STATE_UNREACH, SMOOTHING_FLAG_ACTIVE,
    SMOOTHING_FLAG_LEAPONLY,
};
use crate::protocol::request::{
    AcCheck, AllowDeny, NtpSource, RequestPayload, ADDSRC_AUTOOFFLINE, ADDSRC_IBURST,
    ADDSRC_NOSELECT, ADDSRC_ONLINE, ADDSRC_PREFER, MANUAL_DISABLE, MANUAL_ENABLE, MANUAL_RESET,
    SMOOTHTIME_ACTIVATE, SMOOTHTIME_RESET,
};
use crate::protocol::wire::WireTimestamp;
use crate::protocol::{MAX_CLIENT_ACCESSES, MAX_MANUAL_LIST_SAMPLES};

impl CmdMon {
    /// Route a validated, authorized request to its handler.
    pub(super) fn dispatch(&self, payload: RequestPayload, now: SystemTime, reply: &mut Reply) {
        use RequestPayload as P;
        match payload {
            P::Null => {}
            P::Dump => self.daemon.sources.dump(),
            P::Online { mask, address } => {
                if !self.daemon.sources.take_online(mask, address) {
                    reply.status = Status::NoSuchSource;
                }
            }
            P::Offline { mask, address } => {
                if !self.daemon.sources.take_offline(mask, address) {
                    reply.status = Status::NoSuchSource;
                }
            }
            P::Burst { mask, address, n_good_samples, n_total_samples } => {
                if !self.daemon.sources.burst(n_good_samples, n_total_samples, mask, address) {
                    reply.status = Status::NoSuchSource;
                }
            }
            P::ModifyMinpoll { address, new_minpoll } => {
                source_modified(self.daemon.sources.modify_minpoll(address, new_minpoll), reply)
            }
            P::ModifyMaxpoll { address, new_maxpoll } => {
                source_modified(self.daemon.sources.modify_maxpoll(address, new_maxpoll), reply)
            }
            P::ModifyMaxdelay { address, new_max_delay } => source_modified(
                self.daemon.sources.modify_maxdelay(address, new_max_delay),
                reply,
            ),
            P::ModifyMaxdelayRatio { address, new_max_delay_ratio } => source_modified(
                self.daemon.sources.modify_maxdelay_ratio(address, new_max_delay_ratio),
                reply,
            ),
            P::ModifyMaxdelayDevRatio { address, new_max_delay_dev_ratio } => source_modified(
                self.daemon.sources.modify_maxdelay_dev_ratio(address, new_max_delay_dev_ratio),
                reply,
            ),
            P::ModifyMinstratum { address, new_min_stratum } => source_modified(
                self.daemon.sources.modify_minstratum(address, new_min_stratum),
                reply,
            ),
            P::ModifyPolltarget { address, new_poll_target } => source_modified(
                self.daemon.sources.modify_polltarget(address, new_poll_target),
                reply,
            ),
            P::ModifyMaxupdateskew { new_max_update_skew } => {
                self.daemon.reference.modify_max_update_skew(new_max_update_skew)
            }
            P::ModifyMakestep { limit, threshold } => {
                self.daemon.reference.modify_makestep(limit, threshold)
            }
            P::Logon { .. } => {
                // authentication is no longer supported, log-on always fails
                reply.status = Status::Failed;
            }
            P::Settime { ts } => self.handle_settime(ts, reply),
            P::Local { on_off, stratum } => {
                if on_off != 0 {
                    self.daemon.reference.enable_local(stratum);
                } else {
                    self.daemon.reference.disable_local();
                }
            }
            P::Manual { option } => match option {
                MANUAL_DISABLE => self.daemon.manual.disable(),
                MANUAL_ENABLE => self.daemon.manual.enable(),
                MANUAL_RESET => self.daemon.manual.reset(),
                _ => reply.status = Status::Invalid,
            },
            P::NSources => {
                reply.payload =
                    ReplyPayload::NSources { n_sources: self.daemon.sources.n_sources() as i32 };
            }
            P::SourceData { index } => self.handle_source_data(index, now, reply),
            P::Rekey => self.daemon.keys.reload(),
            P::Allow(ad) => self.handle_allow_deny(&*self.daemon.ntp_access, ad, true, false, reply),
            P::AllowAll(ad) => {
                self.handle_allow_deny(&*self.daemon.ntp_access, ad, true, true, reply)
            }
            P::Deny(ad) => self.handle_allow_deny(&*self.daemon.ntp_access, ad, false, false, reply),
            P::DenyAll(ad) => {
                self.handle_allow_deny(&*self.daemon.ntp_access, ad, false, true, reply)
            }
            P::CmdAllow(ad) => self.handle_cmd_allow_deny(ad, true, false, reply),
            P::CmdAllowAll(ad) => self.handle_cmd_allow_deny(ad, true, true, reply),
            P::CmdDeny(ad) => self.handle_cmd_allow_deny(ad, false, false, reply),
            P::CmdDenyAll(ad) => self.handle_cmd_allow_deny(ad, false, true, reply),
            P::AcCheck(AcCheck { ip }) => {
                reply.status = if self.daemon.ntp_access.is_allowed(ip) {
                    Status::AccessAllowed
                } else {
                    Status::AccessDenied
                };
            }
            P::CmdAcCheck(AcCheck { ip }) => {
                reply.status = if self.check_access_restriction(ip) {
                    Status::AccessAllowed
                } else {
                    Status::AccessDenied
                };
            }
            P::AddServer(source) => self.handle_add_source(NtpSourceKind::Server, &source, reply),
            P::AddPeer(source) => self.handle_add_source(NtpSourceKind::Peer, &source, reply),
            P::DelSource { ip_addr } => match self.daemon.sources.remove_source(ip_addr) {
                SourceStatus::Success => {}
                SourceStatus::NoSuchSource => reply.status = Status::NoSuchSource,
                status @ (SourceStatus::AlreadyInUse
                | SourceStatus::TooManySources
                | SourceStatus::InvalidFamily) => {
                    unreachable!("removal cannot report {status:?}")
                }
            },
            P::WriteRtc => match self.daemon.rtc.write_parameters() {
                RtcStatus::Ok => {}
                RtcStatus::NoDriver => reply.status = Status::NoRtc,
                RtcStatus::BadFile => reply.status = Status::BadRtcFile,
            },
            P::Dfreq { dfreq } => {
                self.daemon.local_clock.accumulate_delta_frequency(dfreq * 1.0e-6);
                info!(dfreq_ppm = dfreq, "accumulated delta frequency");
            }
            P::Doffset { sec, usec } => {
                let doffset = f64::from(sec) + 1.0e-6 * f64::from(usec);
                info!(doffset_seconds = doffset, "accumulated delta offset");
                self.daemon.local_clock.accumulate_offset(doffset);
            }
            P::Tracking => {
                let rpt = self.daemon.reference.tracking();
                reply.payload = ReplyPayload::Tracking(TrackingReply {
                    ref_id: rpt.ref_id,
                    ip_addr: rpt.ip_addr,
                    stratum: rpt.stratum,
                    leap_status: rpt.leap_status,
                    ref_time: WireTimestamp::from(rpt.ref_time),
                    current_correction: rpt.current_correction,
                    last_offset: rpt.last_offset,
                    rms_offset: rpt.rms_offset,
                    freq_ppm: rpt.freq_ppm,
                    resid_freq_ppm: rpt.resid_freq_ppm,
                    skew_ppm: rpt.skew_ppm,
                    root_delay: rpt.root_delay,
                    root_dispersion: rpt.root_dispersion,
                    last_update_interval: rpt.last_update_interval,
                });
            }
            P::Sourcestats { index } => match self.daemon.sources.sourcestats(index, now) {
                Some(rpt) => {
                    reply.payload = ReplyPayload::Sourcestats(SourcestatsReply {
                        ref_id: rpt.ref_id,
                        ip_addr: rpt.ip_addr,
                        n_samples: rpt.n_samples,
                        n_runs: rpt.n_runs,
                        span_seconds: rpt.span_seconds,
                        resid_freq_ppm: rpt.resid_freq_ppm,
                        skew_ppm: rpt.skew_ppm,
                        sd: rpt.sd,
                        est_offset: rpt.est_offset,
                        est_offset_err: rpt.est_offset_err,
                    });
                }
                None => reply.status = Status::NoSuchSource,
            },
            P::RtcReport => match self.daemon.rtc.report() {
                Some(rpt) => {
                    reply.payload = ReplyPayload::Rtc(RtcReply {
                        ref_time: WireTimestamp::from(rpt.ref_time),
                        n_samples: rpt.n_samples,
                        n_runs: rpt.n_runs,
                        span_seconds: rpt.span_seconds,
                        rtc_seconds_fast: rpt.rtc_seconds_fast,
                        rtc_gain_rate_ppm: rpt.rtc_gain_rate_ppm,
                    });
                }
                None => reply.status = Status::NoRtc,
            },
            P::TrimRtc => {
                if !self.daemon.rtc.trim() {
                    reply.status = Status::NoRtc;
                }
            }
            P::CycleLogs => self.daemon.logger.cycle_logs(),
            P::ClientAccessesByIndex { first_index, n_indices } => {
                self.handle_client_accesses_by_index(first_index, n_indices, now, reply)
            }
            P::ManualList => {
                let samples = self.daemon.manual.samples(MAX_MANUAL_LIST_SAMPLES);
                reply.payload = ReplyPayload::ManualList {
                    samples: samples
                        .into_iter()
                        .map(|sample| ManualListSample {
                            when: WireTimestamp::from(sample.when),
                            slewed_offset: sample.slewed_offset,
                            orig_offset: sample.orig_offset,
                            residual: sample.residual,
                        })
                        .collect(),
                };
            }
            P::ManualDelete { index } => {
                if !self.daemon.manual.delete_sample(index) {
                    reply.status = Status::BadSample;
                }
            }
            P::MakeStep => {
                if !self.daemon.local_clock.make_step() {
                    reply.status = Status::Failed;
                }
            }
            P::Activity => {
                let rpt = self.daemon.sources.activity();
                reply.payload = ReplyPayload::Activity {
                    online: rpt.online,
                    offline: rpt.offline,
                    burst_online: rpt.burst_online,
                    burst_offline: rpt.burst_offline,
                    unresolved: rpt.unresolved,
                };
            }
            P::Reselect => self.daemon.reference.reselect(),
            P::ReselectDistance { distance } => {
                self.daemon.reference.set_reselect_distance(distance)
            }
            P::Smoothing => match self.daemon.smoothing.report(now) {
                Some(rpt) => {
                    let mut flags = 0;
                    if rpt.active {
                        flags |= SMOOTHING_FLAG_ACTIVE;
                    }
                    if rpt.leap_only {
                        flags |= SMOOTHING_FLAG_LEAPONLY;
                    }
                    reply.payload = ReplyPayload::Smoothing {
                        flags,
                        offset: rpt.offset,
                        freq_ppm: rpt.freq_ppm,
                        wander_ppm: rpt.wander_ppm,
                        last_update_ago: rpt.last_update_ago,
                        remaining_time: rpt.remaining_time,
                    };
                }
                None => reply.status = Status::NotEnabled,
            },
            P::SmoothTime { option } => {
                if !self.daemon.smoothing.is_enabled() {
                    reply.status = Status::NotEnabled;
                } else {
                    match option {
                        SMOOTHTIME_RESET => self.daemon.smoothing.reset(now),
                        SMOOTHTIME_ACTIVATE => self.daemon.smoothing.activate(now),
                        _ => reply.status = Status::Invalid,
                    }
                }
            }
            P::Refresh => self.daemon.sources.refresh_addresses(),
        }
    }

    fn handle_settime(&self, ts: WireTimestamp, reply: &mut Reply) {
        if !self.daemon.manual.is_enabled() {
            reply.status = Status::NotEnabled;
        } else if let Some(rpt) = self.daemon.manual.accept_timestamp(ts.to_system_time()) {
            reply.payload = ReplyPayload::ManualTimestamp {
                centiseconds: rpt.centiseconds,
                dfreq_ppm: rpt.dfreq_ppm,
                new_afreq_ppm: rpt.new_afreq_ppm,
            };
        } else {
            reply.status = Status::Failed;
        }
    }

    fn handle_source_data(&self, index: i32, now: SystemTime, reply: &mut Reply) {
        match self.daemon.sources.report(index, now) {
            Some((kind, mut report)) => {
                if kind == SourceKind::RefClock {
                    self.daemon.refclocks.amend_report(&mut report, now);
                }
                reply.payload = ReplyPayload::SourceData(source_data_reply(&report));
            }
            None => reply.status = Status::NoSuchSource,
        }
    }

    fn handle_allow_deny(
        &self,
        table: &dyn AccessTable,
        ad: AllowDeny,
        allow: bool,
        all: bool,
        reply: &mut Reply,
    ) {
        let status = match (allow, all) {
            (true, false) => table.allow(ad.ip, ad.subnet_bits),
            (true, true) => table.allow_all(ad.ip, ad.subnet_bits),
            (false, false) => table.deny(ad.ip, ad.subnet_bits),
            (false, true) => table.deny_all(ad.ip, ad.subnet_bits),
        };
        if status == FilterStatus::BadSubnet {
            reply.status = Status::BadSubnet;
        }
    }

    fn handle_cmd_allow_deny(&self, ad: AllowDeny, allow: bool, all: bool, reply: &mut Reply) {
        let status = self.add_access_restriction(ad.ip, ad.subnet_bits, allow, all);
        if status == FilterStatus::BadSubnet {
            reply.status = Status::BadSubnet;
        }
    }

    fn handle_add_source(&self, kind: NtpSourceKind, source: &NtpSource, reply: &mut Reply) {
        let params = SourceParams {
            minpoll: source.minpoll,
            maxpoll: source.maxpoll,
            presend_minpoll: source.presend_minpoll,
            authkey: source.authkey,
            online: source.flags & ADDSRC_ONLINE != 0,
            auto_offline: source.flags & ADDSRC_AUTOOFFLINE != 0,
            iburst: source.flags & ADDSRC_IBURST != 0,
            sel_option: if source.flags & ADDSRC_PREFER != 0 {
                SelectOption::Prefer
            } else if source.flags & ADDSRC_NOSELECT != 0 {
                SelectOption::Noselect
            } else {
                SelectOption::Normal
            },
            max_delay: source.max_delay,
            max_delay_ratio: source.max_delay_ratio,
        };
        match self.daemon.sources.add_source(kind, source.ip_addr, source.port as u16, &params) {
            SourceStatus::Success => {}
            SourceStatus::AlreadyInUse => reply.status = Status::SourceAlreadyKnown,
            SourceStatus::TooManySources => reply.status = Status::TooManySources,
            SourceStatus::InvalidFamily => reply.status = Status::InvalidAf,
            SourceStatus::NoSuchSource => unreachable!("addition cannot miss a source"),
        }
    }

    fn handle_client_accesses_by_index(
        &self,
        first_index: u32,
        n_indices: u32,
        now: SystemTime,
        reply: &mut Reply,
    ) {
        let requested = (n_indices as usize).min(MAX_CLIENT_ACCESSES) as u32;
        let mut clients = Vec::new();

        for i in 0..requested {
            match self.daemon.client_log.access_by_index(first_index.wrapping_add(i), now) {
                ClientLookup::Entry(rpt) => clients.push(ClientAccessRow {
                    ip: rpt.ip_addr,
                    client_hits: rpt.client_hits,
                    peer_hits: rpt.peer_hits,
                    cmd_hits_auth: rpt.cmd_hits_auth,
                    cmd_hits_normal: rpt.cmd_hits_normal,
                    cmd_hits_bad: rpt.cmd_hits_bad,
                    last_ntp_hit_ago: rpt.last_ntp_hit_ago,
                    last_cmd_hit_ago: rpt.last_cmd_hit_ago,
                }),
                ClientLookup::OutOfRange => {}
                ClientLookup::Inactive => {
                    reply.status = Status::Inactive;
                    return;
                }
            }
        }

        reply.payload = ReplyPayload::ClientAccessesByIndex {
            n_indices: self.daemon.client_log.table_size(),
            next_index: first_index.wrapping_add(requested),
            clients,
        };
    }
}

fn source_modified(found: bool, reply: &mut Reply) {
    if !found {
        reply.status = Status::NoSuchSource;
    }
}

fn source_data_reply(report: &SourceReport) -> SourceDataReply {
    SourceDataReply {
        ip_addr: report.ip_addr,
        stratum: report.stratum,
        poll: report.poll,
        state: match report.state {
            SourceState::Synced => SD_STATE_SYNC,
            SourceState::Unreachable => SD_STATE_UNREACH,
            SourceState::Falseticker => SD_STATE_FALSETICKER,
            SourceState::Jittery => SD_STATE_JITTERY,
            SourceState::Candidate => SD_STATE_CANDIDATE,
            SourceState::Outlier => SD_STATE_OUTLIER,
        },
        mode: match report.mode {
            SourceMode::Client => SD_MODE_CLIENT,
            SourceMode::Peer => SD_MODE_PEER,
            SourceMode::LocalReference => SD_MODE_REF,
        },
        flags: match report.sel_option {
            SelectOption::Normal => 0,
            SelectOption::Prefer => SD_FLAG_PREFER,
            SelectOption::Noselect => SD_FLAG_NOSELECT,
        },
        reachability: report.reachability,
        since_sample: report.latest_meas_ago,
        orig_latest_meas: report.orig_latest_meas,
        latest_meas: report.latest_meas,
        latest_meas_err: report.latest_meas_err,
    }
}
