//! Report structures exchanged with the daemon subsystems.
//!
//! These are the host-order counterparts of the reporting replies; the
//! handlers translate them field by field into wire form.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol::wire::Addr;

/// Selection state of a reported source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Synced,
    Unreachable,
    Falseticker,
    Jittery,
    Candidate,
    Outlier,
}

/// Association mode of a reported source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Client,
    Peer,
    LocalReference,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceReport {
    pub ip_addr: Addr,
    pub stratum: u16,
    pub poll: i16,
    pub state: SourceState,
    pub mode: SourceMode,
    pub sel_option: super::SelectOption,
    pub reachability: u16,
    pub latest_meas_ago: u32,
    pub orig_latest_meas: f64,
    pub latest_meas: f64,
    pub latest_meas_err: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourcestatsReport {
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

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingReport {
    pub ref_id: u32,
    pub ip_addr: Addr,
    pub stratum: u16,
    pub leap_status: u16,
    pub ref_time: SystemTime,
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

impl Default for TrackingReport {
    fn default() -> Self {
        TrackingReport {
            ref_id: 0,
            ip_addr: Addr::Unspec,
            stratum: 0,
            leap_status: 0,
            ref_time: UNIX_EPOCH,
            current_correction: 0.0,
            last_offset: 0.0,
            rms_offset: 0.0,
            freq_ppm: 0.0,
            resid_freq_ppm: 0.0,
            skew_ppm: 0.0,
            root_delay: 0.0,
            root_dispersion: 0.0,
            last_update_interval: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActivityReport {
    pub online: i32,
    pub offline: i32,
    pub burst_online: i32,
    pub burst_offline: i32,
    pub unresolved: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualTimestampReport {
    /// Offset slewed out, in centiseconds.
    pub centiseconds: i32,
    pub dfreq_ppm: f64,
    pub new_afreq_ppm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManualSample {
    pub when: SystemTime,
    pub slewed_offset: f64,
    pub orig_offset: f64,
    pub residual: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingReport {
    pub active: bool,
    pub leap_only: bool,
    pub offset: f64,
    pub freq_ppm: f64,
    pub wander_ppm: f64,
    pub last_update_ago: f64,
    pub remaining_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtcReport {
    pub ref_time: SystemTime,
    pub n_samples: u16,
    pub n_runs: u16,
    pub span_seconds: u32,
    pub rtc_seconds_fast: f64,
    pub rtc_gain_rate_ppm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientAccessReport {
    pub ip_addr: Addr,
    pub client_hits: u32,
    pub peer_hits: u32,
    pub cmd_hits_auth: u32,
    pub cmd_hits_normal: u32,
    pub cmd_hits_bad: u32,
    pub last_ntp_hit_ago: u32,
    pub last_cmd_hit_ago: u32,
}
