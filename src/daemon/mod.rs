//! # Daemon Contracts
//!
//! The interfaces of the daemon subsystems the command endpoint delegates
//! to. Every handler is a thin adapter over exactly one of these traits;
//! the endpoint owns no clock, source or log state of its own.
//!
//! All operations are synchronous and must not block: the endpoint runs on
//! a cooperative single-threaded loop and a handler runs to completion
//! before the next datagram is read. Disk-touching operations (RTC write,
//! log cycling, dump) are bounded-latency best-effort by contract.

pub mod reports;

use std::time::SystemTime;

use crate::protocol::wire::Addr;
use self::reports::{
    ActivityReport, ClientAccessReport, ManualSample, ManualTimestampReport, RtcReport,
    SmoothingReport, SourceReport, SourcestatsReport, TrackingReport,
};

/// Outcome of a source-registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Success,
    NoSuchSource,
    AlreadyInUse,
    TooManySources,
    InvalidFamily,
}

/// Kind of a registered time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Ntp,
    RefClock,
}

/// NTP association mode requested for a new source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtpSourceKind {
    Server,
    Peer,
}

/// Source selection options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectOption {
    #[default]
    Normal,
    Prefer,
    Noselect,
}

/// Parameters of a new source, as carried by the wire protocol. Fields the
/// protocol does not transmit keep their registry defaults.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SourceParams {
    pub minpoll: i32,
    pub maxpoll: i32,
    pub presend_minpoll: i32,
    pub authkey: u32,
    pub online: bool,
    pub auto_offline: bool,
    pub iburst: bool,
    pub sel_option: SelectOption,
    pub max_delay: f64,
    pub max_delay_ratio: f64,
}

/// The NTP source registry.
pub trait Sources {
    fn add_source(
        &self,
        kind: NtpSourceKind,
        address: Addr,
        port: u16,
        params: &SourceParams,
    ) -> SourceStatus;
    fn remove_source(&self, address: Addr) -> SourceStatus;

    /// Take every source matching the (mask, address) pattern online.
    /// False when nothing matched.
    fn take_online(&self, mask: Addr, address: Addr) -> bool;
    fn take_offline(&self, mask: Addr, address: Addr) -> bool;
    fn burst(&self, n_good_samples: i32, n_total_samples: i32, mask: Addr, address: Addr) -> bool;

    fn modify_minpoll(&self, address: Addr, minpoll: i32) -> bool;
    fn modify_maxpoll(&self, address: Addr, maxpoll: i32) -> bool;
    fn modify_maxdelay(&self, address: Addr, max_delay: f64) -> bool;
    fn modify_maxdelay_ratio(&self, address: Addr, ratio: f64) -> bool;
    fn modify_maxdelay_dev_ratio(&self, address: Addr, ratio: f64) -> bool;
    fn modify_minstratum(&self, address: Addr, min_stratum: i32) -> bool;
    fn modify_polltarget(&self, address: Addr, poll_target: i32) -> bool;

    fn n_sources(&self) -> u32;
    fn report(&self, index: i32, now: SystemTime) -> Option<(SourceKind, SourceReport)>;
    fn sourcestats(&self, index: i32, now: SystemTime) -> Option<SourcestatsReport>;
    fn activity(&self) -> ActivityReport;

    /// Re-resolve the addresses of named sources.
    fn refresh_addresses(&self);

    /// Write the measurement registers out for post-mortem inspection.
    fn dump(&self);
}

/// The reference-clock registry.
pub trait RefClocks {
    /// Fill the refclock-specific fields of a source report.
    fn amend_report(&self, report: &mut SourceReport, now: SystemTime);
}

/// The local clock driver.
pub trait LocalClock {
    /// Accumulate a frequency delta, in parts per million.
    fn accumulate_delta_frequency(&self, dfreq_ppm: f64);
    fn accumulate_offset(&self, offset: f64);
    /// Step the clock by the currently accumulated offset.
    fn make_step(&self) -> bool;
}

/// The reference/tracking subsystem.
pub trait Reference {
    fn modify_max_update_skew(&self, skew_ppm: f64);
    fn modify_makestep(&self, limit: i32, threshold: f64);
    fn enable_local(&self, stratum: i32);
    fn disable_local(&self);
    fn set_reselect_distance(&self, distance: f64);
    fn reselect(&self);
    fn tracking(&self) -> TrackingReport;
}

/// The manual-timestamp engine.
pub trait ManualTime {
    fn enable(&self);
    fn disable(&self);
    fn reset(&self);
    fn is_enabled(&self) -> bool;
    /// Accept an operator-entered timestamp; `None` when the sample was
    /// rejected.
    fn accept_timestamp(&self, ts: SystemTime) -> Option<ManualTimestampReport>;
    fn samples(&self, max: usize) -> Vec<ManualSample>;
    fn delete_sample(&self, index: i32) -> bool;
}

/// The time-smoothing module.
pub trait Smoothing {
    fn is_enabled(&self) -> bool;
    fn report(&self, now: SystemTime) -> Option<SmoothingReport>;
    fn reset(&self, now: SystemTime);
    fn activate(&self, now: SystemTime);
}

/// Outcome of an RTC parameter write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcStatus {
    Ok,
    NoDriver,
    BadFile,
}

/// The real-time-clock module.
pub trait Rtc {
    fn write_parameters(&self) -> RtcStatus;
    fn trim(&self) -> bool;
    fn report(&self) -> Option<RtcReport>;
}

/// Class of a recorded command access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandClass {
    Normal,
    BadPacket,
}

/// Result of a client-log lookup by table index.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientLookup {
    Entry(ClientAccessReport),
    /// The index is beyond the table; the caller skips it.
    OutOfRange,
    /// Client accounting is switched off.
    Inactive,
}

/// The client access accounting log.
pub trait ClientLog {
    fn record_command(&self, address: Addr, class: CommandClass, now: SystemTime);
    fn access_by_index(&self, index: u32, now: SystemTime) -> ClientLookup;
    /// Current number of slots in the table.
    fn table_size(&self) -> u32;
}

/// The key file.
pub trait Keys {
    fn reload(&self);
}

/// The daemon's log files.
pub trait Logger {
    fn cycle_logs(&self);
}

/// The event scheduler that drives the endpoint's receive callbacks. The
/// endpoint only asks it for the cooked time of the last event.
pub trait Scheduler {
    fn last_event_time(&self) -> SystemTime;
}

/// Outcome of a CIDR table mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterStatus {
    Success,
    BadSubnet,
}

/// A generic CIDR allow/deny decision table. The endpoint owns one
/// instance for the command namespace and borrows the daemon's NTP
/// namespace table; decision semantics live entirely behind this trait.
pub trait AccessTable {
    fn allow(&self, address: Addr, subnet_bits: i32) -> FilterStatus;
    fn allow_all(&self, address: Addr, subnet_bits: i32) -> FilterStatus;
    fn deny(&self, address: Addr, subnet_bits: i32) -> FilterStatus;
    fn deny_all(&self, address: Addr, subnet_bits: i32) -> FilterStatus;
    fn is_allowed(&self, address: Addr) -> bool;
}

/// Every subsystem handle the endpoint needs, bundled for construction.
pub struct Collaborators {
    pub sources: Box<dyn Sources>,
    pub refclocks: Box<dyn RefClocks>,
    pub local_clock: Box<dyn LocalClock>,
    pub reference: Box<dyn Reference>,
    pub manual: Box<dyn ManualTime>,
    pub smoothing: Box<dyn Smoothing>,
    pub rtc: Box<dyn Rtc>,
    pub client_log: Box<dyn ClientLog>,
    pub keys: Box<dyn Keys>,
    pub scheduler: Box<dyn Scheduler>,
    pub logger: Box<dyn Logger>,
    /// The NTP-namespace access table (ALLOW/DENY/ACCHECK).
    pub ntp_access: Box<dyn AccessTable>,
}
