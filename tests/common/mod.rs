//! Shared test fixtures: recording mock collaborators and a small wire
//! client.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cmdmon::daemon::reports::*;
use cmdmon::daemon::*;
use cmdmon::protocol::wire::Addr;

/// Recording implementation of every daemon contract. Shared between the
/// server (through `Collaborators`) and the test body via `Arc`.
pub struct TestDaemon {
    /// Mutation calls in arrival order, for no-mutation assertions.
    pub calls: Mutex<Vec<String>>,
    pub added_sources: Mutex<Vec<(NtpSourceKind, Addr, u16, SourceParams)>>,
    pub manual_enabled: Mutex<bool>,
    pub smoothing_enabled: Mutex<bool>,
    pub rtc_present: Mutex<bool>,
    pub manual_samples: Mutex<Vec<ManualSample>>,
    /// Sparse client-log table plus its nominal size; `None` = inactive.
    pub client_rows: Mutex<Option<HashMap<u32, ClientAccessReport>>>,
    pub client_table_size: Mutex<u32>,
    pub command_log: Mutex<Vec<(Addr, CommandClass)>>,
    pub now: SystemTime,
}

impl TestDaemon {
    pub fn new() -> Arc<TestDaemon> {
        Arc::new(TestDaemon {
            calls: Mutex::new(Vec::new()),
            added_sources: Mutex::new(Vec::new()),
            manual_enabled: Mutex::new(false),
            smoothing_enabled: Mutex::new(false),
            rtc_present: Mutex::new(true),
            manual_samples: Mutex::new(Vec::new()),
            client_rows: Mutex::new(Some(HashMap::new())),
            client_table_size: Mutex::new(0),
            command_log: Mutex::new(Vec::new()),
            now: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        })
    }

    pub fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn mutation_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn logged_commands(&self) -> Vec<(Addr, CommandClass)> {
        self.command_log.lock().unwrap().clone()
    }

    fn knows_source(&self, address: Addr) -> bool {
        self.added_sources.lock().unwrap().iter().any(|(_, a, _, _)| *a == address)
    }
}

/// Newtype wrapper so the trait impls below land on a local type instead of
/// the foreign `Arc<T>`, satisfying the orphan rules from this test crate.
#[derive(Clone)]
pub struct DaemonHandle(Arc<TestDaemon>);

impl std::ops::Deref for DaemonHandle {
    type Target = TestDaemon;
    fn deref(&self) -> &TestDaemon {
        &self.0
    }
}

impl Sources for DaemonHandle {
    fn add_source(
        &self,
        kind: NtpSourceKind,
        address: Addr,
        port: u16,
        params: &SourceParams,
    ) -> SourceStatus {
        self.record(format!("add_source {address}"));
        if address == Addr::Unspec {
            return SourceStatus::InvalidFamily;
        }
        let mut added = self.added_sources.lock().unwrap();
        if added.iter().any(|(_, a, _, _)| *a == address) {
            return SourceStatus::AlreadyInUse;
        }
        if added.len() >= 8 {
            return SourceStatus::TooManySources;
        }
        added.push((kind, address, port, *params));
        SourceStatus::Success
    }

    fn remove_source(&self, address: Addr) -> SourceStatus {
        self.record(format!("remove_source {address}"));
        let mut added = self.added_sources.lock().unwrap();
        match added.iter().position(|(_, a, _, _)| *a == address) {
            Some(i) => {
                added.remove(i);
                SourceStatus::Success
            }
            None => SourceStatus::NoSuchSource,
        }
    }

    fn take_online(&self, _mask: Addr, address: Addr) -> bool {
        self.record(format!("take_online {address}"));
        self.knows_source(address) || address == Addr::Unspec
    }

    fn take_offline(&self, _mask: Addr, address: Addr) -> bool {
        self.record(format!("take_offline {address}"));
        self.knows_source(address) || address == Addr::Unspec
    }

    fn burst(&self, _good: i32, _total: i32, _mask: Addr, address: Addr) -> bool {
        self.record(format!("burst {address}"));
        self.knows_source(address) || address == Addr::Unspec
    }

    fn modify_minpoll(&self, address: Addr, value: i32) -> bool {
        self.record(format!("modify_minpoll {address} {value}"));
        self.knows_source(address)
    }

    fn modify_maxpoll(&self, address: Addr, value: i32) -> bool {
        self.record(format!("modify_maxpoll {address} {value}"));
        self.knows_source(address)
    }

    fn modify_maxdelay(&self, address: Addr, _value: f64) -> bool {
        self.record(format!("modify_maxdelay {address}"));
        self.knows_source(address)
    }

    fn modify_maxdelay_ratio(&self, address: Addr, _value: f64) -> bool {
        self.record(format!("modify_maxdelay_ratio {address}"));
        self.knows_source(address)
    }

    fn modify_maxdelay_dev_ratio(&self, address: Addr, _value: f64) -> bool {
        self.record(format!("modify_maxdelay_dev_ratio {address}"));
        self.knows_source(address)
    }

    fn modify_minstratum(&self, address: Addr, _value: i32) -> bool {
        self.record(format!("modify_minstratum {address}"));
        self.knows_source(address)
    }

    fn modify_polltarget(&self, address: Addr, _value: i32) -> bool {
        self.record(format!("modify_polltarget {address}"));
        self.knows_source(address)
    }

    fn n_sources(&self) -> u32 {
        self.added_sources.lock().unwrap().len() as u32
    }

    fn report(&self, index: i32, _now: SystemTime) -> Option<(SourceKind, SourceReport)> {
        let added = self.added_sources.lock().unwrap();
        let (_, address, _, _) = added.get(usize::try_from(index).ok()?)?;
        Some((
            SourceKind::Ntp,
            SourceReport {
                ip_addr: *address,
                stratum: 2,
                poll: 6,
                state: SourceState::Synced,
                mode: SourceMode::Client,
                sel_option: SelectOption::Normal,
                reachability: 0xff,
                latest_meas_ago: 10,
                orig_latest_meas: 0.5,
                latest_meas: 0.25,
                latest_meas_err: 0.125,
            },
        ))
    }

    fn sourcestats(&self, index: i32, _now: SystemTime) -> Option<SourcestatsReport> {
        let added = self.added_sources.lock().unwrap();
        let (_, address, _, _) = added.get(usize::try_from(index).ok()?)?;
        Some(SourcestatsReport {
            ref_id: 0x0a000001,
            ip_addr: *address,
            n_samples: 8,
            n_runs: 4,
            span_seconds: 512,
            resid_freq_ppm: 0.5,
            skew_ppm: 1.5,
            sd: 0.25,
            est_offset: -0.5,
            est_offset_err: 0.0625,
        })
    }

    fn activity(&self) -> ActivityReport {
        ActivityReport {
            online: self.added_sources.lock().unwrap().len() as i32,
            offline: 0,
            burst_online: 0,
            burst_offline: 0,
            unresolved: 0,
        }
    }

    fn refresh_addresses(&self) {
        self.record("refresh_addresses");
    }

    fn dump(&self) {
        self.record("dump");
    }
}

impl RefClocks for DaemonHandle {
    fn amend_report(&self, _report: &mut SourceReport, _now: SystemTime) {}
}

impl LocalClock for DaemonHandle {
    fn accumulate_delta_frequency(&self, dfreq_ppm: f64) {
        self.record(format!("accumulate_delta_frequency {dfreq_ppm}"));
    }

    fn accumulate_offset(&self, offset: f64) {
        self.record(format!("accumulate_offset {offset}"));
    }

    fn make_step(&self) -> bool {
        self.record("make_step");
        true
    }
}

impl Reference for DaemonHandle {
    fn modify_max_update_skew(&self, skew_ppm: f64) {
        self.record(format!("modify_max_update_skew {skew_ppm}"));
    }

    fn modify_makestep(&self, limit: i32, threshold: f64) {
        self.record(format!("modify_makestep {limit} {threshold}"));
    }

    fn enable_local(&self, stratum: i32) {
        self.record(format!("enable_local {stratum}"));
    }

    fn disable_local(&self) {
        self.record("disable_local");
    }

    fn set_reselect_distance(&self, distance: f64) {
        self.record(format!("set_reselect_distance {distance}"));
    }

    fn reselect(&self) {
        self.record("reselect");
    }

    fn tracking(&self) -> TrackingReport {
        TrackingReport {
            ref_id: 0x7f7f0101,
            ip_addr: Addr::V4("192.0.2.1".parse().unwrap()),
            stratum: 3,
            leap_status: 0,
            ref_time: self.now,
            current_correction: 0.000244140625,
            last_offset: -0.5,
            rms_offset: 0.25,
            freq_ppm: -9.5,
            resid_freq_ppm: 0.125,
            skew_ppm: 2.5,
            root_delay: 0.0625,
            root_dispersion: 0.03125,
            last_update_interval: 64.0,
        }
    }
}

impl ManualTime for DaemonHandle {
    fn enable(&self) {
        self.record("manual_enable");
        *self.manual_enabled.lock().unwrap() = true;
    }

    fn disable(&self) {
        self.record("manual_disable");
        *self.manual_enabled.lock().unwrap() = false;
    }

    fn reset(&self) {
        self.record("manual_reset");
        self.manual_samples.lock().unwrap().clear();
    }

    fn is_enabled(&self) -> bool {
        *self.manual_enabled.lock().unwrap()
    }

    fn accept_timestamp(&self, ts: SystemTime) -> Option<ManualTimestampReport> {
        self.record("accept_timestamp");
        self.manual_samples.lock().unwrap().push(ManualSample {
            when: ts,
            slewed_offset: 0.5,
            orig_offset: 0.5,
            residual: 0.0,
        });
        Some(ManualTimestampReport { centiseconds: 50, dfreq_ppm: 1.5, new_afreq_ppm: -2.5 })
    }

    fn samples(&self, max: usize) -> Vec<ManualSample> {
        let samples = self.manual_samples.lock().unwrap();
        samples.iter().take(max).copied().collect()
    }

    fn delete_sample(&self, index: i32) -> bool {
        self.record(format!("delete_sample {index}"));
        let mut samples = self.manual_samples.lock().unwrap();
        match usize::try_from(index) {
            Ok(i) if i < samples.len() => {
                samples.remove(i);
                true
            }
            _ => false,
        }
    }
}

impl Smoothing for DaemonHandle {
    fn is_enabled(&self) -> bool {
        *self.smoothing_enabled.lock().unwrap()
    }

    fn report(&self, _now: SystemTime) -> Option<SmoothingReport> {
        if !Smoothing::is_enabled(self) {
            return None;
        }
        Some(SmoothingReport {
            active: true,
            leap_only: false,
            offset: 0.25,
            freq_ppm: 1.0,
            wander_ppm: 0.125,
            last_update_ago: 8.0,
            remaining_time: 32.0,
        })
    }

    fn reset(&self, _now: SystemTime) {
        self.record("smooth_reset");
    }

    fn activate(&self, _now: SystemTime) {
        self.record("smooth_activate");
    }
}

impl Rtc for DaemonHandle {
    fn write_parameters(&self) -> RtcStatus {
        self.record("rtc_write_parameters");
        if *self.rtc_present.lock().unwrap() {
            RtcStatus::Ok
        } else {
            RtcStatus::NoDriver
        }
    }

    fn trim(&self) -> bool {
        self.record("rtc_trim");
        *self.rtc_present.lock().unwrap()
    }

    fn report(&self) -> Option<RtcReport> {
        if !*self.rtc_present.lock().unwrap() {
            return None;
        }
        Some(RtcReport {
            ref_time: self.now,
            n_samples: 12,
            n_runs: 3,
            span_seconds: 3600,
            rtc_seconds_fast: -1.5,
            rtc_gain_rate_ppm: 3.5,
        })
    }
}

impl ClientLog for DaemonHandle {
    fn record_command(&self, address: Addr, class: CommandClass, _now: SystemTime) {
        self.command_log.lock().unwrap().push((address, class));
    }

    fn access_by_index(&self, index: u32, _now: SystemTime) -> ClientLookup {
        let rows = self.client_rows.lock().unwrap();
        match rows.as_ref() {
            None => ClientLookup::Inactive,
            Some(rows) => {
                if index >= *self.client_table_size.lock().unwrap() {
                    ClientLookup::OutOfRange
                } else {
                    match rows.get(&index) {
                        Some(report) => ClientLookup::Entry(*report),
                        None => ClientLookup::OutOfRange,
                    }
                }
            }
        }
    }

    fn table_size(&self) -> u32 {
        *self.client_table_size.lock().unwrap()
    }
}

impl Keys for DaemonHandle {
    fn reload(&self) {
        self.record("keys_reload");
    }
}

impl Logger for DaemonHandle {
    fn cycle_logs(&self) {
        self.record("cycle_logs");
    }
}

impl Scheduler for DaemonHandle {
    fn last_event_time(&self) -> SystemTime {
        self.now
    }
}

/// A CIDR table stand-in that answers from explicit sets. Subnet masks are
/// checked for range only; the decision semantics under test are the
/// endpoint's, not the table's.
pub struct MockAccessTable {
    pub default_allow: bool,
    pub allowed: Mutex<HashSet<Addr>>,
    pub denied: Mutex<HashSet<Addr>>,
}

impl MockAccessTable {
    pub fn new(default_allow: bool) -> Arc<MockAccessTable> {
        Arc::new(MockAccessTable {
            default_allow,
            allowed: Mutex::new(HashSet::new()),
            denied: Mutex::new(HashSet::new()),
        })
    }
}

/// Newtype wrapper so the `AccessTable` impl below lands on a local type
/// instead of the foreign `Arc<T>`, satisfying the orphan rules from this
/// test crate.
#[derive(Clone)]
pub struct AccessHandle(pub Arc<MockAccessTable>);

impl std::ops::Deref for AccessHandle {
    type Target = MockAccessTable;
    fn deref(&self) -> &MockAccessTable {
        &self.0
    }
}

fn subnet_ok(address: Addr, bits: i32) -> bool {
    let max = match address {
        Addr::V4(_) => 32,
        Addr::V6(_) => 128,
        Addr::Unspec => 0,
    };
    (0..=max).contains(&bits)
}

impl AccessTable for AccessHandle {
    fn allow(&self, address: Addr, subnet_bits: i32) -> FilterStatus {
        if !subnet_ok(address, subnet_bits) {
            return FilterStatus::BadSubnet;
        }
        self.denied.lock().unwrap().remove(&address);
        self.allowed.lock().unwrap().insert(address);
        FilterStatus::Success
    }

    fn allow_all(&self, address: Addr, subnet_bits: i32) -> FilterStatus {
        self.allow(address, subnet_bits)
    }

    fn deny(&self, address: Addr, subnet_bits: i32) -> FilterStatus {
        if !subnet_ok(address, subnet_bits) {
            return FilterStatus::BadSubnet;
        }
        self.allowed.lock().unwrap().remove(&address);
        self.denied.lock().unwrap().insert(address);
        FilterStatus::Success
    }

    fn deny_all(&self, address: Addr, subnet_bits: i32) -> FilterStatus {
        self.deny(address, subnet_bits)
    }

    fn is_allowed(&self, address: Addr) -> bool {
        if self.denied.lock().unwrap().contains(&address) {
            return false;
        }
        self.default_allow || self.allowed.lock().unwrap().contains(&address)
    }
}

/// Wire every mock into a collaborator bundle.
pub fn collaborators(
    daemon: &Arc<TestDaemon>,
    ntp_access: &Arc<MockAccessTable>,
) -> Collaborators {
    Collaborators {
        sources: Box::new(DaemonHandle(daemon.clone())),
        refclocks: Box::new(DaemonHandle(daemon.clone())),
        local_clock: Box::new(DaemonHandle(daemon.clone())),
        reference: Box::new(DaemonHandle(daemon.clone())),
        manual: Box::new(DaemonHandle(daemon.clone())),
        smoothing: Box::new(DaemonHandle(daemon.clone())),
        rtc: Box::new(DaemonHandle(daemon.clone())),
        client_log: Box::new(DaemonHandle(daemon.clone())),
        keys: Box::new(DaemonHandle(daemon.clone())),
        scheduler: Box::new(DaemonHandle(daemon.clone())),
        logger: Box::new(DaemonHandle(daemon.clone())),
        ntp_access: Box::new(AccessHandle(ntp_access.clone())),
    }
}
