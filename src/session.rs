//! Measurement session and per-thread monitor handles.
//!
//! A [`Session`] owns the process-wide state: the shared label registry,
//! the merge scratch, the team barrier, and the capability handles
//! (counters, power, trace, process group). Each measurement thread
//! attaches once and receives a [`Monitor`] — the handle it calls
//! `start`/`stop` on. Monitors own their thread's local registry and
//! section records outright; nothing per-section is shared between
//! threads outside the barrier-fenced merge protocol.
//!
//! The implicit root section (id 0) is created and started when a monitor
//! attaches, and stopped when aggregation begins; its elapsed time is the
//! job total the report divides by.
//!
//! ## Team contract
//!
//! The team size is fixed at session construction. Exactly `team_size`
//! monitors may attach, and `aggregate()` is a team collective: every
//! attached monitor must call it together, or the barrier inside never
//! releases. A team of one degenerates to plain function calls.

use crate::aggregate::{
    compute_statistics, gather_basic_stats, gather_counter_totals, rank_sections_by_time,
    ProcessStats,
};
use crate::clock::MonotonicClock;
use crate::comm::{ProcessGroup, SingleProcess};
use crate::config::{validate_label, validate_team_size, TelemetryConfig};
use crate::counters::{CounterBackend, CounterCapability};
use crate::merge::{run_phase, CounterSharing, DirectSum, MergePhase, MergeScratch};
use crate::power::{PowerBackend, PowerCapability, PowerError, PowerKnob};
use crate::record::{CalcType, SectionRecord};
use crate::registry::{missing_labels, LocalRegistry, RegionClass, SharedRegistry};
use crate::trace::{NullTraceExporter, TraceExporter};
use crate::units::{select_mode, MetricMode};
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use tracing::{debug, warn};

/// Label of the implicit whole-program section, always id 0.
pub const ROOT_LABEL: &str = "Root Section";

/// Cluster power summary computed during aggregation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerSummary {
    /// Mean accumulated joules across processes
    pub mean_joules: f64,
    /// Highest wattage observed on this process
    pub watt_max: f64,
}

struct SharedState {
    clock: MonotonicClock,
    registry: SharedRegistry,
    scratch: MergeScratch,
    barrier: Barrier,
    team_size: usize,
    attached: AtomicUsize,
    counters: CounterCapability,
    sharing: Box<dyn CounterSharing>,
    group: Box<dyn ProcessGroup>,
    power: Mutex<PowerCapability>,
    trace: Mutex<Box<dyn TraceExporter>>,
    bypass: bool,
}

/// Builder for a measurement session.
///
/// Capabilities default to the degenerate implementations: no counters,
/// no power measurement, no trace export, a single-process group, and
/// direct-sum counter folding.
pub struct SessionBuilder {
    config: TelemetryConfig,
    team_size: usize,
    counters: Option<Box<dyn CounterBackend>>,
    power: Option<Box<dyn PowerBackend>>,
    trace: Option<Box<dyn TraceExporter>>,
    group: Option<Box<dyn ProcessGroup>>,
    sharing: Option<Box<dyn CounterSharing>>,
}

impl SessionBuilder {
    /// Override the resolved environment configuration.
    pub fn config(mut self, config: TelemetryConfig) -> Self {
        self.config = config;
        self
    }

    /// Install a hardware-counter backend.
    pub fn counters(mut self, backend: Box<dyn CounterBackend>) -> Self {
        self.counters = Some(backend);
        self
    }

    /// Install a power-measurement backend.
    pub fn power(mut self, backend: Box<dyn PowerBackend>) -> Self {
        self.power = Some(backend);
        self
    }

    /// Install a trace exporter.
    pub fn trace(mut self, exporter: Box<dyn TraceExporter>) -> Self {
        self.trace = Some(exporter);
        self
    }

    /// Install the process-group capability.
    pub fn group(mut self, group: Box<dyn ProcessGroup>) -> Self {
        self.group = Some(group);
        self
    }

    /// Install a counter-sharing strategy for platforms with shared
    /// counter groups.
    pub fn counter_sharing(mut self, sharing: Box<dyn CounterSharing>) -> Self {
        self.sharing = Some(sharing);
        self
    }

    /// Validate and assemble the session.
    pub fn build(self) -> Result<Session> {
        validate_team_size(self.team_size)?;

        let counters = match (self.counters, self.config.counter_mode) {
            (Some(backend), Some(mode)) => CounterCapability::new(backend, mode),
            _ => CounterCapability::disabled(),
        };
        let num_events = counters.num_events();

        let shared = Arc::new(SharedState {
            clock: MonotonicClock::new(),
            registry: SharedRegistry::new(),
            scratch: MergeScratch::new(self.team_size, num_events),
            barrier: Barrier::new(self.team_size),
            team_size: self.team_size,
            attached: AtomicUsize::new(0),
            counters,
            sharing: self.sharing.unwrap_or_else(|| Box::new(DirectSum)),
            group: self.group.unwrap_or_else(|| Box::new(SingleProcess)),
            power: Mutex::new(match self.power {
                Some(backend) => PowerCapability::new(backend),
                None => PowerCapability::disabled(),
            }),
            trace: Mutex::new(
                self.trace
                    .unwrap_or_else(|| Box::new(NullTraceExporter)),
            ),
            bypass: self.config.bypass,
        });

        debug!(
            team_size = self.team_size,
            rank = shared.group.rank(),
            processes = shared.group.size(),
            counter_mode = ?shared.counters.mode(),
            "telemetry session created"
        );

        Ok(Session { shared })
    }
}

/// Process-wide measurement session.
pub struct Session {
    shared: Arc<SharedState>,
}

impl Session {
    /// Start building a session for a team of `team_size` threads.
    pub fn builder(team_size: usize) -> SessionBuilder {
        SessionBuilder {
            config: TelemetryConfig::from_env(),
            team_size,
            counters: None,
            power: None,
            trace: None,
            group: None,
            sharing: None,
        }
    }

    /// A ready-made single-threaded, single-process session.
    pub fn single_threaded() -> Result<Session> {
        Self::builder(1).build()
    }

    /// Attach the calling thread to the team and return its monitor.
    ///
    /// Thread ids are assigned in attach order; the first monitor is the
    /// master (thread 0). Attaching more monitors than the team size is
    /// an error.
    pub fn attach(&self) -> Result<Monitor> {
        let thread_id = self.shared.attached.fetch_add(1, Ordering::SeqCst);
        if thread_id >= self.shared.team_size {
            anyhow::bail!(
                "cannot attach thread {}: team size is {}",
                thread_id,
                self.shared.team_size
            );
        }

        let mut monitor = Monitor {
            shared: Arc::clone(&self.shared),
            thread_id,
            local: LocalRegistry::new(),
            records: Vec::new(),
            exclusive_construct: false,
            ranking: Vec::new(),
            power_summary: None,
            trace_finalized: false,
        };

        if !self.shared.bypass {
            // every thread carries its own root record, running from attach;
            // roots span the same wall interval on every thread, so they
            // are never folded across the team
            let root = monitor.register_section(ROOT_LABEL, CalcType::Calc, false);
            monitor.records[root].in_parallel = false;
            let now = self.shared.clock.now();
            monitor.records[root].start(now, &self.shared.counters);
            if thread_id == 0 {
                self.shared.power.lock().start();
            }
        }
        Ok(monitor)
    }

    /// Team size this session was built for.
    pub fn team_size(&self) -> usize {
        self.shared.team_size
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("team_size", &self.shared.team_size)
            .field("attached", &self.shared.attached.load(Ordering::SeqCst))
            .finish()
    }
}

/// One thread's handle into the measurement session.
pub struct Monitor {
    shared: Arc<SharedState>,
    thread_id: usize,
    local: LocalRegistry,
    records: Vec<SectionRecord>,
    exclusive_construct: bool,
    ranking: Vec<usize>,
    power_summary: Option<PowerSummary>,
    trace_finalized: bool,
}

impl Monitor {
    /// This monitor's thread id within the team.
    pub fn thread_id(&self) -> usize {
        self.thread_id
    }

    /// This process's rank in the process group.
    pub fn rank(&self) -> usize {
        self.shared.group.rank()
    }

    /// Register a section with explicit properties.
    ///
    /// Sections started without prior registration are created lazily with
    /// compute type and exclusive measurement; use this to declare
    /// communication sections or non-exclusive measurement up front.
    /// Idempotent for an already-known label.
    pub fn set_properties(&mut self, label: &str, calc_type: CalcType, exclusive: bool) {
        if self.shared.bypass {
            return;
        }
        if let Err(e) = validate_label(label) {
            warn!("set_properties: {}", e);
            return;
        }
        self.register_section(label, calc_type, exclusive);
    }

    fn register_section(&mut self, label: &str, calc_type: CalcType, exclusive: bool) -> usize {
        let id = self.local.register(label);
        self.shared.registry.register(label);
        if id == self.records.len() {
            // a section registered by a non-master thread is, by the
            // documented heuristic, assumed reachable from parallel context
            let in_parallel = self.thread_id != 0;
            self.records.push(SectionRecord::new(
                label,
                id,
                calc_type,
                exclusive,
                in_parallel,
                self.shared.counters.num_events(),
            ));
        }
        id
    }

    /// The metric mode in effect for a section.
    pub fn metric_mode(&self, id: usize) -> Option<MetricMode> {
        let record = self.records.get(id)?;
        select_mode(self.shared.counters.mode(), record.calc_type)
    }

    /// Enter the section named `label`, creating it on first sight.
    pub fn start(&mut self, label: &str) {
        if self.shared.bypass {
            return;
        }
        if let Err(e) = validate_label(label) {
            warn!("start: {}", e);
            return;
        }
        let id = match self.local.resolve(label) {
            Some(id) => id,
            None => self.register_section(label, CalcType::Calc, true),
        };
        self.exclusive_construct = true;

        let now = self.shared.clock.now();
        self.records[id].start(now, &self.shared.counters);

        if self.thread_id == 0 {
            if let Some(mode) = self.metric_mode(id) {
                self.shared
                    .trace
                    .lock()
                    .event_start(self.rank(), now, id, mode);
            }
        }
    }

    /// Leave the section named `label`.
    ///
    /// In user-declared mode, `metric_per_call * repeat` is added to the
    /// section's cumulative metric; under hardware counters both arguments
    /// are ignored.
    pub fn stop(&mut self, label: &str, metric_per_call: f64, repeat: u64) {
        if self.shared.bypass {
            return;
        }
        if let Err(e) = validate_label(label) {
            warn!("stop: {}", e);
            return;
        }
        let id = match self.local.resolve(label) {
            Some(id) => id,
            None => {
                warn!(section = %label, "stop for unregistered section ignored");
                return;
            }
        };

        let now = self.shared.clock.now();
        let elapsed = self.records[id].stop(now, &self.shared.counters, metric_per_call, repeat);

        // another section started inside this one's window: this section
        // is no longer an exclusive measurement
        if !self.exclusive_construct {
            self.records[id].exclusive = false;
        }
        self.exclusive_construct = false;

        if self.thread_id == 0 {
            if let (Some(elapsed), Some(mode)) = (elapsed, self.metric_mode(id)) {
                let rate = if elapsed > 0.0 {
                    metric_per_call * repeat as f64 / elapsed
                } else {
                    0.0
                };
                self.shared
                    .trace
                    .lock()
                    .event_stop(self.rank(), now, id, mode, rate);
            }
        }
    }

    /// Discard accumulated measurement for one section.
    pub fn reset(&mut self, label: &str) {
        if self.shared.bypass {
            return;
        }
        if let Err(e) = validate_label(label) {
            warn!("reset: {}", e);
            return;
        }
        match self.local.resolve(label) {
            Some(id) => self.records[id].reset(),
            None => warn!(section = %label, "reset for unregistered section ignored"),
        }
    }

    /// Discard accumulated measurement for every idle section.
    ///
    /// Running sections (the root section in particular) are left intact.
    pub fn reset_all(&mut self) {
        if self.shared.bypass {
            return;
        }
        for record in &mut self.records {
            if !record.is_running() {
                record.reset();
            }
        }
    }

    /// Where was this shared section first registered, as seen from this
    /// thread?
    pub fn classify_region(&self, shared_id: usize) -> Option<RegionClass> {
        let label = self.shared.registry.label(shared_id)?;
        Some(match self.local.resolve(&label) {
            None => RegionClass::Parallel,
            Some(id) => {
                if self.records[id].in_parallel {
                    RegionClass::Parallel
                } else {
                    RegionClass::Serial
                }
            }
        })
    }

    /// Run the full merge and distributed-aggregation pipeline.
    ///
    /// This is a team collective: every attached monitor must call it
    /// together. Non-master threads return after contributing to the
    /// thread merge; the master completes the distributed statistics and
    /// ranking. Idempotent — calling it again without intervening
    /// measurement reproduces identical statistics.
    ///
    /// Across processes, every rank must have registered its sections in
    /// the same order: the per-section collectives are matched up by
    /// position, as with any collective operation.
    pub fn aggregate(&mut self) -> Result<()> {
        if self.shared.bypass {
            return Ok(());
        }

        self.stop_root();

        if self.thread_id == 0 {
            self.synthesize_missing_sections();
        }
        self.shared.barrier.wait();

        self.merge_team_sections();

        if self.thread_id != 0 {
            return Ok(());
        }

        self.finalize_counter_metrics();
        self.gather_and_stats();
        self.rebuild_ranking();
        self.gather_power();
        Ok(())
    }

    /// Stop this thread's root section; the master also closes the power
    /// accumulation interval.
    fn stop_root(&mut self) {
        if !self.records[0].is_running() {
            return;
        }
        let now = self.shared.clock.now();
        let elapsed = self.records[0].stop(now, &self.shared.counters, 0.0, 1);
        if self.thread_id == 0 {
            if let Some(elapsed) = elapsed {
                self.shared.power.lock().stop(elapsed);
            }
        }
    }

    /// Create local records, with default properties, for shared labels
    /// this thread has never seen, so iteration over "all known sections"
    /// is complete.
    fn synthesize_missing_sections(&mut self) {
        for label in missing_labels(&self.shared.registry, &self.local) {
            debug!(section = %label, "synthesizing section registered by another thread");
            let id = self.register_section(&label, CalcType::Calc, true);
            self.records[id].in_parallel = true;
        }
    }

    /// Drive the three-phase merge for every shared section.
    ///
    /// All team members execute the same section sequence and the same
    /// barrier count; a thread without a local record for a section
    /// participates in the barriers but contributes nothing.
    fn merge_team_sections(&mut self) {
        let num_shared = self.shared.registry.len();
        for shared_id in 0..num_shared {
            let local_id = self
                .shared
                .registry
                .label(shared_id)
                .and_then(|label| self.local.resolve(&label));

            self.run_merge_phase(MergePhase::MasterCopyIn, local_id);
            self.shared.barrier.wait();
            self.run_merge_phase(MergePhase::ParallelFoldIn, local_id);
            self.shared.barrier.wait();
            self.run_merge_phase(MergePhase::Finalize, local_id);
            self.shared.barrier.wait();
        }
    }

    fn run_merge_phase(&mut self, phase: MergePhase, local_id: Option<usize>) {
        let record = match local_id {
            Some(id) => Some(&mut self.records[id]),
            None => None,
        };
        run_phase(
            phase,
            self.thread_id,
            record,
            &self.shared.scratch,
            self.shared.sharing.as_ref(),
        );
    }

    /// Replace each counter-mode section's metric with the value derived
    /// from its merged process-level counter totals.
    fn finalize_counter_metrics(&mut self) {
        if let Some(event_set) = self.shared.counters.event_set() {
            for record in &mut self.records {
                record.metric = event_set.derive_metric(&record.counter_totals);
            }
        }
    }

    /// Exchange per-section values across the process group and compute
    /// the summary statistics. Recomputed from scratch on every call.
    fn gather_and_stats(&mut self) {
        for record in &mut self.records {
            let mut stats = gather_basic_stats(record, self.shared.group.as_ref());
            stats.counters_by_rank = gather_counter_totals(record, self.shared.group.as_ref());
            compute_statistics(&mut stats, record.calc_type);
            record.stats = Some(stats);
        }
    }

    /// Rebuild the descending mean-elapsed-time permutation of sections.
    fn rebuild_ranking(&mut self) {
        let keys: Vec<(f64, u64)> = self
            .records
            .iter()
            .map(|r| match &r.stats {
                Some(s) => (s.time_mean, s.count_total),
                None => (0.0, 0),
            })
            .collect();
        self.ranking = rank_sections_by_time(&keys);
    }

    /// Exchange the power totals so the report can show the cluster mean.
    fn gather_power(&mut self) {
        let power = self.shared.power.lock();
        if !power.is_enabled() && power.accumulator.joules.is_empty() {
            return;
        }
        let total = power.accumulator.total_joules();
        let watt_max = power.accumulator.watt_max;
        drop(power);

        match self.shared.group.all_gather(total) {
            Ok(by_rank) => {
                let mean = by_rank.iter().sum::<f64>() / by_rank.len() as f64;
                self.power_summary = Some(PowerSummary {
                    mean_joules: mean,
                    watt_max,
                });
            }
            Err(e) => {
                tracing::error!("aborting job: {}", e);
                self.shared.group.abort(1)
            }
        }
    }

    /// Number of sections known to this thread (after aggregation on the
    /// master this covers every section in the job).
    pub fn section_count(&self) -> usize {
        self.records.len()
    }

    /// The elapsed-time ranking computed by the last `aggregate()` call.
    ///
    /// Each process holds its own copy; only rank 0's is authoritative
    /// for reporting.
    pub fn ranking(&self) -> &[usize] {
        &self.ranking
    }

    /// Label of the section at the given position of the ranking.
    pub fn section_label(&self, rank_in_ranking: usize) -> Option<&str> {
        let id = *self.ranking.get(rank_in_ranking)?;
        self.local.label(id)
    }

    /// Cluster statistics for a section, valid after `aggregate()`.
    pub fn section_stats(&self, id: usize) -> Option<&ProcessStats> {
        self.records.get(id)?.stats.as_ref()
    }

    /// The section record for a local id.
    pub fn section(&self, id: usize) -> Option<&SectionRecord> {
        self.records.get(id)
    }

    /// Resolve a label to this thread's local section id.
    pub fn section_id(&self, label: &str) -> Option<usize> {
        self.local.resolve(label)
    }

    /// Elapsed seconds of the root section (the job total); zero until the
    /// root has been stopped by `aggregate()`.
    pub fn root_elapsed(&self) -> f64 {
        self.records.first().map_or(0.0, |r| r.time)
    }

    /// Cluster power summary from the last aggregation, when power
    /// measurement is live.
    pub fn power_summary(&self) -> Option<PowerSummary> {
        self.power_summary
    }

    /// Read a platform power-control knob.
    pub fn power_knob(&self, knob: PowerKnob) -> Result<i64, PowerError> {
        self.shared.power.lock().get_knob(knob)
    }

    /// Set a platform power-control knob.
    pub fn set_power_knob(&mut self, knob: PowerKnob, value: i64) -> Result<(), PowerError> {
        self.shared.power.lock().set_knob(knob, value)
    }

    /// Emit section labels to the trace exporter and finalize it.
    ///
    /// Master only; subsequent calls are no-ops.
    pub fn finalize_trace(&mut self) {
        if self.thread_id != 0 || self.trace_finalized {
            return;
        }
        let mut trace = self.shared.trace.lock();
        for record in &self.records {
            trace.label(record.id, &record.label);
        }
        trace.finalize();
        self.trace_finalized = true;
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("thread_id", &self.thread_id)
            .field("sections", &self.records.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_assigns_dense_thread_ids() {
        let session = Session::builder(2).build().unwrap();
        let master = session.attach().unwrap();
        let worker = session.attach().unwrap();
        assert_eq!(master.thread_id(), 0);
        assert_eq!(worker.thread_id(), 1);
        assert!(session.attach().is_err());
    }

    #[test]
    fn test_root_section_is_registered_and_running() {
        let session = Session::single_threaded().unwrap();
        let monitor = session.attach().unwrap();
        assert_eq!(monitor.section_id(ROOT_LABEL), Some(0));
        assert!(monitor.section(0).unwrap().is_running());
    }

    #[test]
    fn test_lazy_section_creation_on_start() {
        let session = Session::single_threaded().unwrap();
        let mut monitor = session.attach().unwrap();
        monitor.start("solver");
        monitor.stop("solver", 0.0, 1);
        assert_eq!(monitor.section_id("solver"), Some(1));
        assert_eq!(monitor.section(1).unwrap().count, 1);
    }

    #[test]
    fn test_stop_unknown_label_is_ignored() {
        let session = Session::single_threaded().unwrap();
        let mut monitor = session.attach().unwrap();
        monitor.stop("never-started", 0.0, 1);
        assert_eq!(monitor.section_count(), 1); // root only
    }

    #[test]
    fn test_empty_label_is_rejected() {
        let session = Session::single_threaded().unwrap();
        let mut monitor = session.attach().unwrap();
        monitor.start("");
        assert_eq!(monitor.section_count(), 1); // root only
    }

    #[test]
    fn test_nested_stop_clears_exclusive_flag() {
        let session = Session::single_threaded().unwrap();
        let mut monitor = session.attach().unwrap();
        monitor.start("outer");
        monitor.start("inner");
        monitor.stop("inner", 0.0, 1);
        monitor.stop("outer", 0.0, 1);

        let inner = monitor.section(monitor.section_id("inner").unwrap()).unwrap();
        let outer = monitor.section(monitor.section_id("outer").unwrap()).unwrap();
        assert!(inner.exclusive);
        assert!(!outer.exclusive);
    }

    #[test]
    fn test_bypass_disables_everything() {
        let config = TelemetryConfig {
            bypass: true,
            ..TelemetryConfig::default()
        };
        let session = Session::builder(1).config(config).build().unwrap();
        let mut monitor = session.attach().unwrap();
        monitor.start("s");
        monitor.stop("s", 1.0, 1);
        monitor.aggregate().unwrap();
        assert_eq!(monitor.section_count(), 0);
        assert!(monitor.ranking().is_empty());
    }

    #[test]
    fn test_classify_region_heuristic() {
        let session = Session::builder(2).build().unwrap();
        let mut master = session.attach().unwrap();
        let mut worker = session.attach().unwrap();

        master.start("serial-only");
        master.stop("serial-only", 0.0, 1);
        worker.start("parallel-only");
        worker.stop("parallel-only", 0.0, 1);

        let serial_sid = session.shared.registry.resolve("serial-only").unwrap();
        let parallel_sid = session.shared.registry.resolve("parallel-only").unwrap();

        assert_eq!(master.classify_region(serial_sid), Some(RegionClass::Serial));
        // master never saw it, so the heuristic says parallel
        assert_eq!(master.classify_region(parallel_sid), Some(RegionClass::Parallel));
        // the worker registered it itself, still parallel by first-sight
        assert_eq!(worker.classify_region(parallel_sid), Some(RegionClass::Parallel));
    }
}
