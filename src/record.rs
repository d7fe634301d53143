//! Per-section, per-thread measurement records.
//!
//! A [`SectionRecord`] is the state machine behind one section on one
//! measurement thread: `Idle → Running → Idle`, entered by `start()` and
//! left by `stop()`. It accumulates elapsed time, call count, the
//! user-declared or counter-derived metric, and raw counter deltas, and it
//! maintains the scratch slot consumed by the thread-merge protocol.
//!
//! Usage errors (duplicate start, stop without start) are logged with the
//! section label and self-correct; measurement for the section may be
//! degraded but the host application is never aborted.

use crate::aggregate::ProcessStats;
use crate::counters::CounterCapability;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Whether a section is communication-like or compute-like.
///
/// The type picks the default user-declared metric interpretation (bytes
/// vs. flops) and marks communication sections for max-time statistics,
/// where the slowest participant is more meaningful than the mean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalcType {
    /// Data movement; user metric is bytes
    Comm,
    /// Computation; user metric is floating-point operations
    Calc,
}

/// The (count, time, metric) triple written at every `stop()` and consumed
/// by the merge protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScratchSlot {
    pub count: f64,
    pub time: f64,
    pub metric: f64,
}

/// Measurement state for one section on one thread.
#[derive(Debug)]
pub struct SectionRecord {
    pub label: String,
    pub id: usize,
    pub calc_type: CalcType,
    pub exclusive: bool,
    pub in_parallel: bool,

    started: bool,
    start_time: f64,

    /// Cumulative elapsed seconds over completed start/stop pairs
    pub time: f64,
    /// Number of completed start/stop pairs
    pub count: u64,
    /// Cumulative user-declared or counter-derived metric
    pub metric: f64,

    start_counters: Vec<u64>,
    /// Per-event counter deltas accumulated by this thread
    pub counter_accum: Vec<u64>,
    /// Process-level counter totals, valid after the merge finalize phase
    pub counter_totals: Vec<f64>,

    /// Scratch written at `stop()`, consumed by the merge protocol
    pub scratch: ScratchSlot,
    /// Set by the merge finalize phase; repeated merges are no-ops until
    /// the next reset
    pub merged: bool,

    /// Cluster-wide statistics, filled by the distributed aggregator
    pub stats: Option<ProcessStats>,
}

impl SectionRecord {
    /// Create an idle record for a newly registered section.
    pub fn new(
        label: &str,
        id: usize,
        calc_type: CalcType,
        exclusive: bool,
        in_parallel: bool,
        num_events: usize,
    ) -> Self {
        Self {
            label: label.to_string(),
            id,
            calc_type,
            exclusive,
            in_parallel,
            started: false,
            start_time: 0.0,
            time: 0.0,
            count: 0,
            metric: 0.0,
            start_counters: vec![0; num_events],
            counter_accum: vec![0; num_events],
            counter_totals: vec![0.0; num_events],
            scratch: ScratchSlot::default(),
            merged: false,
            stats: None,
        }
    }

    /// Whether the record is mid start/stop pair.
    pub fn is_running(&self) -> bool {
        self.started
    }

    /// Enter the section.
    ///
    /// A duplicate start is reported and the timestamp re-captured rather
    /// than corrupting state. Counter values are read, not restarted, so
    /// enclosing sections keep accumulating across nested entries.
    pub fn start(&mut self, now: f64, counters: &CounterCapability) {
        if self.started {
            warn!(
                section = %self.label,
                "duplicate start ignored; section is already running"
            );
        }
        self.started = true;
        self.start_time = now;
        self.merged = false;

        if counters.num_events() > 0 {
            if let Err(e) = counters.read(&mut self.start_counters) {
                warn!(section = %self.label, "counter read failed at start: {}", e);
            }
        }
    }

    /// Leave the section.
    ///
    /// `user_metric_per_call * repeat` is added to the cumulative metric in
    /// user-declared mode; in counter mode the per-event deltas since
    /// `start()` are accumulated instead. The scratch slot write happens
    /// last, after all mode-dependent updates.
    ///
    /// A stop without a matching start is reported and contributes neither
    /// time nor a completed call; the state machine stays idle.
    ///
    /// Returns the elapsed seconds of the completed interval, or `None`
    /// when the stop was unmatched.
    pub fn stop(
        &mut self,
        now: f64,
        counters: &CounterCapability,
        user_metric_per_call: f64,
        repeat: u64,
    ) -> Option<f64> {
        if !self.started {
            warn!(
                section = %self.label,
                "stop without start ignored; section is idle"
            );
            return None;
        }

        let elapsed = now - self.start_time;
        self.time += elapsed;
        self.count += 1;
        self.started = false;

        if counters.num_events() > 0 {
            let mut current = vec![0u64; counters.num_events()];
            match counters.read(&mut current) {
                Ok(()) => {
                    for ((accum, &now_v), &start_v) in self
                        .counter_accum
                        .iter_mut()
                        .zip(&current)
                        .zip(&self.start_counters)
                    {
                        *accum += now_v.wrapping_sub(start_v);
                    }
                }
                Err(e) => {
                    warn!(section = %self.label, "counter read failed at stop: {}", e);
                }
            }
        } else {
            self.metric += user_metric_per_call * repeat as f64;
        }

        // The scratch write must be the final step; later pipeline stages
        // may overwrite the working counter arrays.
        self.scratch = ScratchSlot {
            count: self.count as f64,
            time: self.time,
            metric: self.metric,
        };
        Some(elapsed)
    }

    /// Discard all accumulated measurement, typically after warm-up.
    ///
    /// Only legal between a `stop()` and the next `start()`; a reset of a
    /// running section is reported and skipped.
    pub fn reset(&mut self) {
        if self.started {
            warn!(
                section = %self.label,
                "reset ignored; section is still running"
            );
            return;
        }
        self.time = 0.0;
        self.count = 0;
        self.metric = 0.0;
        self.scratch = ScratchSlot::default();
        for v in &mut self.counter_accum {
            *v = 0;
        }
        for v in &mut self.counter_totals {
            *v = 0.0;
        }
        self.merged = false;
        self.stats = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::{CounterBackend, CounterCapability, CounterError, CounterMode, EventSet};

    fn no_counters() -> CounterCapability {
        CounterCapability::disabled()
    }

    /// Backend whose counters advance by a programmable step on each read.
    struct SteppingCounters {
        next: std::sync::atomic::AtomicU64,
        step: u64,
    }

    impl CounterBackend for SteppingCounters {
        fn configure(&mut self, _events: &EventSet) -> Result<(), CounterError> {
            Ok(())
        }

        fn read(&self, buffer: &mut [u64]) -> Result<(), CounterError> {
            let v = self
                .next
                .fetch_add(self.step, std::sync::atomic::Ordering::Relaxed);
            for slot in buffer.iter_mut() {
                *slot = v;
            }
            Ok(())
        }
    }

    #[test]
    fn test_time_and_count_accumulate_over_pairs() {
        let counters = no_counters();
        let mut record = SectionRecord::new("solver", 1, CalcType::Calc, true, false, 0);

        record.start(1.0, &counters);
        let _ = record.stop(3.0, &counters, 0.0, 1);
        record.start(10.0, &counters);
        let _ = record.stop(14.0, &counters, 0.0, 1);

        assert_eq!(record.count, 2);
        assert!((record.time - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_user_metric_multiplied_by_repeat() {
        let counters = no_counters();
        let mut record = SectionRecord::new("kernel", 1, CalcType::Calc, true, false, 0);

        record.start(0.0, &counters);
        let _ = record.stop(1.0, &counters, 100.0, 5);

        assert_eq!(record.metric, 500.0);
        assert_eq!(record.scratch.count, 1.0);
        assert_eq!(record.scratch.metric, 500.0);
    }

    #[test]
    fn test_duplicate_start_recaptures_timestamp() {
        let counters = no_counters();
        let mut record = SectionRecord::new("s", 1, CalcType::Calc, true, false, 0);

        record.start(1.0, &counters);
        record.start(5.0, &counters); // reported, state corrected
        let _ = record.stop(6.0, &counters, 0.0, 1);

        assert_eq!(record.count, 1);
        assert!((record.time - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_stop_without_start_is_ignored() {
        let counters = no_counters();
        let mut record = SectionRecord::new("s", 1, CalcType::Calc, true, false, 0);

        let _ = record.stop(4.0, &counters, 100.0, 1);

        assert_eq!(record.count, 0);
        assert_eq!(record.time, 0.0);
        assert_eq!(record.metric, 0.0);
        assert!(!record.is_running());
    }

    #[test]
    fn test_counter_deltas_accumulate() {
        let capability = CounterCapability::new(
            Box::new(SteppingCounters {
                next: std::sync::atomic::AtomicU64::new(1000),
                step: 250,
            }),
            CounterMode::Flops,
        );
        let mut record = SectionRecord::new("k", 1, CalcType::Calc, true, false, capability.num_events());

        record.start(0.0, &capability); // reads 1000
        let _ = record.stop(1.0, &capability, 0.0, 1); // reads 1250, delta 250

        assert_eq!(record.counter_accum, vec![250, 250]);

        record.start(2.0, &capability); // reads 1500
        let _ = record.stop(3.0, &capability, 0.0, 1); // reads 1750

        assert_eq!(record.counter_accum, vec![500, 500]);
    }

    #[test]
    fn test_reset_zeroes_everything_between_pairs() {
        let counters = no_counters();
        let mut record = SectionRecord::new("s", 1, CalcType::Calc, true, false, 2);
        record.start(0.0, &counters);
        let _ = record.stop(2.0, &counters, 10.0, 1);

        record.reset();

        assert_eq!(record.count, 0);
        assert_eq!(record.time, 0.0);
        assert_eq!(record.metric, 0.0);
        assert_eq!(record.scratch, ScratchSlot::default());
        assert!(!record.merged);
    }

    #[test]
    fn test_reset_while_running_is_skipped() {
        let counters = no_counters();
        let mut record = SectionRecord::new("s", 1, CalcType::Calc, true, false, 0);
        record.start(0.0, &counters);
        record.reset();
        let _ = record.stop(5.0, &counters, 0.0, 1);

        // the pair survived the illegal reset
        assert_eq!(record.count, 1);
        assert!((record.time - 5.0).abs() < 1e-12);
    }
}
