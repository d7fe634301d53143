//! Three-phase thread-merge protocol.
//!
//! Folding N per-thread measurement records into one process-level record
//! happens in three ordered phases, each separated from the next by a full
//! barrier across the thread team:
//!
//! 1. **Master copy-in** — thread 0 zeroes every slot, then copies its own
//!    counter accumulators and scratch slot into slot 0. Starting each
//!    section cycle from a clean scratch means a skipped later phase can
//!    never leak one section's slots into the next.
//! 2. **Parallel fold-in** — every non-zero thread writes its accumulators
//!    and scratch slot into its own slot. No thread touches another
//!    thread's slot, so the phase needs no cross-slot locking, only the
//!    surrounding barriers.
//! 3. **Finalize** — thread 0 reads the full per-thread buffer, folds the
//!    counter values through the platform's sharing strategy, sums the
//!    scratch triples into the process totals, and marks the record
//!    merged.
//!
//! Omitting any barrier is a correctness bug: a thread could read slot
//! data another thread has not yet written. The phases are never invoked
//! concurrently with an active start/stop pair on the same section; a
//! running record is skipped as a no-op, sacrificing that merge safely
//! instead of racing.

use crate::record::{ScratchSlot, SectionRecord};
use parking_lot::Mutex;

/// The ordered phases of the merge protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    /// Thread 0 copies its state into slot 0
    MasterCopyIn,
    /// Non-zero threads copy their state into their own slots
    ParallelFoldIn,
    /// Thread 0 folds all slots into the process-level record
    Finalize,
}

/// One thread's contribution to a section merge.
#[derive(Debug, Clone, Default)]
pub struct ThreadSlot {
    pub scratch: ScratchSlot,
    pub counters: Vec<u64>,
}

/// The shared scratch buffer, one slot per team thread.
///
/// Each slot carries its own mutex because the protocol guarantees at most
/// one writer per slot per phase; the locks are uncontended and exist only
/// to keep the structure safely shareable.
#[derive(Debug)]
pub struct MergeScratch {
    slots: Vec<Mutex<ThreadSlot>>,
}

impl MergeScratch {
    /// Allocate a zeroed scratch for a team of `team_size` threads.
    pub fn new(team_size: usize, num_events: usize) -> Self {
        let slots = (0..team_size)
            .map(|_| {
                Mutex::new(ThreadSlot {
                    scratch: ScratchSlot::default(),
                    counters: vec![0; num_events],
                })
            })
            .collect();
        Self { slots }
    }

    /// Team size this scratch was allocated for.
    pub fn team_size(&self) -> usize {
        self.slots.len()
    }

    fn write_slot(&self, thread_id: usize, scratch: ScratchSlot, counters: &[u64]) {
        let mut slot = self.slots[thread_id].lock();
        slot.scratch = scratch;
        slot.counters.clear();
        slot.counters.extend_from_slice(counters);
    }

    fn snapshot(&self) -> Vec<ThreadSlot> {
        self.slots.iter().map(|s| s.lock().clone()).collect()
    }

    fn zero_all(&self) {
        for slot in &self.slots {
            let mut slot = slot.lock();
            slot.scratch = ScratchSlot::default();
            for v in &mut slot.counters {
                *v = 0;
            }
        }
    }
}

/// Strategy for folding per-thread counter values into process totals.
///
/// Compute-core counters are private per core and sum directly. At least
/// one known platform exposes bandwidth counters that are shared across a
/// group of cores; summing those N times overcounts, so the fold must
/// allocate the shared value across the threads that observe it.
pub trait CounterSharing: Send + Sync {
    /// Fold per-thread counter arrays (outer index: thread) into one total
    /// per event.
    fn fold(&self, per_thread: &[Vec<u64>]) -> Vec<f64>;
}

/// Default strategy: every counter is core-private, sum directly.
#[derive(Debug, Default)]
pub struct DirectSum;

impl CounterSharing for DirectSum {
    fn fold(&self, per_thread: &[Vec<u64>]) -> Vec<f64> {
        let num_events = per_thread.iter().map(Vec::len).max().unwrap_or(0);
        let mut totals = vec![0.0; num_events];
        for counters in per_thread {
            for (total, &v) in totals.iter_mut().zip(counters) {
                *total += v as f64;
            }
        }
        totals
    }
}

/// Strategy for platforms whose counters are shared across a core group.
///
/// Every thread in a group of `group_width` cores reads the same counter
/// value, so only one slot per group contributes. When more processes run
/// on the node than there are groups (`procs_per_node > groups_per_node`),
/// processes co-resident on a group each claim an equal share of its
/// counter, derived from this process's position among its node-mates.
/// Both topology values come from the deployment environment.
#[derive(Debug, Clone)]
pub struct SharedGroupCounters {
    /// Cores (threads) per shared counter group
    pub group_width: usize,
    /// Counter groups per node
    pub groups_per_node: usize,
    /// Processes running on this node
    pub procs_per_node: usize,
    /// This process's 0-based position among its node-mates
    pub rank_on_node: usize,
}

impl CounterSharing for SharedGroupCounters {
    fn fold(&self, per_thread: &[Vec<u64>]) -> Vec<f64> {
        let num_threads = per_thread.len();
        let num_events = per_thread.iter().map(Vec::len).max().unwrap_or(0);
        let mut totals = vec![0.0; num_events];
        if num_threads == 0 || num_events == 0 {
            return totals;
        }

        if self.procs_per_node <= self.groups_per_node {
            // This process occupies whole groups: one representative slot
            // per group carries the group's shared value.
            let groups = (num_threads - 1) / self.group_width + 1;
            for g in 0..groups {
                let rep = &per_thread[g * self.group_width];
                for (total, &v) in totals.iter_mut().zip(rep) {
                    *total += v as f64;
                }
            }
        } else {
            // Processes share a group: allocate the group's value by the
            // number of co-resident processes. Groups filled first hold one
            // extra process when the division is uneven.
            let full_share = (self.procs_per_node - 1) / self.groups_per_node + 1;
            let crowded = (self.rank_on_node % self.groups_per_node)
                <= ((self.procs_per_node - 1) % self.groups_per_node);
            let sharers = if crowded { full_share } else { full_share - 1 };
            let ratio = 1.0 / sharers.max(1) as f64;
            for (total, &v) in totals.iter_mut().zip(&per_thread[0]) {
                *total = v as f64 * ratio;
            }
        }
        totals
    }
}

/// Execute one phase of the merge protocol for one section.
///
/// The caller provides this thread's record for the section (`None` when
/// the thread never registered the label; the thread still participates in
/// the surrounding barriers but writes nothing). Phase boundaries must be
/// separated by full team barriers; this function performs no
/// synchronization of its own.
pub fn run_phase(
    phase: MergePhase,
    thread_id: usize,
    record: Option<&mut SectionRecord>,
    scratch: &MergeScratch,
    sharing: &dyn CounterSharing,
) {
    // every section cycle begins from a clean scratch
    if phase == MergePhase::MasterCopyIn && thread_id == 0 {
        scratch.zero_all();
    }

    let record = match record {
        Some(r) => r,
        None => return,
    };

    match phase {
        MergePhase::MasterCopyIn => {
            if thread_id != 0 || record.merged || record.is_running() {
                return;
            }
            scratch.write_slot(0, record.scratch, &record.counter_accum);
        }
        MergePhase::ParallelFoldIn => {
            if thread_id == 0 || record.merged || record.is_running() {
                return;
            }
            // Only sections first seen inside a parallel region carry
            // contributions from non-master threads.
            if !record.in_parallel {
                return;
            }
            scratch.write_slot(thread_id, record.scratch, &record.counter_accum);
        }
        MergePhase::Finalize => {
            if thread_id != 0 || record.merged || record.is_running() {
                return;
            }
            let slots = scratch.snapshot();

            let per_thread: Vec<Vec<u64>> = slots.iter().map(|s| s.counters.clone()).collect();
            record.counter_totals = sharing.fold(&per_thread);

            // Scratch triples are summed, not maxed, across threads.
            let mut count = 0.0;
            let mut time = 0.0;
            let mut metric = 0.0;
            for slot in &slots {
                count += slot.scratch.count;
                time += slot.scratch.time;
                metric += slot.scratch.metric;
            }
            record.count = count.round() as u64;
            record.time = time;
            record.metric = metric;
            record.merged = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::CounterCapability;
    use crate::record::CalcType;

    fn parallel_record(thread: usize, count: u64, time: f64, metric: f64) -> SectionRecord {
        let counters = CounterCapability::disabled();
        let mut record = SectionRecord::new("s", 0, CalcType::Calc, true, true, 0);
        for i in 0..count {
            let base = thread as f64 * 100.0 + i as f64 * 10.0;
            record.start(base, &counters);
            let _ = record.stop(base + time / count as f64, &counters, metric / count as f64, 1);
        }
        record
    }

    fn merge_all(records: &mut [SectionRecord], scratch: &MergeScratch) {
        let sharing = DirectSum;
        run_phase(MergePhase::MasterCopyIn, 0, Some(&mut records[0]), scratch, &sharing);
        for (t, record) in records.iter_mut().enumerate().skip(1) {
            run_phase(MergePhase::ParallelFoldIn, t, Some(record), scratch, &sharing);
        }
        run_phase(MergePhase::Finalize, 0, Some(&mut records[0]), scratch, &sharing);
    }

    #[test]
    fn test_finalize_sums_thread_contributions() {
        let scratch = MergeScratch::new(3, 0);
        let mut records = vec![
            parallel_record(0, 2, 1.0, 10.0),
            parallel_record(1, 3, 2.0, 20.0),
            parallel_record(2, 5, 4.0, 40.0),
        ];

        merge_all(&mut records, &scratch);

        assert_eq!(records[0].count, 10);
        assert!((records[0].time - 7.0).abs() < 1e-9);
        assert!((records[0].metric - 70.0).abs() < 1e-9);
        assert!(records[0].merged);
    }

    #[test]
    fn test_merge_is_idempotent_until_reset() {
        let scratch = MergeScratch::new(2, 0);
        let mut records = vec![parallel_record(0, 1, 1.0, 5.0), parallel_record(1, 1, 2.0, 5.0)];

        merge_all(&mut records, &scratch);
        let (count, time, metric) = (records[0].count, records[0].time, records[0].metric);

        // a second merge cycle without new measurement changes nothing
        merge_all(&mut records, &scratch);
        assert_eq!(records[0].count, count);
        assert_eq!(records[0].time, time);
        assert_eq!(records[0].metric, metric);
    }

    #[test]
    fn test_serial_section_ignores_other_threads() {
        let scratch = MergeScratch::new(2, 0);
        let counters = CounterCapability::disabled();

        let mut master = SectionRecord::new("s", 0, CalcType::Calc, true, false, 0);
        master.start(0.0, &counters);
        let _ = master.stop(3.0, &counters, 30.0, 1);

        // the worker holds a record too, but the section is serial
        let mut worker = SectionRecord::new("s", 0, CalcType::Calc, true, false, 0);
        worker.start(0.0, &counters);
        let _ = worker.stop(9.0, &counters, 90.0, 1);

        let sharing = DirectSum;
        run_phase(MergePhase::MasterCopyIn, 0, Some(&mut master), &scratch, &sharing);
        run_phase(MergePhase::ParallelFoldIn, 1, Some(&mut worker), &scratch, &sharing);
        run_phase(MergePhase::Finalize, 0, Some(&mut master), &scratch, &sharing);

        assert_eq!(master.count, 1);
        assert!((master.time - 3.0).abs() < 1e-12);
        assert!((master.metric - 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_running_section_is_skipped_safely() {
        let scratch = MergeScratch::new(1, 0);
        let counters = CounterCapability::disabled();
        let mut record = SectionRecord::new("s", 0, CalcType::Calc, true, true, 0);
        record.start(0.0, &counters);
        let _ = record.stop(1.0, &counters, 0.0, 1);
        record.start(2.0, &counters); // mid-pair when the merge arrives

        let sharing = DirectSum;
        run_phase(MergePhase::MasterCopyIn, 0, Some(&mut record), &scratch, &sharing);
        run_phase(MergePhase::Finalize, 0, Some(&mut record), &scratch, &sharing);

        assert!(!record.merged);
        assert!(record.is_running());
    }

    #[test]
    fn test_direct_sum_folds_counters_across_threads() {
        let sharing = DirectSum;
        let totals = sharing.fold(&[vec![10, 1], vec![20, 2], vec![30, 3]]);
        assert_eq!(totals, vec![60.0, 6.0]);
    }

    #[test]
    fn test_shared_group_counters_take_one_slot_per_group() {
        // 8 threads, groups of 4, process owns the whole node
        let sharing = SharedGroupCounters {
            group_width: 4,
            groups_per_node: 4,
            procs_per_node: 1,
            rank_on_node: 0,
        };
        // every thread in a group observes the group's shared value
        let per_thread: Vec<Vec<u64>> = (0..8)
            .map(|t| if t < 4 { vec![100] } else { vec![200] })
            .collect();
        assert_eq!(sharing.fold(&per_thread), vec![300.0]);
    }

    #[test]
    fn test_shared_group_counters_split_crowded_groups() {
        // 8 processes on a 4-group node: two processes share each group
        let sharing = SharedGroupCounters {
            group_width: 4,
            groups_per_node: 4,
            procs_per_node: 8,
            rank_on_node: 1,
        };
        let per_thread = vec![vec![1000u64]];
        assert_eq!(sharing.fold(&per_thread), vec![500.0]);
    }
}
