//! Distributed aggregation and order statistics.
//!
//! After the thread merge, every process holds one process-level record
//! per section. This module exchanges those records across the process
//! group (all-gather plus a call-count reduction), computes mean and
//! standard-deviation statistics over the process dimension, and produces
//! the elapsed-time ranking of sections.
//!
//! Every process computes its own copy of the statistics and ranking; the
//! rankings may legitimately differ across processes whose per-process
//! times diverge, so reporting trusts rank 0's copy only.
//!
//! Collective failures are fatal. A stalled or mismatched collective
//! leaves part of the group blocked forever, so the aggregator aborts the
//! whole job rather than returning partial statistics.

use crate::comm::{CommError, ProcessGroup};
use crate::record::{CalcType, SectionRecord};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Cluster-wide statistics for one section.
///
/// The per-rank arrays have length = process-group size and are rebuilt
/// from scratch on every aggregation call; repeated aggregation without
/// intervening measurement reproduces identical values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessStats {
    pub time_by_rank: Vec<f64>,
    pub metric_by_rank: Vec<f64>,
    pub count_by_rank: Vec<u64>,
    /// Per-event counter totals for every rank (rank-major); empty when
    /// counters are disabled
    pub counters_by_rank: Vec<Vec<f64>>,
    /// Job-wide total call count (sum reduction across the group)
    pub count_total: u64,
    pub time_mean: f64,
    pub time_stddev: f64,
    pub metric_mean: f64,
    pub metric_stddev: f64,
    /// Maximum per-process time; recorded for communication-type sections
    /// where the slowest participant dominates wait time
    pub comm_time_max: f64,
}

fn fatal(group: &dyn ProcessGroup, e: CommError) -> ! {
    error!("aborting job: {}", e);
    group.abort(1)
}

/// Exchange one section's (time, metric, count) triple across the group
/// and sum-reduce the call count.
///
/// With a group of size 1 every collective degenerates to a local copy.
/// Any collective failure aborts the job.
pub fn gather_basic_stats(record: &SectionRecord, group: &dyn ProcessGroup) -> ProcessStats {
    let time_by_rank = group
        .all_gather(record.time)
        .unwrap_or_else(|e| fatal(group, e));
    let metric_by_rank = group
        .all_gather(record.metric)
        .unwrap_or_else(|e| fatal(group, e));
    let count_by_rank = group
        .all_gather_u64(record.count)
        .unwrap_or_else(|e| fatal(group, e));
    let count_total = group
        .reduce_sum_u64(record.count)
        .unwrap_or_else(|e| fatal(group, e));

    ProcessStats {
        time_by_rank,
        metric_by_rank,
        count_by_rank,
        counters_by_rank: Vec::new(),
        count_total,
        ..ProcessStats::default()
    }
}

/// Exchange the per-event counter totals so every process holds every
/// process's values. Printing is driven by rank 0 alone, but some derived
/// computations want the global picture on every rank.
pub fn gather_counter_totals(record: &SectionRecord, group: &dyn ProcessGroup) -> Vec<Vec<f64>> {
    if record.counter_totals.is_empty() {
        return Vec::new();
    }
    // one all-gather per event; rank-major result
    let mut by_event = Vec::with_capacity(record.counter_totals.len());
    for &total in &record.counter_totals {
        by_event.push(group.all_gather(total).unwrap_or_else(|e| fatal(group, e)));
    }
    let size = group.size();
    (0..size)
        .map(|rank| by_event.iter().map(|ev| ev[rank]).collect())
        .collect()
}

/// Compute mean and sample (N−1) standard deviation of time and metric
/// over the process dimension, plus the max per-process time for
/// communication-type sections.
pub fn compute_statistics(stats: &mut ProcessStats, calc_type: CalcType) {
    let n = stats.time_by_rank.len();
    if n == 0 {
        return;
    }
    let nf = n as f64;

    stats.time_mean = stats.time_by_rank.iter().sum::<f64>() / nf;
    stats.metric_mean = stats.metric_by_rank.iter().sum::<f64>() / nf;

    stats.time_stddev = 0.0;
    stats.metric_stddev = 0.0;
    if n > 1 {
        let mut time_ss = 0.0;
        let mut metric_ss = 0.0;
        for i in 0..n {
            let dt = stats.time_by_rank[i] - stats.time_mean;
            let dm = stats.metric_by_rank[i] - stats.metric_mean;
            time_ss += dt * dt;
            metric_ss += dm * dm;
        }
        stats.time_stddev = (time_ss / (nf - 1.0)).sqrt();
        stats.metric_stddev = (metric_ss / (nf - 1.0)).sqrt();
    }

    stats.comm_time_max = 0.0;
    if calc_type == CalcType::Comm {
        stats.comm_time_max = stats
            .time_by_rank
            .iter()
            .fold(0.0_f64, |max, &t| max.max(t));
    }
}

/// Produce the permutation of section ids sorted by descending mean
/// elapsed time.
///
/// Keys are `(mean_time, total_count)` per section in registration order.
/// Zero-call sections rank with key 0.0, and ties keep their registration
/// order (the sort is stable). The ranking is recomputed in full on every
/// call because the section set can grow between calls.
pub fn rank_sections_by_time(keys: &[(f64, u64)]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    let cost = |i: usize| -> f64 {
        let (mean_time, count) = keys[i];
        if count > 0 {
            mean_time
        } else {
            0.0
        }
    };
    order.sort_by(|&a, &b| {
        cost(b)
            .partial_cmp(&cost(a))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::CounterCapability;

    /// Group double that replays scripted per-rank values.
    struct ScriptedGroup {
        rank: usize,
        times: Vec<f64>,
        metrics: Vec<f64>,
        counts: Vec<u64>,
    }

    impl ProcessGroup for ScriptedGroup {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.times.len()
        }

        fn all_gather(&self, value: f64) -> Result<Vec<f64>, CommError> {
            // replay whichever script the local value matches
            if (self.times[self.rank] - value).abs() < 1e-12 {
                Ok(self.times.clone())
            } else {
                Ok(self.metrics.clone())
            }
        }

        fn all_gather_u64(&self, _value: u64) -> Result<Vec<u64>, CommError> {
            Ok(self.counts.clone())
        }

        fn reduce_sum_u64(&self, _value: u64) -> Result<u64, CommError> {
            Ok(self.counts.iter().sum())
        }

        fn abort(&self, code: i32) -> ! {
            panic!("scripted group abort({})", code)
        }
    }

    #[test]
    fn test_two_process_statistics_concrete_numbers() {
        // two processes report 1.0s and 3.0s for section "X", 10 calls each
        let counters = CounterCapability::disabled();
        let mut record = SectionRecord::new("X", 0, CalcType::Calc, true, false, 0);
        record.start(0.0, &counters);
        record.stop(1.0, &counters, 0.0, 1);
        record.count = 10;

        let group = ScriptedGroup {
            rank: 0,
            times: vec![1.0, 3.0],
            metrics: vec![0.0, 0.0],
            counts: vec![10, 10],
        };

        let mut stats = gather_basic_stats(&record, &group);
        compute_statistics(&mut stats, CalcType::Calc);

        assert_eq!(stats.count_total, 20);
        assert!((stats.time_mean - 2.0).abs() < 1e-12);
        assert!((stats.time_stddev - std::f64::consts::SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_comm_sections_record_max_time() {
        let mut stats = ProcessStats {
            time_by_rank: vec![0.5, 2.5, 1.0],
            metric_by_rank: vec![0.0, 0.0, 0.0],
            count_by_rank: vec![1, 1, 1],
            count_total: 3,
            ..ProcessStats::default()
        };
        compute_statistics(&mut stats, CalcType::Comm);
        assert!((stats.comm_time_max - 2.5).abs() < 1e-12);

        let mut calc = stats.clone();
        compute_statistics(&mut calc, CalcType::Calc);
        assert_eq!(calc.comm_time_max, 0.0);
    }

    #[test]
    fn test_single_process_degenerates_to_local_copy() {
        let counters = CounterCapability::disabled();
        let mut record = SectionRecord::new("s", 0, CalcType::Calc, true, false, 0);
        record.start(0.0, &counters);
        record.stop(2.0, &counters, 40.0, 1);

        let group = crate::comm::SingleProcess;
        let mut stats = gather_basic_stats(&record, &group);
        compute_statistics(&mut stats, CalcType::Calc);

        assert_eq!(stats.time_by_rank, vec![2.0]);
        assert!((stats.time_mean - 2.0).abs() < 1e-12);
        assert_eq!(stats.time_stddev, 0.0);
        assert!((stats.metric_mean - 40.0).abs() < 1e-12);
        assert_eq!(stats.count_total, 1);
    }

    #[test]
    fn test_ranking_sorts_by_descending_mean_time() {
        let keys = vec![(0.5, 10), (3.0, 10), (1.5, 10)];
        assert_eq!(rank_sections_by_time(&keys), vec![1, 2, 0]);
    }

    #[test]
    fn test_ranking_ties_keep_registration_order() {
        let keys = vec![(1.0, 5), (2.0, 5), (1.0, 5), (2.0, 5)];
        assert_eq!(rank_sections_by_time(&keys), vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_ranking_zero_call_sections_sink_in_place() {
        // a zero-call section ranks as 0.0 regardless of stale mean time
        let keys = vec![(9.0, 0), (1.0, 4), (0.0, 2)];
        assert_eq!(rank_sections_by_time(&keys), vec![1, 0, 2]);
    }

    #[test]
    fn test_counter_totals_gather_rank_major() {
        let counters = CounterCapability::disabled();
        let mut record = SectionRecord::new("s", 0, CalcType::Calc, true, false, 0);
        record.counter_totals = vec![5.0, 7.0];

        let group = crate::comm::SingleProcess;
        let by_rank = gather_counter_totals(&record, &group);
        assert_eq!(by_rank, vec![vec![5.0, 7.0]]);
    }
}
