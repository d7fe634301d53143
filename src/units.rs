//! Measurement-mode classification and unit scaling.
//!
//! Every section ends up with a single scalar "metric" (bytes moved,
//! floating-point operations, a percentage, or an instruction count) whose
//! interpretation depends on the measurement mode in effect. This module
//! decides which of the eight mutually exclusive interpretations applies
//! and converts raw magnitudes into human-scaled values.
//!
//! The scaling function is pure and side-effect-free so it can be tested
//! in isolation and called from any report path.

use crate::counters::CounterMode;
use crate::record::CalcType;
use serde::{Deserialize, Serialize};

/// The eight mutually exclusive metric interpretations.
///
/// The first two are user-declared values passed to `stop()`; the rest are
/// derived from hardware-counter measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricMode {
    /// User-declared data movement in bytes, reported as a transfer rate
    UserBytes,
    /// User-declared floating-point operations, reported as flop/s
    UserFlops,
    /// Counter-measured data access bandwidth (bytes)
    Bandwidth,
    /// Counter-measured floating-point operations
    Flops,
    /// Counter-measured vectorization percentage
    Vector,
    /// Counter-measured cache hit percentage
    Cache,
    /// Counter-measured cycles and instructions
    Cycle,
    /// Counter-measured load/store instruction percentage
    LoadStore,
}

impl MetricMode {
    /// True for the modes whose displayed value is a percentage.
    pub fn is_percentage(self) -> bool {
        matches!(self, Self::Vector | Self::Cache | Self::LoadStore)
    }

    /// True for the user-declared (non-counter) modes.
    pub fn is_user_declared(self) -> bool {
        matches!(self, Self::UserBytes | Self::UserFlops)
    }
}

/// Select the metric mode for a section.
///
/// Priority order: an active hardware-counter event set always wins over
/// the user-declared modes; among user-declared modes the section's
/// calculation type picks bytes (communication) or flops (computation).
///
/// Returns `None` for a section with no counter events and no calculation
/// type, which is an error case the caller reports.
pub fn select_mode(active_counters: Option<CounterMode>, calc_type: CalcType) -> Option<MetricMode> {
    if let Some(mode) = active_counters {
        return Some(match mode {
            CounterMode::Bandwidth => MetricMode::Bandwidth,
            CounterMode::Flops => MetricMode::Flops,
            CounterMode::Vector => MetricMode::Vector,
            CounterMode::Cache => MetricMode::Cache,
            CounterMode::Cycle => MetricMode::Cycle,
            CounterMode::LoadStore => MetricMode::LoadStore,
        });
    }
    match calc_type {
        CalcType::Comm => Some(MetricMode::UserBytes),
        CalcType::Calc => Some(MetricMode::UserFlops),
    }
}

const K: f64 = 1e3;
const M: f64 = 1e6;
const G: f64 = 1e9;
const T: f64 = 1e12;
const P: f64 = 1e15;

/// Scale a raw magnitude into a display value and unit label.
///
/// Throughput and rate modes step at powers of 10^3 (M/G/T/P); percentage
/// modes pass the value through unchanged; the cycle/instruction mode uses
/// the ".ips" (instructions per second) suffix family.
///
/// ## Examples
///
/// ```rust
/// # use perf_telemetry::units::{scale_unit, MetricMode};
/// assert_eq!(scale_unit(2.5e9, MetricMode::UserFlops), (2.5, "Gflops"));
/// assert_eq!(scale_unit(2.5e12, MetricMode::UserFlops), (2.5, "Tflops"));
/// assert_eq!(scale_unit(87.5, MetricMode::Cache), (87.5, "%"));
/// ```
pub fn scale_unit(magnitude: f64, mode: MetricMode) -> (f64, &'static str) {
    match mode {
        MetricMode::UserBytes | MetricMode::Bandwidth => {
            if magnitude > P {
                (magnitude / P, "PB/sec")
            } else if magnitude > T {
                (magnitude / T, "TB/sec")
            } else if magnitude > G {
                (magnitude / G, "GB/sec")
            } else {
                (magnitude / M, "MB/sec")
            }
        }
        MetricMode::UserFlops | MetricMode::Flops => {
            if magnitude > P {
                (magnitude / P, "Pflops")
            } else if magnitude > T {
                (magnitude / T, "Tflops")
            } else if magnitude > G {
                (magnitude / G, "Gflops")
            } else {
                (magnitude / M, "Mflops")
            }
        }
        MetricMode::Vector | MetricMode::Cache | MetricMode::LoadStore => (magnitude, "%"),
        MetricMode::Cycle => {
            if magnitude > P {
                (magnitude / P, "P.ips")
            } else if magnitude > T {
                (magnitude / T, "T.ips")
            } else if magnitude > G {
                (magnitude / G, "G.ips")
            } else {
                (magnitude / M, "M.ips")
            }
        }
    }
}

/// Scale a rate (metric per elapsed second) for display.
///
/// Percentage modes ignore elapsed time; rate modes divide the cumulative
/// magnitude by elapsed seconds before scaling. A zero elapsed time yields
/// a zero rate rather than infinity.
pub fn scale_rate(magnitude: f64, elapsed: f64, mode: MetricMode) -> (f64, &'static str) {
    if mode.is_percentage() {
        return scale_unit(magnitude, mode);
    }
    let rate = if elapsed > 0.0 { magnitude / elapsed } else { 0.0 };
    scale_unit(rate, mode)
}
