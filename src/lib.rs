//! # Performance Telemetry Engine
//!
//! An in-process performance-telemetry engine for parallel numerical
//! applications, implemented in Rust. Application code marks named
//! "sections" of work; the engine accumulates elapsed time and
//! hardware-counter-derived metrics for each section across every thread
//! of every process and produces statistically aggregated reports.
//!
//! ## Architecture Overview
//!
//! The library is organized into several key modules:
//!
//! - `session`: The measurement session and per-thread `Monitor` handles
//! - `registry`: Two-level section naming (thread-local + process-shared)
//! - `record`: The per-section measurement state machine
//! - `merge`: The three-phase barrier-synchronized thread-merge protocol
//! - `aggregate`: Distributed statistics and the elapsed-time ranking
//! - `units`: Measurement-mode classification and unit scaling
//! - `counters`, `power`, `trace`, `comm`: capability boundaries to the
//!   hardware-counter, power, trace-export, and message-passing backends
//!
//! ## Usage Example
//!
//! ```rust
//! use perf_telemetry::Session;
//!
//! fn main() -> anyhow::Result<()> {
//!     let session = Session::single_threaded()?;
//!     let mut monitor = session.attach()?;
//!
//!     monitor.start("solver");
//!     // ... numerical work ...
//!     monitor.stop("solver", 2.0e9, 1); // 2 Gflop per call
//!
//!     monitor.aggregate()?;
//!     for position in 0..monitor.section_count() {
//!         if let Some(label) = monitor.section_label(position) {
//!             println!("#{} {}", position, label);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! A fixed-size team of threads shares one process's memory; a fixed-size
//! group of such processes coordinates through blocking collective
//! operations. `start`/`stop` never block. The thread-merge barriers and
//! the distributed collectives are the only suspension points, and both
//! are team/group collectives that every member must enter together.

/// The measurement session facade
///
/// Contains the `Session` builder and the per-thread `Monitor` handle
/// exposing the instrumentation API: `start`, `stop`, `reset`,
/// `aggregate`, `ranking` and the per-section statistics accessors.
pub mod session;

/// Section identity registries
///
/// The two-level naming scheme that reconciles sections registered by
/// only a subset of threads: a per-thread local map and a mutex-guarded
/// process-wide shared map, reconciled by label string.
pub mod registry;

/// Measurement record state machine
///
/// Per-section, per-thread accumulation of time, call counts, metrics and
/// raw counter deltas, with logged self-correcting usage-error handling.
pub mod record;

/// Three-phase thread-merge protocol
///
/// Folds per-thread records into one process-level record using a shared
/// per-thread scratch and full barriers between phases, with a pluggable
/// strategy for platforms whose counters are shared across core groups.
pub mod merge;

/// Distributed aggregation and order statistics
///
/// All-gather plus reduction across the process group, mean/stddev
/// statistics over the process dimension, and the stable descending
/// elapsed-time ranking of sections.
pub mod aggregate;

/// Measurement-mode classification and unit scaling
///
/// Picks one of the eight metric interpretations per section and converts
/// raw magnitudes into human-scaled units (K/M/G/T/P, percentages, .ips).
pub mod units;

/// Monotonic clock source
pub mod clock;

/// Hardware-counter capability boundary
pub mod counters;

/// Power-measurement capability boundary
pub mod power;

/// Trace-export capability boundary
pub mod trace;

/// Process-group capability boundary
pub mod comm;

/// Environment-driven configuration
pub mod config;

/// Report assembly and output
pub mod report;

/// Command-line interface for the driver binary
pub mod cli;

/// Colorized log formatting for the driver binary
pub mod logging;

// Re-export key types for convenient library usage

/// Measurement session and per-thread monitor handle
pub use session::{Monitor, Session};

/// Cluster statistics produced by aggregation
pub use aggregate::ProcessStats;

/// Section calculation type (communication vs. computation)
pub use record::CalcType;

/// Metric interpretation and unit scaling
pub use units::{scale_unit, MetricMode};

/// Report document and writer
pub use report::TelemetryReport;

/// The current version of the telemetry engine
///
/// This version string is automatically populated from Cargo.toml and used
/// in report output for reproducibility.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
///
/// Sensible defaults for the driver binary's synthetic workload, chosen to
/// finish in seconds on a laptop while still producing statistically
/// meaningful section timings.
pub mod defaults {
    /// Default iterations of each synthetic kernel
    ///
    /// 100 iterations keeps the default run short while accumulating
    /// enough start/stop pairs for stable per-section means.
    pub const ITERATIONS: usize = 100;

    /// Default matrix dimension of the synthetic compute kernel
    ///
    /// A 64x64 triple loop is large enough to dominate the section's
    /// instrumentation overhead and small enough to stay cache-resident.
    pub const KERNEL_SIZE: usize = 64;

    /// Default warm-up iterations
    ///
    /// Warm-up pairs are measured and then discarded with `reset_all`,
    /// removing cold-cache effects from the reported statistics.
    pub const WARMUP_ITERATIONS: usize = 10;
}
