//! Hardware performance counter capability boundary.
//!
//! The engine never programs a performance-monitoring unit itself. It
//! consumes a backend through the [`CounterBackend`] trait: the backend is
//! configured once with an event list and then read repeatedly; values are
//! opaque 64-bit totals per configured event. Reading (rather than
//! start/stop cycling) the counters is what lets nested and inclusive
//! sections keep accumulating correctly.
//!
//! When no backend is available, or a backend fails during configuration,
//! the capability downgrades to [`DisabledCounters`] for the remainder of
//! the run and the engine falls back to user-declared metrics. Backend
//! failure is never fatal.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Errors reported by a counter backend.
#[derive(Debug, Error)]
pub enum CounterError {
    /// The requested event set is not supported by this hardware
    #[error("counter event set not supported: {0}")]
    Unsupported(String),
    /// Reading the counters failed
    #[error("counter read failed: {0}")]
    ReadFailed(String),
}

/// The hardware-counter event family selected for a run.
///
/// Exactly one family is active at a time; it determines both which events
/// are programmed and how the section metric is derived from their totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CounterMode {
    /// Data access bandwidth events (bytes read and written)
    Bandwidth,
    /// Floating-point operation events
    Flops,
    /// Scalar and vectorized floating-point events
    Vector,
    /// Cache hit and miss events
    Cache,
    /// Cycle and instruction events
    Cycle,
    /// Load and store instruction events
    LoadStore,
}

/// A single named hardware event within an event set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterEvent {
    pub name: String,
}

impl CounterEvent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// The ordered list of events programmed for a counter mode.
///
/// Event order is significant: the metric derivation below indexes into
/// the totals array by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSet {
    pub mode: CounterMode,
    pub events: Vec<CounterEvent>,
}

impl EventSet {
    /// Build the canonical event list for a counter mode.
    pub fn for_mode(mode: CounterMode) -> Self {
        let names: &[&str] = match mode {
            CounterMode::Bandwidth => &["mem_read_bytes", "mem_write_bytes"],
            CounterMode::Flops => &["fp_ops_scalar", "fp_ops_vector"],
            CounterMode::Vector => &["fp_ops_scalar", "fp_ops_vector"],
            CounterMode::Cache => &["cache_hits", "cache_misses"],
            CounterMode::Cycle => &["cycles", "instructions"],
            CounterMode::LoadStore => &["load_ins", "store_ins"],
        };
        Self {
            mode,
            events: names.iter().map(|&n| CounterEvent::new(n)).collect(),
        }
    }

    /// Number of programmed events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Derive the section metric from merged per-event totals.
    ///
    /// The returned value carries the dimension the metric mode expects:
    /// bytes for bandwidth, operation counts for flops and cycle, and a
    /// percentage for the ratio modes. Totals shorter than the event set
    /// (a section that never ran under counters) yield zero.
    pub fn derive_metric(&self, totals: &[f64]) -> f64 {
        if totals.len() < self.events.len() {
            return 0.0;
        }
        match self.mode {
            CounterMode::Bandwidth => totals[0] + totals[1],
            CounterMode::Flops => totals[0] + totals[1],
            CounterMode::Vector => {
                let all = totals[0] + totals[1];
                if all > 0.0 {
                    totals[1] / all * 100.0
                } else {
                    0.0
                }
            }
            CounterMode::Cache => {
                let all = totals[0] + totals[1];
                if all > 0.0 {
                    totals[0] / all * 100.0
                } else {
                    0.0
                }
            }
            CounterMode::Cycle => totals[1],
            CounterMode::LoadStore => {
                let all = totals[0] + totals[1];
                if all > 0.0 {
                    totals[0] / all * 100.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Capability interface to a hardware-counter backend.
///
/// Implementations must be callable from any thread of the team; each
/// thread reads its own core's counters. `read` fills the caller's buffer
/// with one cumulative value per configured event.
pub trait CounterBackend: Send + Sync {
    /// Program the backend with the given event set.
    fn configure(&mut self, events: &EventSet) -> Result<(), CounterError>;

    /// Read current counter values for the calling thread.
    fn read(&self, buffer: &mut [u64]) -> Result<(), CounterError>;
}

/// The no-counters backend: every section falls back to user-declared
/// metrics.
#[derive(Debug, Default)]
pub struct DisabledCounters;

impl CounterBackend for DisabledCounters {
    fn configure(&mut self, events: &EventSet) -> Result<(), CounterError> {
        Err(CounterError::Unsupported(format!(
            "no counter backend available for {:?}",
            events.mode
        )))
    }

    fn read(&self, _buffer: &mut [u64]) -> Result<(), CounterError> {
        Ok(())
    }
}

/// The counter capability as held by a session: an optional configured
/// backend plus the event set in effect.
///
/// Construction attempts to configure the requested mode; on failure the
/// capability is disabled, a warning is emitted once, and all subsequent
/// reads are no-ops.
pub struct CounterCapability {
    backend: Option<Box<dyn CounterBackend>>,
    event_set: Option<EventSet>,
}

impl CounterCapability {
    /// A capability with no counters; sections use user-declared metrics.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            event_set: None,
        }
    }

    /// Try to bring up the backend for the requested mode.
    pub fn new(mut backend: Box<dyn CounterBackend>, mode: CounterMode) -> Self {
        let event_set = EventSet::for_mode(mode);
        match backend.configure(&event_set) {
            Ok(()) => Self {
                backend: Some(backend),
                event_set: Some(event_set),
            },
            Err(e) => {
                warn!(
                    "counter backend unavailable for {:?} ({}); falling back to user-declared metrics",
                    mode, e
                );
                Self::disabled()
            }
        }
    }

    /// The active counter mode, if any.
    pub fn mode(&self) -> Option<CounterMode> {
        self.event_set.as_ref().map(|s| s.mode)
    }

    /// The active event set, if any.
    pub fn event_set(&self) -> Option<&EventSet> {
        self.event_set.as_ref()
    }

    /// Number of configured events (zero when disabled).
    pub fn num_events(&self) -> usize {
        self.event_set.as_ref().map_or(0, EventSet::len)
    }

    /// Read current counter values into `buffer`.
    ///
    /// A read failure disables nothing mid-run; the failed reading leaves
    /// the buffer untouched and is logged at warn level by the caller's
    /// record, so a single transient fault degrades one measurement rather
    /// than the whole capability.
    pub fn read(&self, buffer: &mut [u64]) -> Result<(), CounterError> {
        match &self.backend {
            Some(backend) => backend.read(buffer),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for CounterCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterCapability")
            .field("mode", &self.mode())
            .field("num_events", &self.num_events())
            .finish()
    }
}
