//! Power-measurement capability boundary.
//!
//! A power backend exposes per-component energy accumulation and a small
//! get/set knob interface for platform power controls. The engine owns one
//! [`PowerAccumulator`] attached to the root section only; nested sections
//! never carry their own power state.
//!
//! Like the counter capability, a missing or failing power backend
//! downgrades the feature rather than failing the run.

use thiserror::Error;
use tracing::warn;

/// Errors reported by a power backend.
#[derive(Debug, Error)]
pub enum PowerError {
    /// The backend is not present on this platform
    #[error("power backend unavailable: {0}")]
    Unavailable(String),
    /// A knob id or value was rejected by the platform
    #[error("invalid power knob operation: {0}")]
    InvalidKnob(String),
}

/// Platform power-control knobs.
///
/// The accepted value range for each knob is platform-defined; the engine
/// passes values through unvalidated and surfaces backend rejections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerKnob {
    /// CPU frequency in MHz
    CpuFrequency,
    /// Memory access throttling percentage
    MemoryThrottle,
    /// Instruction issue rate per cycle
    IssueRate,
    /// Number of concurrent execution pipelines
    Pipelines,
    /// Eco mode state
    EcoMode,
}

/// Capability interface to a power-measurement backend.
pub trait PowerBackend: Send + Sync {
    /// Begin accumulating energy on all measured components.
    fn start_accumulation(&mut self) -> Result<(), PowerError>;

    /// Stop accumulating and return joules per component since start.
    fn stop_accumulation(&mut self) -> Result<Vec<f64>, PowerError>;

    /// Read the current value of a control knob.
    fn get_knob(&self, knob: PowerKnob) -> Result<i64, PowerError>;

    /// Set a control knob to a new value.
    fn set_knob(&mut self, knob: PowerKnob, value: i64) -> Result<(), PowerError>;
}

/// Accumulated power statistics for the root section.
///
/// One joule total per measured physical component plus the highest
/// wattage observed over any accumulation interval.
#[derive(Debug, Clone, Default)]
pub struct PowerAccumulator {
    pub joules: Vec<f64>,
    pub watt_max: f64,
}

impl PowerAccumulator {
    /// Fold one accumulation interval into the running totals.
    ///
    /// `interval_joules` holds the per-component energy of the interval and
    /// `elapsed` its duration in seconds.
    pub fn accumulate(&mut self, interval_joules: &[f64], elapsed: f64) {
        if self.joules.len() < interval_joules.len() {
            self.joules.resize(interval_joules.len(), 0.0);
        }
        for (total, &j) in self.joules.iter_mut().zip(interval_joules) {
            *total += j;
        }
        if elapsed > 0.0 {
            let watts: f64 = interval_joules.iter().sum::<f64>() / elapsed;
            if watts > self.watt_max {
                self.watt_max = watts;
            }
        }
    }

    /// Total energy across all components.
    pub fn total_joules(&self) -> f64 {
        self.joules.iter().sum()
    }
}

/// The power capability as held by a session.
pub struct PowerCapability {
    backend: Option<Box<dyn PowerBackend>>,
    pub accumulator: PowerAccumulator,
}

impl PowerCapability {
    /// A capability with no power measurement.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            accumulator: PowerAccumulator::default(),
        }
    }

    /// Wrap a live backend.
    pub fn new(backend: Box<dyn PowerBackend>) -> Self {
        Self {
            backend: Some(backend),
            accumulator: PowerAccumulator::default(),
        }
    }

    /// Whether a backend is attached.
    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Start an accumulation interval. Failures downgrade the capability.
    pub fn start(&mut self) {
        if let Some(backend) = &mut self.backend {
            if let Err(e) = backend.start_accumulation() {
                warn!("power accumulation unavailable ({}); disabling power measurement", e);
                self.backend = None;
            }
        }
    }

    /// Stop the interval and fold its energy into the accumulator.
    pub fn stop(&mut self, elapsed: f64) {
        if let Some(backend) = &mut self.backend {
            match backend.stop_accumulation() {
                Ok(joules) => self.accumulator.accumulate(&joules, elapsed),
                Err(e) => {
                    warn!("power read failed ({}); disabling power measurement", e);
                    self.backend = None;
                }
            }
        }
    }

    /// Read a control knob.
    pub fn get_knob(&self, knob: PowerKnob) -> Result<i64, PowerError> {
        match &self.backend {
            Some(backend) => backend.get_knob(knob),
            None => Err(PowerError::Unavailable("no power backend".to_string())),
        }
    }

    /// Set a control knob.
    pub fn set_knob(&mut self, knob: PowerKnob, value: i64) -> Result<(), PowerError> {
        match &mut self.backend {
            Some(backend) => backend.set_knob(knob, value),
            None => Err(PowerError::Unavailable("no power backend".to_string())),
        }
    }
}

impl std::fmt::Debug for PowerCapability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerCapability")
            .field("enabled", &self.is_enabled())
            .field("accumulator", &self.accumulator)
            .finish()
    }
}
