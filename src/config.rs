//! Runtime configuration from the environment.
//!
//! The engine reads a small set of environment variables at session
//! construction, mirroring how batch schedulers communicate job topology:
//!
//! - `COUNTER_CHOOSER`: which counter event family to measure
//!   (`flops|bandwidth|vector|cache|cycle|loadstore|user`; default `user`)
//! - `TELEMETRY_REPORT`: report verbosity (`basic|detail|full`)
//! - `PROCS_PER_NODE` / `RANK_ON_NODE`: this process's placement among its
//!   node-mates, consumed by the shared-counter fold strategy
//! - `BYPASS_TELEMETRY`: when set (any value), the engine is disabled and
//!   every operation becomes a no-op

use crate::counters::CounterMode;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::warn;

/// Report verbosity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReportLevel {
    /// Cluster statistics per section
    Basic,
    /// Basic plus per-process rows
    Detail,
    /// Detail plus hardware-counter totals
    Full,
}

impl std::str::FromStr for ReportLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "detail" => Ok(Self::Detail),
            "full" => Ok(Self::Full),
            other => Err(format!("unknown report level '{}'", other)),
        }
    }
}

/// Node placement of this process, for counter-sharing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTopology {
    pub procs_per_node: usize,
    pub rank_on_node: usize,
}

impl Default for NodeTopology {
    fn default() -> Self {
        Self {
            procs_per_node: 1,
            rank_on_node: 0,
        }
    }
}

/// Session configuration resolved from the environment.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// `None` means user-declared metrics only
    pub counter_mode: Option<CounterMode>,
    pub report_level: ReportLevel,
    pub topology: NodeTopology,
    pub bypass: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            counter_mode: None,
            report_level: ReportLevel::Basic,
            topology: NodeTopology::default(),
            bypass: false,
        }
    }
}

impl TelemetryConfig {
    /// Resolve the configuration from environment variables.
    ///
    /// Unknown values fall back to defaults with a warning rather than
    /// failing; misconfiguration must never take the host application
    /// down.
    pub fn from_env() -> Self {
        let counter_mode = match env::var("COUNTER_CHOOSER") {
            Ok(v) => parse_counter_chooser(&v),
            Err(_) => None,
        };

        let report_level = match env::var("TELEMETRY_REPORT") {
            Ok(v) => v.parse().unwrap_or_else(|e: String| {
                warn!("{}; using basic", e);
                ReportLevel::Basic
            }),
            Err(_) => ReportLevel::Basic,
        };

        let topology = NodeTopology {
            procs_per_node: env_usize("PROCS_PER_NODE", 1),
            rank_on_node: env_usize("RANK_ON_NODE", 0),
        };

        let bypass = env::var("BYPASS_TELEMETRY").is_ok();

        Self {
            counter_mode,
            report_level,
            topology,
            bypass,
        }
    }
}

fn parse_counter_chooser(value: &str) -> Option<CounterMode> {
    match value.to_ascii_lowercase().as_str() {
        "flops" => Some(CounterMode::Flops),
        "bandwidth" => Some(CounterMode::Bandwidth),
        "vector" => Some(CounterMode::Vector),
        "cache" => Some(CounterMode::Cache),
        "cycle" => Some(CounterMode::Cycle),
        "loadstore" => Some(CounterMode::LoadStore),
        "user" => None,
        other => {
            warn!("unknown COUNTER_CHOOSER value '{}'; using user-declared metrics", other);
            None
        }
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(v) => v.parse().unwrap_or_else(|_| {
            warn!("{} value '{}' is not a number; using {}", key, v, default);
            default
        }),
        Err(_) => default,
    }
}

/// Validate a team size before session construction.
///
/// Zero threads is meaningless and very large teams exhaust the merge
/// scratch for no benefit.
pub fn validate_team_size(team_size: usize) -> Result<()> {
    if team_size == 0 {
        anyhow::bail!("team size cannot be zero");
    }
    if team_size > 1024 {
        anyhow::bail!("team size {} is too high (maximum 1024)", team_size);
    }
    Ok(())
}

/// Validate a section label.
///
/// Labels identify sections across threads and processes; an empty label
/// can never be reconciled.
pub fn validate_label(label: &str) -> Result<()> {
    if label.is_empty() {
        anyhow::bail!("section label cannot be empty");
    }
    Ok(())
}
