use crate::config::ReportLevel;
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Performance Telemetry Driver - runs an instrumented synthetic workload
/// and prints the aggregated section report
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// Number of team threads for the parallel workload phase
    #[clap(short = 't', long, default_value_t = default_threads())]
    pub threads: usize,

    /// Iterations of each synthetic kernel
    #[clap(short = 'i', long, default_value_t = crate::defaults::ITERATIONS)]
    pub iterations: usize,

    /// Matrix dimension of the synthetic compute kernel
    #[clap(short = 's', long, default_value_t = crate::defaults::KERNEL_SIZE)]
    pub kernel_size: usize,

    /// Warm-up iterations discarded before measurement
    #[clap(short = 'w', long, default_value_t = crate::defaults::WARMUP_ITERATIONS)]
    pub warmup_iterations: usize,

    /// Report verbosity
    #[clap(long, value_enum, default_value_t = ReportChoice::Basic)]
    pub report: ReportChoice,

    /// Output file for the JSON report
    #[clap(short = 'o', long)]
    pub output_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

fn default_threads() -> usize {
    // use the core count, but cap at 8 for reasonable defaults
    num_cpus::get().min(8)
}

/// Report verbosity choices exposed on the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ReportChoice {
    /// Cluster statistics per section
    #[clap(name = "basic")]
    Basic,

    /// Basic plus per-process rows
    #[clap(name = "detail")]
    Detail,

    /// Detail plus hardware-counter totals
    #[clap(name = "full")]
    Full,
}

impl From<ReportChoice> for ReportLevel {
    fn from(choice: ReportChoice) -> Self {
        match choice {
            ReportChoice::Basic => ReportLevel::Basic,
            ReportChoice::Detail => ReportLevel::Detail,
            ReportChoice::Full => ReportLevel::Full,
        }
    }
}

/// Configuration for the driver run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DriverConfiguration {
    pub threads: usize,
    pub iterations: usize,
    pub kernel_size: usize,
    pub warmup_iterations: usize,
    pub report_level: ReportLevel,
    pub output_file: Option<PathBuf>,
}

impl From<&Args> for DriverConfiguration {
    fn from(args: &Args) -> Self {
        Self {
            threads: args.threads.max(1),
            iterations: args.iterations,
            kernel_size: args.kernel_size,
            warmup_iterations: args.warmup_iterations,
            report_level: args.report.into(),
            output_file: args.output_file.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_choice_maps_to_level() {
        assert_eq!(ReportLevel::from(ReportChoice::Basic), ReportLevel::Basic);
        assert_eq!(ReportLevel::from(ReportChoice::Detail), ReportLevel::Detail);
        assert_eq!(ReportLevel::from(ReportChoice::Full), ReportLevel::Full);
    }

    #[test]
    fn test_configuration_clamps_zero_threads() {
        let args = Args::parse_from(["perf-telemetry", "--threads", "0"]);
        let config = DriverConfiguration::from(&args);
        assert_eq!(config.threads, 1);
    }

    #[test]
    fn test_default_threads_is_positive() {
        assert!(default_threads() >= 1);
        assert!(default_threads() <= 8);
    }
}
