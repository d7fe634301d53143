//! Report assembly and output.
//!
//! The report layer consumes the master monitor after `aggregate()` and
//! renders the cluster statistics: a human-readable table ordered by the
//! elapsed-time ranking, and a structured JSON document for external
//! analysis. Only rank 0 should print; every other rank holds statistics
//! whose ordering is legitimately its own.

use crate::config::ReportLevel;
use crate::record::CalcType;
use crate::session::Monitor;
use crate::units::{scale_rate, scale_unit, MetricMode};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Report metadata for reproducibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub processes: usize,
    pub report_level: ReportLevel,
}

/// Job-wide summary values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSummary {
    /// Elapsed seconds of the root section on this process
    pub root_elapsed: f64,
    /// Mean accumulated joules across processes, when power is measured
    pub mean_joules: Option<f64>,
    /// Peak wattage observed on this process, when power is measured
    pub watt_max: Option<f64>,
}

/// One section's row in the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionReport {
    pub label: String,
    pub calc_type: CalcType,
    pub exclusive: bool,
    pub call_count: u64,
    pub time_mean: f64,
    pub time_stddev: f64,
    /// Share of the root section's elapsed time, in percent
    pub time_percent: f64,
    /// Max per-process time, present for communication-type sections
    pub comm_time_max: Option<f64>,
    pub metric_value: f64,
    pub metric_unit: String,
    /// Per-process (time, metric, count) rows; detail level and up
    pub per_rank: Option<Vec<RankRow>>,
    /// Merged per-event counter totals; full level only
    pub counter_totals: Option<Vec<f64>>,
}

/// One process's contribution to a section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankRow {
    pub rank: usize,
    pub time: f64,
    pub metric: f64,
    pub count: u64,
}

/// The complete report document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReport {
    pub metadata: ReportMetadata,
    pub job: JobSummary,
    /// Sections in descending mean-elapsed-time order
    pub sections: Vec<SectionReport>,
}

impl TelemetryReport {
    /// Assemble the report from the master monitor after aggregation.
    pub fn from_monitor(monitor: &Monitor, level: ReportLevel) -> Self {
        let root_elapsed = monitor.root_elapsed();
        let mut sections = Vec::new();

        for &id in monitor.ranking() {
            let record = match monitor.section(id) {
                Some(r) => r,
                None => continue,
            };
            let stats = match record.stats.as_ref() {
                Some(s) => s,
                None => continue,
            };
            let mode = monitor
                .metric_mode(id)
                .unwrap_or(MetricMode::UserFlops);

            let (metric_value, metric_unit) = if mode.is_percentage() {
                scale_unit(stats.metric_mean, mode)
            } else {
                scale_rate(stats.metric_mean, stats.time_mean, mode)
            };

            let time_percent = if root_elapsed > 0.0 {
                stats.time_mean / root_elapsed * 100.0
            } else {
                0.0
            };

            sections.push(SectionReport {
                label: record.label.clone(),
                calc_type: record.calc_type,
                exclusive: record.exclusive,
                call_count: stats.count_total,
                time_mean: stats.time_mean,
                time_stddev: stats.time_stddev,
                time_percent,
                comm_time_max: match record.calc_type {
                    CalcType::Comm => Some(stats.comm_time_max),
                    CalcType::Calc => None,
                },
                metric_value,
                metric_unit: metric_unit.to_string(),
                per_rank: match level {
                    ReportLevel::Basic => None,
                    ReportLevel::Detail | ReportLevel::Full => Some(
                        stats
                            .time_by_rank
                            .iter()
                            .enumerate()
                            .map(|(rank, &time)| RankRow {
                                rank,
                                time,
                                metric: stats.metric_by_rank[rank],
                                count: stats.count_by_rank[rank],
                            })
                            .collect(),
                    ),
                },
                counter_totals: match level {
                    ReportLevel::Full if !record.counter_totals.is_empty() => {
                        Some(record.counter_totals.clone())
                    }
                    _ => None,
                },
            });
        }

        let power = monitor.power_summary();
        let processes = monitor
            .section_stats(0)
            .map_or(1, |s| s.time_by_rank.len());
        Self {
            metadata: ReportMetadata {
                version: crate::VERSION.to_string(),
                timestamp: chrono::Utc::now(),
                processes,
                report_level: level,
            },
            job: JobSummary {
                root_elapsed,
                mean_joules: power.map(|p| p.mean_joules),
                watt_max: power.map(|p| p.watt_max),
            },
            sections,
        }
    }

    /// Render the human-readable report.
    pub fn write_text<W: Write>(&self, out: &mut W) -> Result<()> {
        writeln!(out, "Performance telemetry report (v{})", self.metadata.version)?;
        writeln!(out, "Total elapsed time: {:.6} s", self.job.root_elapsed)?;
        if let (Some(joules), Some(watts)) = (self.job.mean_joules, self.job.watt_max) {
            writeln!(out, "Mean energy: {:.2} J, peak power: {:.2} W", joules, watts)?;
        }
        writeln!(out)?;
        writeln!(
            out,
            "{:<24} {:>10} {:>12} {:>12} {:>7} {:>12}",
            "Section", "calls", "time[s]", "stddev", "t[%]", "metric"
        )?;
        for section in &self.sections {
            writeln!(
                out,
                "{:<24} {:>10} {:>12.6} {:>12.6} {:>7.2} {:>9.3} {}",
                truncate_label(&section.label, 24),
                section.call_count,
                section.time_mean,
                section.time_stddev,
                section.time_percent,
                section.metric_value,
                section.metric_unit,
            )?;
            if let Some(max) = section.comm_time_max {
                writeln!(out, "{:<24} {:>10} {:>12.6} (slowest process)", "", "max", max)?;
            }
            if let Some(per_rank) = &section.per_rank {
                for row in per_rank {
                    writeln!(
                        out,
                        "    rank {:<4} {:>12.6} s {:>14.3} metric {:>10} calls",
                        row.rank, row.time, row.metric, row.count
                    )?;
                }
            }
            if let Some(totals) = &section.counter_totals {
                writeln!(out, "    counters: {:?}", totals)?;
            }
        }
        Ok(())
    }

    /// Write the report as pretty JSON.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        info!("report written to {:?}", path.as_ref());
        Ok(())
    }
}

fn truncate_label(label: &str, width: usize) -> String {
    if label.chars().count() <= width {
        label.to_string()
    } else {
        let head: String = label.chars().take(width.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
