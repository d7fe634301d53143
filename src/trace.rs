//! Trace-export capability boundary.
//!
//! An exporter receives a label definition per section plus one event per
//! start/stop transition, and is finalized once at the end of the run. The
//! engine drives the exporter; the file format and buffering strategy
//! belong entirely to the implementation behind the trait.

use crate::units::MetricMode;

/// Capability interface to a post-hoc trace writer.
pub trait TraceExporter: Send + Sync {
    /// Associate a section id with its label.
    fn label(&mut self, id: usize, text: &str);

    /// Record a section entry on the given process rank.
    fn event_start(&mut self, rank: usize, time: f64, id: usize, mode: MetricMode);

    /// Record a section exit with the instantaneous metric rate of the
    /// completed interval.
    fn event_stop(&mut self, rank: usize, time: f64, id: usize, mode: MetricMode, rate: f64);

    /// Flush and close the trace output. Called exactly once.
    fn finalize(&mut self);
}

/// Exporter that discards everything; installed when tracing is off.
#[derive(Debug, Default)]
pub struct NullTraceExporter;

impl TraceExporter for NullTraceExporter {
    fn label(&mut self, _id: usize, _text: &str) {}

    fn event_start(&mut self, _rank: usize, _time: f64, _id: usize, _mode: MetricMode) {}

    fn event_stop(&mut self, _rank: usize, _time: f64, _id: usize, _mode: MetricMode, _rate: f64) {}

    fn finalize(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exporter that records the sequence of calls, for ordering tests.
    #[derive(Default)]
    pub(crate) struct RecordingExporter {
        pub events: Vec<String>,
    }

    impl TraceExporter for RecordingExporter {
        fn label(&mut self, id: usize, text: &str) {
            self.events.push(format!("label {} {}", id, text));
        }

        fn event_start(&mut self, rank: usize, _time: f64, id: usize, _mode: MetricMode) {
            self.events.push(format!("start r{} s{}", rank, id));
        }

        fn event_stop(&mut self, rank: usize, _time: f64, id: usize, _mode: MetricMode, _rate: f64) {
            self.events.push(format!("stop r{} s{}", rank, id));
        }

        fn finalize(&mut self) {
            self.events.push("finalize".to_string());
        }
    }

    #[test]
    fn test_recording_exporter_preserves_order() {
        let mut exporter = RecordingExporter::default();
        exporter.label(1, "solver");
        exporter.event_start(0, 0.0, 1, MetricMode::UserFlops);
        exporter.event_stop(0, 1.0, 1, MetricMode::UserFlops, 2.0e9);
        exporter.finalize();
        assert_eq!(
            exporter.events,
            vec!["label 1 solver", "start r0 s1", "stop r0 s1", "finalize"]
        );
    }
}
