//! Process-group capability boundary.
//!
//! The distributed aggregator talks to the rest of the job through this
//! trait: rank/size queries plus blocking collective operations that every
//! member of the group must call together. A failed collective leaves some
//! processes blocked indefinitely, so collective failures are fatal — the
//! caller aborts the whole job rather than returning partial statistics.
//!
//! A single-process run uses [`SingleProcess`], which degenerates every
//! collective to a local copy.

use thiserror::Error;

/// Errors reported by the message-passing layer.
#[derive(Debug, Error)]
pub enum CommError {
    /// A collective operation returned a failure code
    #[error("collective operation failed: {0}")]
    Collective(String),
}

/// Capability interface to the job's process group.
///
/// All collectives are blocking and must be entered by every group member;
/// only operations separated by a collective have a defined cross-process
/// ordering.
pub trait ProcessGroup: Send + Sync {
    /// This process's rank within the group, 0-based.
    fn rank(&self) -> usize;

    /// Number of processes in the group.
    fn size(&self) -> usize;

    /// Gather one `f64` from every process; every process receives the
    /// full vector, indexed by rank.
    fn all_gather(&self, value: f64) -> Result<Vec<f64>, CommError>;

    /// Gather one `u64` from every process.
    fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>, CommError>;

    /// Sum a `u64` across the group; every process receives the total.
    fn reduce_sum_u64(&self, value: u64) -> Result<u64, CommError>;

    /// Terminate the whole job. Does not return.
    fn abort(&self, code: i32) -> !;
}

/// The degenerate single-process group.
#[derive(Debug, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_gather(&self, value: f64) -> Result<Vec<f64>, CommError> {
        Ok(vec![value])
    }

    fn all_gather_u64(&self, value: u64) -> Result<Vec<u64>, CommError> {
        Ok(vec![value])
    }

    fn reduce_sum_u64(&self, value: u64) -> Result<u64, CommError> {
        Ok(value)
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_process_collectives_are_local_copies() {
        let group = SingleProcess;
        assert_eq!(group.rank(), 0);
        assert_eq!(group.size(), 1);
        assert_eq!(group.all_gather(2.5).unwrap(), vec![2.5]);
        assert_eq!(group.all_gather_u64(7).unwrap(), vec![7]);
        assert_eq!(group.reduce_sum_u64(41).unwrap(), 41);
    }
}
