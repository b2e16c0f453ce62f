//! Translation of a final job status into an execution status.

use std::collections::BTreeMap;

use db::models::{ExecutionStatus, JobStatus};

/// Maps the status of the last job of a run to the execution's status.
///
/// Known job statuses map one-to-one (`Pending` keeps the execution
/// `Started`, i.e. suspended). Custom codes consult `overrides` and fall
/// back to their sign: positive resolves, anything else fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusMap {
    overrides: BTreeMap<i16, ExecutionStatus>,
}

impl StatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map a custom job status code to a fixed execution status.
    pub fn with_override(mut self, code: i16, status: ExecutionStatus) -> Self {
        self.overrides.insert(code, status);
        self
    }

    pub fn execution_status(&self, status: JobStatus) -> ExecutionStatus {
        match status {
            JobStatus::Pending => ExecutionStatus::Started,
            JobStatus::Resolved => ExecutionStatus::Resolved,
            JobStatus::Failed => ExecutionStatus::Failed,
            JobStatus::Error => ExecutionStatus::Error,
            JobStatus::Aborted => ExecutionStatus::Aborted,
            JobStatus::Canceled => ExecutionStatus::Canceled,
            JobStatus::Rejected => ExecutionStatus::Rejected,
            JobStatus::Custom(code) => match self.overrides.get(&code) {
                Some(status) => *status,
                None if code > 0 => ExecutionStatus::Resolved,
                None => ExecutionStatus::Failed,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_statuses_map_directly() {
        let map = StatusMap::new();
        assert_eq!(map.execution_status(JobStatus::Pending), ExecutionStatus::Started);
        assert_eq!(map.execution_status(JobStatus::Error), ExecutionStatus::Error);
        assert_eq!(map.execution_status(JobStatus::Rejected), ExecutionStatus::Rejected);
    }

    #[test]
    fn custom_codes_fall_back_to_their_sign() {
        let map = StatusMap::new();
        assert_eq!(map.execution_status(JobStatus::Custom(4)), ExecutionStatus::Resolved);
        assert_eq!(map.execution_status(JobStatus::Custom(-17)), ExecutionStatus::Failed);
    }

    #[test]
    fn overrides_win_over_the_fallback() {
        let map = StatusMap::new().with_override(-17, ExecutionStatus::Aborted);
        assert_eq!(map.execution_status(JobStatus::Custom(-17)), ExecutionStatus::Aborted);
    }
}
