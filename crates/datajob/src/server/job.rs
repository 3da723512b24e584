use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobId, TenantName};

/// Lifecycle state of a job.
///
/// `Submitted -> Running -> {Completed | Failed}`; `Submitted` may also fail directly.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Submitted,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    fn rank(self) -> u8 {
        match self {
            JobStatus::Submitted => 0,
            JobStatus::Running => 1,
            JobStatus::Completed | JobStatus::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Returns true if a record in state `self` may be overwritten by a record in state `next`.
    /// Re-putting the same state is allowed.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        self == next || (!self.is_terminal() && next.rank() > self.rank())
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            JobStatus::Submitted => "Submitted",
            JobStatus::Running => "Running",
            JobStatus::Completed => "Completed",
            JobStatus::Failed => "Failed",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The backend refused to admit the workload.
    SubmissionRejected,
    /// The workload was admitted, but it failed or could not be observed to completion.
    ExecutionFailed,
    /// The submission was abandoned by the caller or ran out of time.
    Cancelled,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::SubmissionRejected, message)
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ExecutionFailed, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Cancelled, message)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub status: JobStatus,
    pub date: DateTime<Utc>,
}

/// Tracked state of a single job.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobRecord {
    pub id: JobId,
    pub tenant: TenantName,
    /// Name of the workload in the backend.
    pub name: String,
    pub status: JobStatus,
    /// Set when the job has failed.
    pub failure: Option<JobFailure>,
    pub history: Vec<StatusChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, tenant: TenantName, name: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            tenant,
            name,
            status: JobStatus::Submitted,
            failure: None,
            history: vec![StatusChange {
                status: JobStatus::Submitted,
                date: now,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns a copy of the record moved into `status`.
    ///
    /// The transition is not validated here, this is done by the registry when the record is
    /// stored.
    pub fn with_status(&self, status: JobStatus, failure: Option<JobFailure>) -> Self {
        let now = Utc::now();
        let mut record = self.clone();
        if record.status != status {
            record.history.push(StatusChange { status, date: now });
        }
        record.status = status;
        record.failure = failure;
        record.updated_at = now;
        record
    }

    pub fn completed(&self) -> Self {
        self.with_status(JobStatus::Completed, None)
    }

    pub fn failed(&self, failure: JobFailure) -> Self {
        self.with_status(JobStatus::Failed, Some(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::{JobFailure, JobRecord, JobStatus};
    use crate::{JobId, TenantName};

    #[test]
    fn forward_transitions() {
        use JobStatus::*;
        assert!(Submitted.can_transition_to(Running));
        assert!(Submitted.can_transition_to(Failed));
        assert!(Running.can_transition_to(Completed));
        assert!(Running.can_transition_to(Failed));
        assert!(Running.can_transition_to(Running));
        assert!(Failed.can_transition_to(Failed));
    }

    #[test]
    fn backward_transitions() {
        use JobStatus::*;
        assert!(!Running.can_transition_to(Submitted));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Submitted));
        assert!(!Failed.can_transition_to(Running));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn record_history() {
        let record = JobRecord::new(
            JobId::generate(),
            TenantName::new("acme").unwrap(),
            "idp-x".to_string(),
        );
        let record = record
            .with_status(JobStatus::Running, None)
            .with_status(JobStatus::Running, None)
            .failed(JobFailure::execution("exit code 1"));

        let states: Vec<_> = record.history.iter().map(|c| c.status).collect();
        assert_eq!(
            states,
            vec![JobStatus::Submitted, JobStatus::Running, JobStatus::Failed]
        );
        assert_eq!(record.failure.unwrap().message, "exit code 1");
        assert!(record.updated_at >= record.created_at);
    }
}
