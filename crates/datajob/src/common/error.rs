use thiserror::Error;

use crate::server::job::{FailureKind, JobFailure, JobStatus};
use crate::{JobId, TenantName};

#[derive(Debug, Error)]
pub enum DataJobError {
    #[error("Error in building job {job_id} of tenant {tenant}: {message}")]
    SubmissionRejected {
        tenant: TenantName,
        job_id: JobId,
        message: String,
    },
    #[error("Error in running job {job_id} of tenant {tenant}: {message}")]
    ExecutionFailed {
        tenant: TenantName,
        job_id: JobId,
        message: String,
    },
    #[error("Job {job_id} of tenant {tenant} was cancelled: {message}")]
    Cancelled {
        tenant: TenantName,
        job_id: JobId,
        message: String,
    },
    #[error("Invalid status transition of job {job_id}: {from} -> {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
    #[error("Job {0} not found")]
    NotFound(String),
    #[error("Invalid tenant: {0}")]
    InvalidTenant(String),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Error: {0}")]
    GenericError(String),
}

impl DataJobError {
    /// Converts a failure recorded on a job into the error reported to the caller.
    pub fn from_failure(tenant: &TenantName, job_id: &JobId, failure: &JobFailure) -> Self {
        let tenant = tenant.clone();
        let job_id = job_id.clone();
        let message = failure.message.clone();
        match failure.kind {
            FailureKind::SubmissionRejected => Self::SubmissionRejected {
                tenant,
                job_id,
                message,
            },
            FailureKind::ExecutionFailed => Self::ExecutionFailed {
                tenant,
                job_id,
                message,
            },
            FailureKind::Cancelled => Self::Cancelled {
                tenant,
                job_id,
                message,
            },
        }
    }
}

impl From<anyhow::Error> for DataJobError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(format!("{error:#}"))
    }
}

impl From<toml::de::Error> for DataJobError {
    fn from(error: toml::de::Error) -> Self {
        Self::ConfigError(error.to_string())
    }
}
