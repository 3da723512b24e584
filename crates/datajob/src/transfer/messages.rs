use serde::{Deserialize, Serialize};

use crate::JobId;
use crate::server::job::{FailureKind, JobRecord, JobStatus};

/// Job as reported to clients.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub name: String,
    pub id: JobId,
    pub status: JobStatus,
    /// Why the job has failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl From<&JobRecord> for JobSummary {
    fn from(record: &JobRecord) -> Self {
        Self {
            name: record.name.clone(),
            id: record.id.clone(),
            status: record.status,
            reason: record.failure.as_ref().map(|failure| failure.message.clone()),
            failure: record.failure.as_ref().map(|failure| failure.kind),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Code")]
    pub code: u16,
}
