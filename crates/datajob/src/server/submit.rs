use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::server::backend::{WorkloadBackend, WorkloadStatus};
use crate::server::job::{FailureKind, JobFailure};
use crate::server::spec::JobSpec;

#[derive(clap::ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SubmitMode {
    /// Return as soon as the backend has accepted the job.
    #[default]
    Detached,
    /// Wait until the job has finished executing.
    Wait,
}

pub struct SubmissionClient {
    backend: Arc<dyn WorkloadBackend>,
    /// Maximum duration of a single backend submission.
    submit_timeout: Duration,
    /// How often to query the backend when waiting for a job to finish.
    poll_interval: Duration,
}

impl SubmissionClient {
    pub fn new(
        backend: Arc<dyn WorkloadBackend>,
        submit_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            backend,
            submit_timeout,
            poll_interval,
        }
    }

    pub fn backend(&self) -> &Arc<dyn WorkloadBackend> {
        &self.backend
    }

    /// Hands the workload over to the backend.
    ///
    /// Returns once the backend has admitted the workload, the backend has refused it, `cancel`
    /// was triggered or the submit timeout has elapsed. If the submission was interrupted, the
    /// workload could still have been created, so it is removed in the background.
    pub async fn submit(&self, spec: &JobSpec, cancel: &CancellationToken) -> Result<(), JobFailure> {
        let submission = tokio::time::timeout(self.submit_timeout, self.backend.submit_workload(spec));
        let failure = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                JobFailure::cancelled("Submission was cancelled by the caller")
            }
            result = submission => match result {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(error)) => return Err(JobFailure::rejected(format!("{error:#}"))),
                Err(_) => JobFailure::cancelled(format!(
                    "Submission did not finish in {}",
                    humantime::format_duration(self.submit_timeout)
                )),
            }
        };
        self.remove_in_background(&spec.name);
        Err(failure)
    }

    /// Polls the backend until the workload finishes.
    ///
    /// `run_timeout` bounds the whole wait, `cancel` can interrupt it at any point.
    pub async fn wait_for_completion(
        &self,
        spec: &JobSpec,
        cancel: &CancellationToken,
        run_timeout: Option<Duration>,
    ) -> Result<(), JobFailure> {
        let wait = self.poll_until_terminal(&spec.name);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(JobFailure::cancelled("Waiting for the job was cancelled by the caller"))
            }
            result = async {
                match run_timeout {
                    Some(duration) => tokio::time::timeout(duration, wait).await.unwrap_or_else(|_| {
                        Err(JobFailure::cancelled(format!(
                            "Job did not finish in {}",
                            humantime::format_duration(duration)
                        )))
                    }),
                    None => wait.await,
                }
            } => result,
        };
        if matches!(&result, Err(failure) if failure.kind == FailureKind::Cancelled) {
            self.remove_in_background(&spec.name);
        }
        result
    }

    async fn poll_until_terminal(&self, name: &str) -> Result<(), JobFailure> {
        let names = vec![name.to_string()];
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            interval.tick().await;
            let mut statuses = self
                .backend
                .get_status_of_workloads(&names)
                .await
                .map_err(|error| JobFailure::execution(format!("{error:#}")))?;
            match statuses.remove(name) {
                Some(Ok(WorkloadStatus::Succeeded)) => return Ok(()),
                Some(Ok(WorkloadStatus::Failed { message })) => {
                    return Err(JobFailure::execution(message));
                }
                Some(Ok(WorkloadStatus::Pending | WorkloadStatus::Running)) => {}
                Some(Err(error)) => return Err(JobFailure::execution(format!("{error:#}"))),
                None => {
                    return Err(JobFailure::execution(format!(
                        "Workload {name} disappeared from the backend"
                    )));
                }
            }
        }
    }

    fn remove_in_background(&self, name: &str) {
        let removal = self.backend.remove_workload(name);
        let name = name.to_string();
        tokio::spawn(async move {
            if let Err(error) = removal.await {
                log::warn!("Could not remove workload {name} after interrupted submission: {error:?}");
            }
        });
    }
}
