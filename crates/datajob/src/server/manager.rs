use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::common::error::DataJobError;
use crate::server::backend::{WorkloadBackend, WorkloadStatus};
use crate::server::job::{JobFailure, JobRecord, JobStatus};
use crate::server::reconcile::ReconcileService;
use crate::server::registry::JobRegistry;
use crate::server::spec::build_spec;
use crate::server::submit::{SubmissionClient, SubmitMode};
use crate::{JobId, Set, TenantContext};

/// What is executed by every created job.
#[derive(Debug, Clone)]
pub struct JobTemplate {
    pub image: String,
    pub command: Vec<String>,
}

pub struct ManagerConfig {
    pub template: JobTemplate,
    pub mode: SubmitMode,
    /// Only used in [`SubmitMode::Wait`].
    pub run_timeout: Option<Duration>,
}

/// Creates jobs, drives their lifecycle and answers queries about them.
///
/// All changes of job records go through this type.
pub struct JobManager {
    registry: Arc<dyn JobRegistry>,
    submission: SubmissionClient,
    config: ManagerConfig,
    reconciler: ReconcileService,
    /// Running jobs whose outcome is observed by the request that created them.
    /// The reconciler leaves them alone.
    awaited: Mutex<Set<JobId>>,
}

/// Marks a job as awaited by its creator for as long as it lives.
struct AwaitedJob<'a> {
    awaited: &'a Mutex<Set<JobId>>,
    job_id: JobId,
}

impl<'a> AwaitedJob<'a> {
    fn new(awaited: &'a Mutex<Set<JobId>>, job_id: JobId) -> Self {
        awaited.lock().insert(job_id.clone());
        Self { awaited, job_id }
    }
}

impl Drop for AwaitedJob<'_> {
    fn drop(&mut self) {
        self.awaited.lock().remove(&self.job_id);
    }
}

impl JobManager {
    pub fn new(
        registry: Arc<dyn JobRegistry>,
        submission: SubmissionClient,
        config: ManagerConfig,
        reconciler: ReconcileService,
    ) -> Self {
        Self {
            registry,
            submission,
            config,
            reconciler,
            awaited: Default::default(),
        }
    }

    pub fn registry(&self) -> &Arc<dyn JobRegistry> {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn WorkloadBackend> {
        self.submission.backend()
    }

    /// Returns true if the outcome of the job is observed by the request that created it.
    pub fn is_awaited(&self, job_id: &JobId) -> bool {
        self.awaited.lock().contains(job_id)
    }

    /// Creates a new job of the tenant and submits it to the backend.
    ///
    /// The job is recorded as `Submitted` before the backend is contacted, so every attempt
    /// leaves a record behind. Errors carry the id of the created job.
    pub async fn create_job(
        &self,
        ctx: &TenantContext,
        cancel: &CancellationToken,
    ) -> crate::Result<JobId> {
        let tenant = ctx.tenant();
        let job_id = JobId::generate();
        let spec = build_spec(
            &job_id,
            &self.config.template.image,
            &self.config.template.command,
        );

        let record = JobRecord::new(job_id.clone(), tenant.clone(), spec.name.clone());
        self.store(record.clone())?;
        log::info!("Job {job_id} submitted with name {} (tenant {tenant})", spec.name);

        if let Err(failure) = self.submission.submit(&spec, cancel).await {
            return Err(self.fail_job(&record, failure));
        }

        // Must be registered before the job becomes visible as running
        let _awaited = (self.config.mode == SubmitMode::Wait)
            .then(|| AwaitedJob::new(&self.awaited, job_id.clone()));

        let record = record.with_status(JobStatus::Running, None);
        self.store(record.clone())?;
        log::info!("Job {job_id} accepted by the backend (tenant {tenant})");

        if self.config.mode == SubmitMode::Detached {
            self.reconciler.on_job_accepted(job_id.clone());
            return Ok(job_id);
        }

        match self
            .submission
            .wait_for_completion(&spec, cancel, self.config.run_timeout)
            .await
        {
            Ok(()) => {
                self.store(record.completed())?;
                log::info!("Job {job_id} run successfully (tenant {tenant})");
                Ok(job_id)
            }
            Err(failure) => Err(self.fail_job(&record, failure)),
        }
    }

    /// Returns jobs of the tenant.
    ///
    /// Without `job_id`, all jobs of the tenant are returned (possibly none). With `job_id`,
    /// exactly one job is returned, or [`DataJobError::NotFound`] if the tenant owns no such job.
    pub fn read_jobs(
        &self,
        ctx: &TenantContext,
        job_id: Option<&JobId>,
    ) -> crate::Result<Vec<JobRecord>> {
        let tenant = ctx.tenant();
        match job_id {
            None => {
                let records = self.registry.list(tenant);
                log::debug!("Listing {} job(s) of tenant {tenant}", records.len());
                Ok(records)
            }
            Some(job_id) => match self.registry.get(tenant, job_id) {
                Some(record) => Ok(vec![record]),
                None => {
                    log::info!("Job {job_id} not found (tenant {tenant})");
                    Err(DataJobError::NotFound(job_id.to_string()))
                }
            },
        }
    }

    /// Applies the state of a workload observed in the backend to the record of a running job.
    ///
    /// `None` means that the workload does not exist in the backend anymore.
    pub fn observe_workload(
        &self,
        record: &JobRecord,
        status: Option<&WorkloadStatus>,
    ) -> crate::Result<()> {
        match status {
            Some(WorkloadStatus::Pending | WorkloadStatus::Running) => Ok(()),
            Some(WorkloadStatus::Succeeded) => {
                self.store(record.completed())?;
                log::info!(
                    "Job {} run successfully (tenant {})",
                    record.id,
                    record.tenant
                );
                Ok(())
            }
            Some(WorkloadStatus::Failed { message }) => {
                self.record_failure(record, JobFailure::execution(message.clone()))?;
                Ok(())
            }
            None => {
                let failure = JobFailure::execution(format!(
                    "Workload {} disappeared from the backend",
                    record.name
                ));
                self.record_failure(record, failure)?;
                Ok(())
            }
        }
    }

    /// Records the failure of a job and returns the error that describes it.
    ///
    /// Fails if the failed record could not be stored.
    fn record_failure(
        &self,
        record: &JobRecord,
        failure: JobFailure,
    ) -> crate::Result<DataJobError> {
        log::error!(
            "Job {} failed with {:?}: {} (tenant {})",
            record.id,
            failure.kind,
            failure.message,
            record.tenant
        );
        let error = DataJobError::from_failure(&record.tenant, &record.id, &failure);
        self.store(record.failed(failure))?;
        Ok(error)
    }

    /// Like [`JobManager::record_failure`], but a store error replaces the failure.
    fn fail_job(&self, record: &JobRecord, failure: JobFailure) -> DataJobError {
        self.record_failure(record, failure)
            .unwrap_or_else(|store_error| store_error)
    }

    fn store(&self, record: JobRecord) -> crate::Result<()> {
        let (job_id, tenant) = (record.id.clone(), record.tenant.clone());
        self.registry.put(record).inspect_err(|error| {
            log::error!("Cannot store job {job_id} (tenant {tenant}): {error}");
        })
    }
}
