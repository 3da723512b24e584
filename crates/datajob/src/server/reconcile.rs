//! Periodic reconciliation of running jobs with the state of their workloads.
//!
//! Submissions return as soon as the backend admits a workload. The reconcile process then
//! queries the backend in batches and moves running jobs into their terminal states.
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::common::rpc::{ResponseToken, RpcReceiver, RpcSender, initiate_request, make_rpc_queue};
use crate::server::backend::WorkloadStatus;
use crate::server::job::{JobRecord, JobStatus};
use crate::server::manager::JobManager;
use crate::{JobId, Map, Set};

#[derive(Debug)]
pub enum ReconcileMessage {
    // Events
    JobAccepted(JobId),
    // Requests
    /// Reconcile all running jobs now.
    Refresh(ResponseToken<ReconcileReport>),
    QuitService,
}

/// Outcome of a single reconciliation round.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub observed: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileConfig {
    /// How often are running jobs reconciled.
    pub interval: Duration,
    /// Delay of the extra round that follows the acceptance of a job.
    /// Jobs accepted within this delay share a single round.
    pub accepted_refresh_delay: Duration,
    /// How many consecutive status errors of a single job are tolerated before it is failed.
    pub max_status_errors: u32,
}

#[derive(Clone)]
pub struct ReconcileService {
    sender: RpcSender<ReconcileMessage>,
}

impl ReconcileService {
    pub fn on_job_accepted(&self, job_id: JobId) {
        self.send(ReconcileMessage::JobAccepted(job_id));
    }

    pub fn refresh(&self) -> impl Future<Output = ReconcileReport> + use<> {
        let fut = initiate_request(|token| self.sender.send(ReconcileMessage::Refresh(token)));
        async move { fut.await.unwrap_or_default() }
    }

    pub fn quit(&self) {
        self.send(ReconcileMessage::QuitService);
    }

    fn send(&self, msg: ReconcileMessage) {
        let _ = self.sender.send(msg);
    }
}

/// Creates the service handle and the receiving end of its queue.
///
/// The job manager needs the handle before it exists, so the process itself is started later
/// with [`reconcile_process`].
pub fn create_reconcile_service() -> (ReconcileService, RpcReceiver<ReconcileMessage>) {
    let (tx, rx) = make_rpc_queue();
    (ReconcileService { sender: tx }, rx)
}

#[derive(Default)]
struct ReconcileState {
    /// Number of consecutive failed status queries per job.
    status_errors: Map<JobId, u32>,
}

pub async fn reconcile_process(
    manager: Arc<JobManager>,
    config: ReconcileConfig,
    mut receiver: RpcReceiver<ReconcileMessage>,
) {
    let mut state = ReconcileState::default();
    let mut interval = tokio::time::interval(config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Extra round scheduled after a job was accepted
    let mut accepted_refresh: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                accepted_refresh = None;
                reconcile_running_jobs(&manager, &config, &mut state).await;
            }
            _ = tokio::time::sleep_until(accepted_refresh.unwrap_or_else(Instant::now)), if accepted_refresh.is_some() => {
                accepted_refresh = None;
                reconcile_running_jobs(&manager, &config, &mut state).await;
            }
            msg = receiver.recv() => match msg {
                None | Some(ReconcileMessage::QuitService) => break,
                Some(ReconcileMessage::JobAccepted(job_id)) => {
                    log::debug!("Job {job_id} was accepted, scheduling reconciliation");
                    accepted_refresh.get_or_insert_with(|| Instant::now() + config.accepted_refresh_delay);
                }
                Some(ReconcileMessage::Refresh(token)) => {
                    let report = reconcile_running_jobs(&manager, &config, &mut state).await;
                    token.respond(report);
                }
            }
        }
    }
    log::debug!("Ending job reconciliation");
}

async fn reconcile_running_jobs(
    manager: &JobManager,
    config: &ReconcileConfig,
    state: &mut ReconcileState,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let running: Vec<JobRecord> = manager
        .registry()
        .list_running()
        .into_iter()
        .filter(|record| !manager.is_awaited(&record.id))
        .collect();

    let running_ids: Set<&JobId> = running.iter().map(|record| &record.id).collect();
    state
        .status_errors
        .retain(|job_id, _| running_ids.contains(job_id));
    if running.is_empty() {
        return report;
    }

    let names: Vec<String> = running.iter().map(|record| record.name.clone()).collect();
    let mut statuses = match manager.backend().get_status_of_workloads(&names).await {
        Ok(statuses) => statuses,
        Err(error) => {
            log::warn!(
                "Could not query the status of {} running job(s): {error:?}",
                names.len()
            );
            return report;
        }
    };

    for record in &running {
        let observation = match statuses.remove(&record.name) {
            Some(Ok(status)) => {
                state.status_errors.remove(&record.id);
                Some(status)
            }
            Some(Err(error)) => {
                let count = state.status_errors.entry(record.id.clone()).or_default();
                *count += 1;
                log::warn!(
                    "Could not get the status of job {} (tenant {}), attempt {}/{}: {error:?}",
                    record.id,
                    record.tenant,
                    *count,
                    config.max_status_errors
                );
                if *count < config.max_status_errors {
                    continue;
                }
                state.status_errors.remove(&record.id);
                Some(WorkloadStatus::Failed {
                    message: format!("Status of the job could not be observed: {error:#}"),
                })
            }
            None => None,
        };

        // The job may have changed while the backend was queried
        let Some(current) = manager
            .registry()
            .get(&record.tenant, &record.id)
            .filter(|current| current.status == JobStatus::Running)
        else {
            continue;
        };
        report.observed += 1;

        if let Err(error) = manager.observe_workload(&current, observation.as_ref()) {
            log::error!("Could not reconcile job {}: {error}", record.id);
            continue;
        }
        match manager.registry().get(&record.tenant, &record.id) {
            Some(updated) if updated.status == JobStatus::Completed => report.completed += 1,
            Some(updated) if updated.status == JobStatus::Failed => report.failed += 1,
            _ => {}
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{
        ReconcileConfig, ReconcileReport, ReconcileService, create_reconcile_service,
        reconcile_process,
    };
    use crate::server::backend::WorkloadStatus;
    use crate::server::job::{FailureKind, JobStatus};
    use crate::server::manager::JobManager;
    use crate::server::submit::SubmitMode;
    use crate::common::error::DataJobError;
    use crate::tests::utils::{
        ScriptedBackend, ScriptedBackendConfigBuilder, build_manager,
        create_manager_with_reconciler, get_status, wait_for_running_job,
    };
    use crate::{JobId, TenantContext};

    fn start_with(
        backend: Arc<ScriptedBackend>,
        config: ReconcileConfig,
    ) -> (Arc<JobManager>, ReconcileService) {
        let (service, receiver) = create_reconcile_service();
        let manager = Arc::new(create_manager_with_reconciler(
            backend,
            SubmitMode::Detached,
            service.clone(),
        ));
        tokio::spawn(reconcile_process(manager.clone(), config, receiver));
        (manager, service)
    }

    fn start(max_status_errors: u32) -> (Arc<ScriptedBackend>, Arc<JobManager>, ReconcileService) {
        let backend = ScriptedBackend::new(ScriptedBackendConfigBuilder::default().build().unwrap());
        let (manager, service) = start_with(
            backend.clone(),
            ReconcileConfig {
                interval: Duration::from_secs(3600),
                accepted_refresh_delay: Duration::from_secs(3600),
                max_status_errors,
            },
        );
        (backend, manager, service)
    }

    #[tokio::test]
    async fn no_running_jobs() {
        let (backend, _manager, service) = start(3);
        assert_eq!(service.refresh().await, ReconcileReport::default());
        let queries = backend.status_queries();
        service.refresh().await;
        assert_eq!(backend.status_queries(), queries);
    }

    #[tokio::test]
    async fn running_jobs_reach_terminal_state() {
        let (backend, manager, service) = start(3);
        let acme = TenantContext::for_tenant("acme");
        let cancel = CancellationToken::new();
        let ok = manager.create_job(&acme, &cancel).await.unwrap();
        let failing = manager.create_job(&acme, &cancel).await.unwrap();
        let pending = manager.create_job(&acme, &cancel).await.unwrap();
        let name = |id: &JobId| format!("idp-{id}");

        backend.set_status(&name(&ok), WorkloadStatus::Succeeded);
        backend.set_status(
            &name(&failing),
            WorkloadStatus::Failed {
                message: "Error".to_string(),
            },
        );
        backend.set_status(&name(&pending), WorkloadStatus::Pending);

        let report = service.refresh().await;
        assert_eq!(
            report,
            ReconcileReport {
                observed: 3,
                completed: 1,
                failed: 1
            }
        );
        assert_eq!(get_status(&manager, &acme, &ok), JobStatus::Completed);
        assert_eq!(get_status(&manager, &acme, &failing), JobStatus::Failed);
        assert_eq!(get_status(&manager, &acme, &pending), JobStatus::Running);

        // Terminal jobs are not queried again
        let report = service.refresh().await;
        assert_eq!(report.observed, 1);
    }

    #[tokio::test]
    async fn disappeared_workload_fails_job() {
        let (backend, manager, service) = start(3);
        let acme = TenantContext::for_tenant("acme");
        let job_id = manager
            .create_job(&acme, &CancellationToken::new())
            .await
            .unwrap();
        backend.forget(&format!("idp-{job_id}"));

        service.refresh().await;
        let record = manager.read_jobs(&acme, Some(&job_id)).unwrap().remove(0);
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.failure.unwrap().kind, FailureKind::ExecutionFailed);
    }

    #[tokio::test]
    async fn status_errors_are_tolerated() {
        let (backend, manager, service) = start(2);
        let acme = TenantContext::for_tenant("acme");
        let job_id = manager
            .create_job(&acme, &CancellationToken::new())
            .await
            .unwrap();

        backend.set_fail_status(true);
        service.refresh().await;
        assert_eq!(get_status(&manager, &acme, &job_id), JobStatus::Running);

        // A successful query resets the error counter
        backend.set_fail_status(false);
        service.refresh().await;
        backend.set_fail_status(true);
        service.refresh().await;
        assert_eq!(get_status(&manager, &acme, &job_id), JobStatus::Running);

        service.refresh().await;
        assert_eq!(get_status(&manager, &acme, &job_id), JobStatus::Failed);
    }

    #[tokio::test]
    async fn accepted_job_is_reconciled_soon() {
        let backend = ScriptedBackend::new(
            ScriptedBackendConfigBuilder::default()
                .initial_status(WorkloadStatus::Succeeded)
                .build()
                .unwrap(),
        );
        let (manager, _service) = start_with(
            backend,
            ReconcileConfig {
                interval: Duration::from_secs(3600),
                accepted_refresh_delay: Duration::from_millis(10),
                max_status_errors: 3,
            },
        );
        let acme = TenantContext::for_tenant("acme");
        let job_id = manager
            .create_job(&acme, &CancellationToken::new())
            .await
            .unwrap();

        for _ in 0..100 {
            if get_status(&manager, &acme, &job_id) == JobStatus::Completed {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("Job was not reconciled");
    }

    #[tokio::test]
    async fn waited_job_is_left_to_its_creator() {
        let backend = ScriptedBackend::new(ScriptedBackendConfigBuilder::default().build().unwrap());
        let (service, receiver) = create_reconcile_service();
        let manager = Arc::new(build_manager(
            backend.clone(),
            SubmitMode::Wait,
            service.clone(),
            Duration::from_secs(30),
        ));
        tokio::spawn(reconcile_process(
            manager.clone(),
            ReconcileConfig {
                interval: Duration::from_secs(3600),
                accepted_refresh_delay: Duration::from_secs(3600),
                max_status_errors: 3,
            },
            receiver,
        ));

        let acme = TenantContext::for_tenant("acme");
        let cancel = CancellationToken::new();
        let task = {
            let manager = manager.clone();
            let acme = acme.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { manager.create_job(&acme, &cancel).await })
        };
        let job_id = wait_for_running_job(&manager, &acme).await;

        backend.set_status(&format!("idp-{job_id}"), WorkloadStatus::Succeeded);
        assert_eq!(service.refresh().await.observed, 0);
        assert_eq!(get_status(&manager, &acme, &job_id), JobStatus::Running);

        cancel.cancel();
        let error = task.await.unwrap().unwrap_err();
        assert!(matches!(error, DataJobError::Cancelled { .. }));
        let record = manager.read_jobs(&acme, Some(&job_id)).unwrap().remove(0);
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.failure.unwrap().kind, FailureKind::Cancelled);
    }

    #[tokio::test]
    async fn quit_stops_service() {
        let (_backend, _manager, service) = start(3);
        service.quit();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(service.refresh().await, ReconcileReport::default());
    }
}
