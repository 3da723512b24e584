use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use derive_builder::Builder;
use parking_lot::Mutex;

use crate::server::backend::{BackendFuture, WorkloadBackend, WorkloadStatus, WorkloadStatusMap};
use crate::server::job::JobStatus;
use crate::server::manager::{JobManager, JobTemplate, ManagerConfig};
use crate::server::reconcile::{ReconcileService, create_reconcile_service};
use crate::server::registry::MemoryRegistry;
use crate::server::spec::JobSpec;
use crate::server::submit::{SubmissionClient, SubmitMode};
use crate::{JobId, Map, TenantContext};

pub fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Builder, Clone)]
pub struct ScriptedBackendConfig {
    /// Refuse every submission.
    #[builder(default)]
    reject_submit: bool,
    /// Delay every submission by this duration.
    #[builder(default)]
    submit_delay: Option<Duration>,
    /// Status of freshly submitted workloads.
    #[builder(default = "WorkloadStatus::Running")]
    initial_status: WorkloadStatus,
    /// Fail the status query of every workload.
    #[builder(default)]
    fail_status: bool,
}

#[derive(Default)]
struct ScriptedState {
    workloads: Map<String, WorkloadStatus>,
    submitted: Vec<String>,
    removed: Vec<String>,
    status_queries: usize,
}

/// Backend whose behavior is scripted by the test.
pub struct ScriptedBackend {
    config: Mutex<ScriptedBackendConfig>,
    state: Arc<Mutex<ScriptedState>>,
}

impl ScriptedBackend {
    pub fn new(config: ScriptedBackendConfig) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(config),
            state: Default::default(),
        })
    }

    pub fn submitted(&self) -> Vec<String> {
        self.state.lock().submitted.clone()
    }

    pub fn removed(&self) -> Vec<String> {
        self.state.lock().removed.clone()
    }

    pub fn status_queries(&self) -> usize {
        self.state.lock().status_queries
    }

    pub fn set_status(&self, name: &str, status: WorkloadStatus) {
        self.state.lock().workloads.insert(name.to_string(), status);
    }

    /// Makes the workload disappear from the backend.
    pub fn forget(&self, name: &str) {
        self.state.lock().workloads.remove(name);
    }

    pub fn set_fail_status(&self, fail: bool) {
        self.config.lock().fail_status = fail;
    }
}

impl WorkloadBackend for ScriptedBackend {
    fn submit_workload(&self, spec: &JobSpec) -> BackendFuture<()> {
        let config = self.config.lock().clone();
        let state = self.state.clone();
        let name = spec.name.clone();
        Box::pin(async move {
            if let Some(delay) = config.submit_delay {
                tokio::time::sleep(delay).await;
            }
            if config.reject_submit {
                return Err(anyhow!("Workload {name} was refused"));
            }
            let mut state = state.lock();
            state.workloads.insert(name.clone(), config.initial_status);
            state.submitted.push(name);
            Ok(())
        })
    }

    fn get_status_of_workloads(&self, names: &[String]) -> BackendFuture<WorkloadStatusMap> {
        let fail = self.config.lock().fail_status;
        let state = self.state.clone();
        let names = names.to_vec();
        Box::pin(async move {
            let mut state = state.lock();
            state.status_queries += 1;
            let mut result = WorkloadStatusMap::new();
            for name in names {
                if fail {
                    result.insert(name, Err(anyhow!("Status query failed")));
                } else if let Some(status) = state.workloads.get(&name) {
                    result.insert(name, Ok(status.clone()));
                }
            }
            Ok(result)
        })
    }

    fn remove_workload(&self, name: &str) -> BackendFuture<()> {
        let state = self.state.clone();
        let name = name.to_string();
        Box::pin(async move {
            let mut state = state.lock();
            state.workloads.remove(&name);
            state.removed.push(name);
            Ok(())
        })
    }
}

/// Creates a manager whose reconciler does not run.
pub fn create_manager(backend: Arc<dyn WorkloadBackend>, mode: SubmitMode) -> JobManager {
    let (reconciler, _) = create_reconcile_service();
    create_manager_with_reconciler(backend, mode, reconciler)
}

pub fn create_manager_with_reconciler(
    backend: Arc<dyn WorkloadBackend>,
    mode: SubmitMode,
    reconciler: ReconcileService,
) -> JobManager {
    build_manager(backend, mode, reconciler, Duration::from_millis(10))
}

pub fn build_manager(
    backend: Arc<dyn WorkloadBackend>,
    mode: SubmitMode,
    reconciler: ReconcileService,
    poll_interval: Duration,
) -> JobManager {
    init_test_logging();
    JobManager::new(
        Arc::new(MemoryRegistry::new()),
        SubmissionClient::new(backend, Duration::from_secs(5), poll_interval),
        ManagerConfig {
            template: JobTemplate {
                image: "nginx".to_string(),
                command: vec!["ls".to_string()],
            },
            mode,
            run_timeout: None,
        },
        reconciler,
    )
}

/// Waits until the only job of the tenant is running.
pub async fn wait_for_running_job(manager: &JobManager, ctx: &TenantContext) -> JobId {
    loop {
        let records = manager.read_jobs(ctx, None).unwrap();
        if let Some(record) = records.iter().find(|r| r.status == JobStatus::Running) {
            return record.id.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn get_status(manager: &JobManager, ctx: &TenantContext, job_id: &JobId) -> JobStatus {
    manager.read_jobs(ctx, Some(job_id)).unwrap()[0].status
}
