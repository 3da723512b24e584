//! Backends that execute job workloads.
//!
//! The core only talks to the [`WorkloadBackend`] trait. [`kubernetes::KubeBackend`] runs workloads as
//! Kubernetes batch Jobs, [`local::LocalBackend`] runs the job command as a local process.
pub mod kubernetes;
pub mod local;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Map;
use crate::server::spec::JobSpec;

pub type BackendResult<T> = anyhow::Result<T>;
pub type BackendFuture<T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send>>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkloadStatus {
    /// Admitted, but not executing yet.
    Pending,
    Running,
    Succeeded,
    Failed { message: String },
}

impl WorkloadStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkloadStatus::Succeeded | WorkloadStatus::Failed { .. })
    }
}

/// Statuses of workloads, keyed by workload name.
/// A workload that does not exist in the backend has no entry.
pub type WorkloadStatusMap = Map<String, BackendResult<WorkloadStatus>>;

/// Handler that can communicate with some workload execution system.
pub trait WorkloadBackend: Send + Sync {
    /// Asks the backend to admit and start the workload described by `spec`.
    ///
    /// If the method returns Ok, the workload exists in the backend.
    fn submit_workload(&self, spec: &JobSpec) -> BackendFuture<()>;

    /// Get statuses of a set of existing workloads.
    /// This function takes multiple workloads at once to amortize the query cost.
    fn get_status_of_workloads(&self, names: &[String]) -> BackendFuture<WorkloadStatusMap>;

    /// Remove workload, if it still exists.
    fn remove_workload(&self, name: &str) -> BackendFuture<()>;
}

#[derive(clap::ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Run jobs as Kubernetes batch Jobs
    Kubernetes,
    /// Run jobs as processes on the local machine
    Local,
}

#[derive(Debug)]
pub struct BackendConfig {
    pub kind: BackendKind,
    pub namespace: String,
    pub kubeconfig: Option<PathBuf>,
}

/// Stands in for a backend that could not be initialized.
///
/// Submissions are refused with the initialization error, existing jobs can still be read.
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: String) -> Self {
        Self { reason }
    }
}

impl WorkloadBackend for UnavailableBackend {
    fn submit_workload(&self, _spec: &JobSpec) -> BackendFuture<()> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(anyhow::anyhow!("Backend is not available: {reason}")) })
    }

    fn get_status_of_workloads(&self, _names: &[String]) -> BackendFuture<WorkloadStatusMap> {
        let reason = self.reason.clone();
        Box::pin(async move { Err(anyhow::anyhow!("Backend is not available: {reason}")) })
    }

    fn remove_workload(&self, _name: &str) -> BackendFuture<()> {
        Box::pin(async move { Ok(()) })
    }
}

pub async fn create_backend(config: &BackendConfig) -> anyhow::Result<Arc<dyn WorkloadBackend>> {
    match config.kind {
        BackendKind::Kubernetes => {
            let backend =
                kubernetes::KubeBackend::connect(config.kubeconfig.as_deref(), &config.namespace).await?;
            Ok(Arc::new(backend))
        }
        BackendKind::Local => Ok(Arc::new(local::LocalBackend::new())),
    }
}
