use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::Map;
use crate::server::backend::{BackendFuture, WorkloadBackend, WorkloadStatus, WorkloadStatusMap};
use crate::server::spec::JobSpec;

/// How long the outcome of a finished process stays observable.
const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

enum LocalWorkload {
    Running(Child),
    Finished {
        status: WorkloadStatus,
        finished_at: Instant,
    },
}

/// Runs the command of each job as a child process of the server.
/// The container image is ignored.
pub struct LocalBackend {
    workloads: Arc<Mutex<Map<String, LocalWorkload>>>,
    retention: Duration,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::with_retention(DEFAULT_RETENTION)
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Finished workloads are forgotten once they have been observed and `retention` has elapsed.
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            workloads: Default::default(),
            retention,
        }
    }
}

fn exit_status_to_workload_status(status: ExitStatus) -> WorkloadStatus {
    if status.success() {
        WorkloadStatus::Succeeded
    } else {
        let message = match status.code() {
            Some(code) => format!("Process exited with code {code}"),
            None => "Process was terminated by a signal".to_string(),
        };
        WorkloadStatus::Failed { message }
    }
}

impl WorkloadBackend for LocalBackend {
    fn submit_workload(&self, spec: &JobSpec) -> BackendFuture<()> {
        let workloads = self.workloads.clone();
        let name = spec.name.clone();
        let command = spec.command.clone();

        Box::pin(async move {
            let (program, args) = command
                .split_first()
                .ok_or_else(|| anyhow::anyhow!("Job {name} has an empty command"))?;
            if workloads.lock().contains_key(&name) {
                anyhow::bail!("Workload {name} already exists");
            }

            log::debug!("Running local command `{}`", command.join(" "));
            let child = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .with_context(|| format!("Cannot start `{program}`"))?;
            workloads.lock().insert(name, LocalWorkload::Running(child));
            Ok(())
        })
    }

    fn get_status_of_workloads(&self, names: &[String]) -> BackendFuture<WorkloadStatusMap> {
        let workloads = self.workloads.clone();
        let names = names.to_vec();
        let retention = self.retention;

        Box::pin(async move {
            let mut workloads = workloads.lock();
            let now = Instant::now();
            let mut result = Map::with_capacity(names.len());
            for name in names {
                let Some(workload) = workloads.get_mut(&name) else {
                    continue;
                };
                let status = match workload {
                    LocalWorkload::Finished { status, .. } => Ok(status.clone()),
                    LocalWorkload::Running(child) => match child.try_wait() {
                        Ok(Some(exit_status)) => {
                            let status = exit_status_to_workload_status(exit_status);
                            *workload = LocalWorkload::Finished {
                                status: status.clone(),
                                finished_at: now,
                            };
                            Ok(status)
                        }
                        Ok(None) => Ok(WorkloadStatus::Running),
                        Err(error) => Err(anyhow::Error::new(error)
                            .context(format!("Cannot get status of process of {name}"))),
                    },
                };
                result.insert(name, status);
            }
            workloads.retain(|_, workload| match workload {
                LocalWorkload::Running(_) => true,
                LocalWorkload::Finished { finished_at, .. } => {
                    now.duration_since(*finished_at) < retention
                }
            });
            Ok(result)
        })
    }

    fn remove_workload(&self, name: &str) -> BackendFuture<()> {
        let workload = self.workloads.lock().remove(name);

        Box::pin(async move {
            if let Some(LocalWorkload::Running(mut child)) = workload {
                child.start_kill().context("Cannot kill process")?;
            }
            Ok(())
        })
    }
}
