use std::path::Path;

use anyhow::Context;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};

use crate::Map;
use crate::server::backend::{
    BackendFuture, WorkloadBackend, WorkloadStatus, WorkloadStatusMap,
};
use crate::server::spec::{JobSpec, build_kube_job};

/// Runs workloads as batch Jobs in a single namespace of a Kubernetes cluster.
pub struct KubeBackend {
    jobs: Api<Job>,
}

impl KubeBackend {
    /// Connects to the cluster.
    ///
    /// Without an explicit kubeconfig, the in-cluster configuration is tried first and the
    /// default kubeconfig (`$KUBECONFIG` or `~/.kube/config`) second.
    pub async fn connect(kubeconfig: Option<&Path>, namespace: &str) -> anyhow::Result<Self> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("Cannot read kubeconfig {}", path.display()))?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("Invalid kubeconfig")?
            }
            None => Config::infer()
                .await
                .context("Failed to create Kubernetes config")?,
        };
        log::info!(
            "Using Kubernetes cluster {} (namespace {namespace})",
            config.cluster_url
        );
        let client = Client::try_from(config).context("Cannot create Kubernetes client")?;
        Ok(Self {
            jobs: Api::namespaced(client, namespace),
        })
    }
}

impl WorkloadBackend for KubeBackend {
    fn submit_workload(&self, spec: &JobSpec) -> BackendFuture<()> {
        let jobs = self.jobs.clone();
        let job = build_kube_job(spec);
        let name = spec.name.clone();

        Box::pin(async move {
            log::debug!("Creating Kubernetes job {name}");
            jobs.create(&PostParams::default(), &job)
                .await
                .with_context(|| format!("Cannot create Kubernetes job {name}"))?;
            Ok(())
        })
    }

    fn get_status_of_workloads(&self, names: &[String]) -> BackendFuture<WorkloadStatusMap> {
        let jobs = self.jobs.clone();
        let names = names.to_vec();

        Box::pin(async move {
            let mut result = Map::with_capacity(names.len());
            for name in names {
                match jobs.get_opt(&name).await {
                    Ok(Some(job)) => {
                        result.insert(name, Ok(get_job_status(&job)));
                    }
                    Ok(None) => {
                        log::debug!("Kubernetes job {name} does not exist");
                    }
                    Err(error) => {
                        let error = anyhow::Error::new(error)
                            .context(format!("Cannot get status of Kubernetes job {name}"));
                        result.insert(name, Err(error));
                    }
                }
            }
            Ok(result)
        })
    }

    fn remove_workload(&self, name: &str) -> BackendFuture<()> {
        let jobs = self.jobs.clone();
        let name = name.to_string();

        Box::pin(async move {
            log::debug!("Deleting Kubernetes job {name}");
            match jobs.delete(&name, &DeleteParams::background()).await {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
                Err(error) => {
                    Err(anyhow::Error::new(error).context(format!("Cannot delete job {name}")))
                }
            }
        })
    }
}

fn has_condition(job: &Job, kind: &str) -> bool {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == kind && c.status == "True")
        })
        .unwrap_or(false)
}

fn failure_message(job: &Job) -> String {
    job.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.type_ == "Failed"))
        .and_then(|c| c.message.clone().or_else(|| c.reason.clone()))
        .unwrap_or_else(|| "Kubernetes job failed".to_string())
}

pub(crate) fn get_job_status(job: &Job) -> WorkloadStatus {
    if has_condition(job, "Complete") {
        WorkloadStatus::Succeeded
    } else if has_condition(job, "Failed") {
        WorkloadStatus::Failed {
            message: failure_message(job),
        }
    } else if job
        .status
        .as_ref()
        .and_then(|s| s.active)
        .is_some_and(|active| active > 0)
    {
        WorkloadStatus::Running
    } else {
        WorkloadStatus::Pending
    }
}
