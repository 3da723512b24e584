//! Translation of a job request into a workload descriptor.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec as KubeJobSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};

use crate::JobId;

/// Distinguishes workloads of this service from other workloads in the same namespace.
pub const JOB_NAME_PREFIX: &str = "idp-";

/// Name of the container that executes the job command.
pub const CONTAINER_NAME: &str = "idp-job-runner";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "datajob";
const JOB_ID_LABEL: &str = "datajob.io/job-id";

/// Description of the work that should be executed for a single job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub job_id: JobId,
    /// Name of the workload in the backend.
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
}

/// Builds the workload descriptor of a job.
///
/// The result depends only on the arguments.
pub fn build_spec(job_id: &JobId, image: &str, command: &[String]) -> JobSpec {
    JobSpec {
        job_id: job_id.clone(),
        name: workload_name(job_id),
        image: image.to_string(),
        command: command.to_vec(),
    }
}

pub fn workload_name(job_id: &JobId) -> String {
    format!("{JOB_NAME_PREFIX}{}", job_id.as_str().to_lowercase())
}

/// Converts a job descriptor into a Kubernetes batch Job.
pub fn build_kube_job(spec: &JobSpec) -> Job {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(JOB_ID_LABEL.to_string(), spec.job_id.to_string());

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(spec.image.clone()),
        command: Some(spec.command.clone()),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            labels: Some(labels.clone()),
            ..Default::default()
        },
        spec: Some(KubeJobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    restart_policy: Some("Never".to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}
