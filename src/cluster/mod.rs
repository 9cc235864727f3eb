//! Kubernetes execution adapter.
//!
//! The single path through which this service mutates the cluster. Both
//! mutations target the one compiled-in deployment; replica bounds are
//! validated before any outbound call, every call carries a deadline, and
//! nothing here retries. Failures surface to the worker, which records
//! them and moves on.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{DEPLOYMENT, KUBE_CALL_TIMEOUT, MAX_REPLICAS, MIN_REPLICAS, NAMESPACE};

/// Errors raised by cluster operations.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    #[error("replica count {requested} outside allowed range {MIN_REPLICAS}-{MAX_REPLICAS}")]
    ReplicasOutOfRange { requested: i64 },

    #[error("patch construction failed: {0}")]
    Patch(String),

    #[error("cluster call exceeded {}s deadline", .0.as_secs())]
    Timeout(Duration),
}

/// Read snapshot of the managed deployment. Fetched on demand, never
/// cached.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStatus {
    pub replicas: i32,
    pub ready_replicas: i32,
    pub pods: Vec<PodInfo>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
}

/// Validate a requested replica count against the hard bounds.
///
/// Runs before any outbound call so an out-of-range request can never
/// reach the API server.
pub fn validate_replicas(requested: i64) -> Result<i32, ClusterError> {
    if requested < i64::from(MIN_REPLICAS) || requested > i64::from(MAX_REPLICAS) {
        return Err(ClusterError::ReplicasOutOfRange { requested });
    }
    // Range check above keeps the value well inside i32.
    Ok(requested as i32)
}

/// Operations the worker and gate perform against the cluster.
///
/// The trait seam exists so the pipeline can be driven against a stub in
/// tests; the process wires in [`KubeAdapter`].
#[async_trait]
pub trait ClusterAdapter: Send + Sync {
    /// Set the deployment's replica count. Fails before any outbound call
    /// when `replicas` is out of bounds.
    async fn scale(&self, replicas: i64, execution_id: &str) -> Result<(), ClusterError>;

    /// Trigger a rolling restart by stamping the restart annotation on the
    /// pod template. No pod is deleted directly.
    async fn restart(&self, execution_id: &str) -> Result<(), ClusterError>;

    /// Fetch the deployment and its pods.
    async fn status(&self, execution_id: &str) -> Result<DeploymentStatus, ClusterError>;
}

/// Production adapter backed by the kube client.
#[derive(Clone)]
pub struct KubeAdapter {
    client: Client,
    call_timeout: Duration,
}

impl KubeAdapter {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            call_timeout: KUBE_CALL_TIMEOUT,
        }
    }

    /// Override the per-call deadline (default 15s).
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), NAMESPACE)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), NAMESPACE)
    }

    /// Race a cluster call against the per-call deadline. A timed-out call
    /// is abandoned, never retried.
    async fn bounded<T, F>(&self, call: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.call_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(ClusterError::Api(e)),
            Err(_) => Err(ClusterError::Timeout(self.call_timeout)),
        }
    }
}

#[async_trait]
impl ClusterAdapter for KubeAdapter {
    async fn scale(&self, replicas: i64, execution_id: &str) -> Result<(), ClusterError> {
        let replicas = validate_replicas(replicas)?;

        debug!(
            execution_id = %execution_id,
            deployment = DEPLOYMENT,
            replicas,
            "Patching replica count"
        );

        let patch: json_patch::Patch = serde_json::from_value(json!([
            { "op": "replace", "path": "/spec/replicas", "value": replicas }
        ]))
        .map_err(|e| ClusterError::Patch(e.to_string()))?;

        self.bounded(self.deployments().patch(
            DEPLOYMENT,
            &PatchParams::default(),
            &Patch::Json::<()>(patch),
        ))
        .await?;

        info!(
            execution_id = %execution_id,
            deployment = DEPLOYMENT,
            replicas,
            "Replica patch accepted"
        );
        Ok(())
    }

    async fn restart(&self, execution_id: &str) -> Result<(), ClusterError> {
        let restarted_at = Utc::now().to_rfc3339();

        debug!(
            execution_id = %execution_id,
            deployment = DEPLOYMENT,
            restarted_at = %restarted_at,
            "Stamping restart annotation"
        );

        let patch = json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": {
                            "kubectl.kubernetes.io/restartedAt": restarted_at
                        }
                    }
                }
            }
        });

        self.bounded(self.deployments().patch(
            DEPLOYMENT,
            &PatchParams::default(),
            &Patch::Strategic(&patch),
        ))
        .await?;

        info!(
            execution_id = %execution_id,
            deployment = DEPLOYMENT,
            "Rolling restart triggered"
        );
        Ok(())
    }

    async fn status(&self, execution_id: &str) -> Result<DeploymentStatus, ClusterError> {
        let deployment = self.bounded(self.deployments().get(DEPLOYMENT)).await?;

        let selector = format!("app={DEPLOYMENT}");
        let pod_list = self
            .bounded(self.pods().list(&ListParams::default().labels(&selector)))
            .await?;

        let pods = pod_list
            .items
            .iter()
            .map(|pod| PodInfo {
                name: pod.name_any(),
                start_time: pod
                    .status
                    .as_ref()
                    .and_then(|s| s.start_time.as_ref())
                    .map(|t| t.0),
            })
            .collect();

        let status = DeploymentStatus {
            replicas: deployment.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0),
            ready_replicas: deployment
                .status
                .as_ref()
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
            pods,
        };

        debug!(
            execution_id = %execution_id,
            replicas = status.replicas,
            ready = status.ready_replicas,
            pod_count = status.pods.len(),
            "Fetched deployment status"
        );
        Ok(status)
    }
}
