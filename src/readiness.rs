//! Readiness convergence.
//!
//! After an install, poll the plugin's namespace on a fixed interval until
//! every workload reports fully available, or until an overall deadline
//! passes. The loop runs inside the caller's task and stops promptly on
//! success, timeout or cancellation; nothing is left running in the
//! background.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::{pending, Future};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::ReadinessConfig;
use crate::kube::{KubeClient, KubeError};
use crate::plugin::Plugin;

/// Errors from readiness checks
#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("Workload probe failed: {0}")]
    Probe(#[from] KubeError),

    #[error("Not ready after {waited:?}; pending: {}", pending.join(", "))]
    Timeout {
        waited: Duration,
        pending: Vec<String>,
    },

    #[error("Readiness wait cancelled")]
    Cancelled,
}

/// Kind of workload controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
    DaemonSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => write!(f, "deployment"),
            WorkloadKind::StatefulSet => write!(f, "statefulset"),
            WorkloadKind::DaemonSet => write!(f, "daemonset"),
        }
    }
}

/// Availability of one workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub kind: WorkloadKind,
    pub name: String,
    pub desired: u32,
    pub available: u32,
    /// The controller has reported status for the current generation
    pub observed: bool,
}

impl WorkloadStatus {
    pub fn is_available(&self) -> bool {
        self.observed && self.available >= self.desired
    }

    fn label(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }
}

/// Aggregated readiness of a plugin's workloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginStatus {
    pub ready: bool,
    pub available: usize,
    pub total: usize,
    /// Workloads not yet available, and expected workloads not yet present
    pub pending: Vec<String>,
}

impl PluginStatus {
    /// Ready means at least one workload exists, every expected workload is
    /// present, and all of them are fully available.
    pub fn evaluate(workloads: &[WorkloadStatus], expected: &[String]) -> Self {
        let mut pending: Vec<String> = workloads
            .iter()
            .filter(|w| !w.is_available())
            .map(WorkloadStatus::label)
            .collect();

        for name in expected {
            if !workloads.iter().any(|w| &w.name == name) {
                pending.push(format!("{} (missing)", name));
            }
        }

        let available = workloads.iter().filter(|w| w.is_available()).count();
        Self {
            ready: !workloads.is_empty() && pending.is_empty(),
            available,
            total: workloads.len(),
            pending,
        }
    }
}

/// Lists the workloads in a namespace
#[async_trait]
pub trait WorkloadProbe: Send + Sync {
    async fn workloads(&self, namespace: &str) -> Result<Vec<WorkloadStatus>, ReadinessError>;
}

/// Workload probe backed by the Kubernetes apps/v1 API
#[derive(Debug, Clone)]
pub struct KubeWorkloadProbe {
    client: KubeClient,
}

impl KubeWorkloadProbe {
    pub fn new(client: KubeClient) -> Self {
        Self { client }
    }
}

fn count(value: &Value) -> u32 {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

/// `spec.replicas`, which the API server defaults to 1
fn replicas(object: &Value) -> u32 {
    object["spec"]["replicas"]
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1)
}

/// Whether `status` describes the object's latest `metadata.generation`.
///
/// Freshly created objects carry no `observedGeneration` until their
/// controller first reconciles them; after an upgrade it lags behind.
fn is_observed(kind: WorkloadKind, object: &Value) -> bool {
    let status = &object["status"];
    let generation = object["metadata"]["generation"].as_i64().unwrap_or(0);
    let settled = status["observedGeneration"]
        .as_i64()
        .is_some_and(|observed| observed >= generation);
    match kind {
        WorkloadKind::DaemonSet => settled && status.get("desiredNumberScheduled").is_some(),
        _ => settled,
    }
}

/// Extract availability from an apps/v1 object
pub fn workload_status(kind: WorkloadKind, object: &Value) -> WorkloadStatus {
    let name = object["metadata"]["name"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let observed = is_observed(kind, object);
    let status = &object["status"];
    let (desired, available) = match kind {
        WorkloadKind::Deployment => (replicas(object), count(&status["availableReplicas"])),
        WorkloadKind::StatefulSet => (replicas(object), count(&status["readyReplicas"])),
        WorkloadKind::DaemonSet => (
            count(&status["desiredNumberScheduled"]),
            count(&status["numberAvailable"]),
        ),
    };
    WorkloadStatus {
        kind,
        name,
        desired,
        available,
        observed,
    }
}

#[async_trait]
impl WorkloadProbe for KubeWorkloadProbe {
    async fn workloads(&self, namespace: &str) -> Result<Vec<WorkloadStatus>, ReadinessError> {
        let mut statuses = Vec::new();
        for (kind, resource) in [
            (WorkloadKind::Deployment, "deployments"),
            (WorkloadKind::StatefulSet, "statefulsets"),
            (WorkloadKind::DaemonSet, "daemonsets"),
        ] {
            let path = format!("/apis/apps/v1/namespaces/{}/{}", namespace, resource);
            for object in self.client.list(&path, None).await? {
                statuses.push(workload_status(kind, &object));
            }
        }
        Ok(statuses)
    }
}

/// Floor for the poll interval; `tokio::time::interval` rejects zero
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll interval and overall deadline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self::from(&ReadinessConfig::default())
    }
}

impl From<&ReadinessConfig> for ReadinessPolicy {
    fn from(config: &ReadinessConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs.max(1)),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// External cancellation signal for long waits.
///
/// Wraps the receiving side of a `watch` channel; sending `true` cancels.
/// A dropped sender means "never cancelled".
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires
    pub fn never() -> Self {
        Self::default()
    }

    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx: Some(rx) }
    }

    /// Create a sender and its paired signal
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self::new(rx))
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&mut self) {
        match self.rx.as_mut() {
            Some(rx) => {
                if rx.wait_for(|cancel| *cancel).await.is_err() {
                    pending::<()>().await;
                }
            }
            None => pending::<()>().await,
        }
    }
}

/// Keeps a signal listener alive; aborts it when dropped
#[derive(Debug)]
pub struct SignalGuard {
    listener: JoinHandle<()>,
}

impl SignalGuard {
    pub fn is_finished(&self) -> bool {
        self.listener.is_finished()
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl Cancellation {
    /// Cancel once `signal` resolves.
    ///
    /// The listener task lives only as long as the returned guard.
    pub fn on_signal<F>(signal: F) -> (Self, SignalGuard)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (tx, cancel) = Self::channel();
        let listener = tokio::spawn(async move {
            signal.await;
            let _ = tx.send(true);
        });
        (cancel, SignalGuard { listener })
    }
}

/// Wait until `plugin` reports ready.
///
/// Probes immediately, then once per `policy.interval` (floored at 100ms).
/// A probe error is treated as "not ready yet" and logged. Returns the final status on
/// success.
pub async fn wait_until_ready(
    plugin: &dyn Plugin,
    probe: &dyn WorkloadProbe,
    policy: ReadinessPolicy,
    mut cancel: Cancellation,
) -> Result<PluginStatus, ReadinessError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut ticker = interval(policy.interval.max(MIN_POLL_INTERVAL));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut pending_workloads: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = sleep_until(deadline) => {
                return Err(ReadinessError::Timeout { waited: started.elapsed(), pending: pending_workloads });
            }
            _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
        }

        let outcome = tokio::select! {
            status = plugin.status(probe) => status,
            _ = sleep_until(deadline) => {
                return Err(ReadinessError::Timeout { waited: started.elapsed(), pending: pending_workloads });
            }
            _ = cancel.cancelled() => return Err(ReadinessError::Cancelled),
        };

        match outcome {
            Ok(status) if status.ready => {
                info!(plugin = %plugin.name(), workloads = status.total, elapsed = ?started.elapsed(), "Plugin ready");
                return Ok(status);
            }
            Ok(status) => {
                debug!(
                    plugin = %plugin.name(),
                    available = status.available,
                    total = status.total,
                    pending = ?status.pending,
                    "Waiting for workloads"
                );
                pending_workloads = if status.total == 0 && status.pending.is_empty() {
                    vec!["no workloads yet".to_string()]
                } else {
                    status.pending
                };
            }
            Err(e) => {
                debug!(plugin = %plugin.name(), error = %e, "Readiness probe failed, will retry");
            }
        }
    }
}
