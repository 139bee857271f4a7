//! Installer selection.
//!
//! Precedence for each plugin:
//! 1. A recorded kind from the tracker always wins
//! 2. Otherwise a ready GitOps controller selects the GitOps installer
//! 3. Otherwise the package-manager installer
//!
//! A plugin already tied to a mechanism never silently switches, even when
//! the live environment would now suggest the other one.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::GitOpsConfig;
use crate::installer::{BuildError, Installer, InstallerFactory, InstallerKind};
use crate::kube::{KubeClient, KubeError};
use crate::tracker::{InstallerTracker, TrackerError};

/// Installer selection failed
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Cannot read installer record for '{plugin}': {source}")]
    Tracker {
        plugin: String,
        #[source]
        source: TrackerError,
    },
}

/// Live check for the GitOps controller. Any detection failure is "not ready".
#[async_trait]
pub trait ControllerProbe: Send + Sync {
    async fn is_ready(&self, limit: Duration) -> bool;
}

/// Probe backed by the Kubernetes API: the controller namespace must exist
/// and at least one controller pod must be running with every container ready.
#[derive(Debug, Clone)]
pub struct GitOpsControllerProbe {
    client: KubeClient,
    namespace: String,
    selector: String,
}

impl GitOpsControllerProbe {
    pub fn new(client: KubeClient, config: &GitOpsConfig) -> Self {
        Self {
            client,
            namespace: config.namespace.clone(),
            selector: config.controller_selector.clone(),
        }
    }

    async fn check(&self) -> Result<bool, KubeError> {
        let namespace_path = format!("/api/v1/namespaces/{}", self.namespace);
        if self.client.get(&namespace_path).await?.is_none() {
            debug!(namespace = %self.namespace, "GitOps namespace not found");
            return Ok(false);
        }

        let pods = self
            .client
            .list(
                &format!("/api/v1/namespaces/{}/pods", self.namespace),
                Some(&self.selector),
            )
            .await?;
        Ok(pods.iter().any(pod_is_ready))
    }
}

/// Running phase and every container reporting ready
pub fn pod_is_ready(pod: &Value) -> bool {
    if pod["status"]["phase"].as_str() != Some("Running") {
        return false;
    }
    match pod["status"]["containerStatuses"].as_array() {
        Some(statuses) if !statuses.is_empty() => statuses
            .iter()
            .all(|c| c["ready"].as_bool().unwrap_or(false)),
        _ => false,
    }
}

#[async_trait]
impl ControllerProbe for GitOpsControllerProbe {
    async fn is_ready(&self, limit: Duration) -> bool {
        match timeout(limit, self.check()).await {
            Ok(Ok(ready)) => ready,
            Ok(Err(e)) => {
                debug!(error = %e, "GitOps controller probe failed");
                false
            }
            Err(_) => {
                debug!(after = ?limit, "GitOps controller probe timed out");
                false
            }
        }
    }
}

/// How a selection was reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    /// Recorded kind from the tracker
    Recorded,
    /// GitOps controller detected as ready
    LiveProbe,
    /// Nothing recorded, no controller
    Default,
}

impl fmt::Display for SelectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionSource::Recorded => write!(f, "recorded"),
            SelectionSource::LiveProbe => write!(f, "live-probe"),
            SelectionSource::Default => write!(f, "default"),
        }
    }
}

/// Result of selecting an installer for one plugin
#[derive(Debug, Clone)]
pub struct Selection {
    pub installer: Installer,
    pub source: SelectionSource,
}

impl Selection {
    pub fn kind(&self) -> InstallerKind {
        self.installer.kind()
    }
}

/// Chooses the installer for a plugin
#[derive(Clone)]
pub struct InstallerSelector {
    tracker: InstallerTracker,
    probe: Arc<dyn ControllerProbe>,
    factory: Arc<dyn InstallerFactory>,
    probe_timeout: Duration,
}

impl fmt::Debug for InstallerSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallerSelector")
            .field("tracker", &self.tracker)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

impl InstallerSelector {
    pub fn new(
        tracker: InstallerTracker,
        probe: Arc<dyn ControllerProbe>,
        factory: Arc<dyn InstallerFactory>,
    ) -> Self {
        Self {
            tracker,
            probe,
            factory,
            probe_timeout: GitOpsConfig::default().probe_timeout(),
        }
    }

    pub fn with_probe_timeout(mut self, limit: Duration) -> Self {
        self.probe_timeout = limit;
        self
    }

    pub fn tracker(&self) -> &InstallerTracker {
        &self.tracker
    }

    /// Decide which kind `name` should use, without building the installer
    pub async fn choose_kind(
        &self,
        name: &str,
    ) -> Result<(InstallerKind, SelectionSource), SelectionError> {
        let recorded = self
            .tracker
            .get(name)
            .await
            .map_err(|source| SelectionError::Tracker {
                plugin: name.to_string(),
                source,
            })?;

        match recorded {
            Some(kind) if kind.is_known() => {
                debug!(plugin = %name, kind = %kind, "Using recorded installer kind");
                return Ok((kind, SelectionSource::Recorded));
            }
            Some(_) => {
                warn!(plugin = %name, "Ignoring unrecognized installer record");
            }
            None => {}
        }

        if self.probe.is_ready(self.probe_timeout).await {
            Ok((InstallerKind::GitOpsApplication, SelectionSource::LiveProbe))
        } else {
            Ok((InstallerKind::PackageManagerRelease, SelectionSource::Default))
        }
    }

    /// Select and construct the installer for `name`. Nothing is recorded here.
    pub async fn select(&self, name: &str) -> Result<Selection, SelectionError> {
        let (kind, source) = self.choose_kind(name).await?;
        let installer = self.factory.build(kind)?;
        info!(plugin = %name, kind = %kind, source = %source, "Selected installer");
        Ok(Selection { installer, source })
    }
}
