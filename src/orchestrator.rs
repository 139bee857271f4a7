//! Install and uninstall orchestration.
//!
//! One call handles one plugin: select the installer, run it, then record
//! (or forget) the installer kind. Batch drivers validate the whole plan
//! first and then walk it strictly in order, one plugin at a time.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::graph::{DependencyValidator, GraphError};
use crate::installer::{DriverError, InstallerKind};
use crate::plugin::{Plugin, PluginRegistry};
use crate::readiness::{
    wait_until_ready, Cancellation, PluginStatus, ReadinessError, ReadinessPolicy, WorkloadProbe,
};
use crate::selector::{InstallerSelector, SelectionError, SelectionSource};
use crate::tracker::TrackerError;

/// Errors from orchestrating plugin operations
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("Installer selection failed for '{plugin}': {source}")]
    Selection {
        plugin: String,
        #[source]
        source: SelectionError,
    },

    #[error("Install of '{plugin}' via {kind} failed: {source}")]
    InstallFailed {
        plugin: String,
        kind: InstallerKind,
        #[source]
        source: DriverError,
    },

    #[error("Uninstall of '{plugin}' via {kind} failed: {source}")]
    UninstallFailed {
        plugin: String,
        kind: InstallerKind,
        #[source]
        source: DriverError,
    },

    #[error("'{plugin}' installed but not ready after {waited:?}; pending: {}", pending.join(", "))]
    ReadinessTimeout {
        plugin: String,
        waited: Duration,
        pending: Vec<String>,
    },

    #[error("Readiness check for '{plugin}' failed: {source}")]
    Readiness {
        plugin: String,
        #[source]
        source: ReadinessError,
    },

    #[error("Operation on '{plugin}' cancelled")]
    Cancelled { plugin: String },

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Installer records unavailable: {0}")]
    Tracker(#[from] TrackerError),
}

impl OrchestratorError {
    /// The plugin the error is about, when it concerns a single plugin
    pub fn plugin(&self) -> Option<&str> {
        match self {
            OrchestratorError::Selection { plugin, .. }
            | OrchestratorError::InstallFailed { plugin, .. }
            | OrchestratorError::UninstallFailed { plugin, .. }
            | OrchestratorError::ReadinessTimeout { plugin, .. }
            | OrchestratorError::Readiness { plugin, .. }
            | OrchestratorError::Cancelled { plugin } => Some(plugin),
            OrchestratorError::UnknownPlugin(name) => Some(name),
            OrchestratorError::Graph(_) | OrchestratorError::Tracker(_) => None,
        }
    }
}

/// Result of a successful install or uninstall
#[derive(Debug, Clone)]
pub struct Outcome {
    pub plugin: String,
    pub kind: InstallerKind,
    pub source: SelectionSource,
    /// Whether the tracker write (or delete) went through
    pub recorded: bool,
    /// Final readiness, when a wait was requested
    pub status: Option<PluginStatus>,
}

/// Per-call batch behavior
#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    /// Wait for readiness after each install
    pub wait: bool,
    /// Continue with unaffected plugins after a failure
    pub keep_going: bool,
}

/// Per-plugin results of a batch
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Plugins in the validated plan, in execution order
    pub planned: Vec<String>,
    pub completed: Vec<Outcome>,
    pub failed: Vec<OrchestratorError>,
    /// Plugins not attempted because of an earlier failure or cancellation
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    fn failed_names(&self) -> impl Iterator<Item = &str> {
        self.failed.iter().filter_map(OrchestratorError::plugin)
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} planned, {} completed, {} failed, {} skipped",
            self.planned.len(),
            self.completed.len(),
            self.failed.len(),
            self.skipped.len()
        )
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Install,
    Uninstall,
}

/// Drives installs and uninstalls through a selector
#[derive(Clone)]
pub struct Orchestrator {
    selector: InstallerSelector,
    workloads: Option<Arc<dyn WorkloadProbe>>,
    readiness: ReadinessPolicy,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("selector", &self.selector)
            .field("readiness", &self.readiness)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn new(selector: InstallerSelector) -> Self {
        Self {
            selector,
            workloads: None,
            readiness: ReadinessPolicy::default(),
        }
    }

    pub fn with_workload_probe(mut self, probe: Arc<dyn WorkloadProbe>) -> Self {
        self.workloads = Some(probe);
        self
    }

    pub fn with_readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn selector(&self) -> &InstallerSelector {
        &self.selector
    }

    /// Plugins currently present in the cluster.
    ///
    /// Presence is read from live workloads. Installer records are only a
    /// fallback when no workload probe is configured, and records of an
    /// unknown kind never count.
    pub async fn installed_snapshot(
        &self,
        registry: &PluginRegistry,
    ) -> Result<HashSet<String>, OrchestratorError> {
        let Some(probe) = self.workloads.as_ref() else {
            warn!("No workload probe configured, using installer records as the installed set");
            let records = self.selector.tracker().list().await?;
            return Ok(records
                .into_iter()
                .filter(|(name, kind)| kind.is_known() && registry.contains(name))
                .map(|(name, _)| name)
                .collect());
        };

        let mut installed = HashSet::new();
        for plugin in registry.iter() {
            let deployed = plugin.is_deployed(probe.as_ref()).await.map_err(|source| {
                OrchestratorError::Readiness {
                    plugin: plugin.name().to_string(),
                    source,
                }
            })?;
            if deployed {
                installed.insert(plugin.name().to_string());
            }
        }
        debug!(installed = ?installed, "Installed snapshot");
        Ok(installed)
    }

    /// Install one plugin.
    ///
    /// A failed install leaves the tracker untouched. A successful install
    /// records the kind; a tracker failure at that point is logged only.
    pub async fn install(
        &self,
        plugin: &dyn Plugin,
        wait: bool,
        cancel: Cancellation,
    ) -> Result<Outcome, OrchestratorError> {
        let name = plugin.name().to_string();
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled { plugin: name });
        }

        let selection = self
            .selector
            .select(&name)
            .await
            .map_err(|source| OrchestratorError::Selection {
                plugin: name.clone(),
                source,
            })?;
        let kind = selection.kind();
        let options = plugin.options();

        if let Err(source) = selection.installer.install(&options).await {
            warn!(plugin = %name, kind = %kind, error = %source, "Install failed");
            return Err(OrchestratorError::InstallFailed {
                plugin: name,
                kind,
                source,
            });
        }
        info!(plugin = %name, kind = %kind, namespace = %options.namespace, "Installed");

        let recorded = match self.selector.tracker().set(&name, kind).await {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %name, kind = %kind, error = %e, "Could not record installer kind");
                false
            }
        };

        let status = if wait {
            self.wait_ready(plugin, cancel).await?
        } else {
            None
        };

        Ok(Outcome {
            plugin: name,
            kind,
            source: selection.source,
            recorded,
            status,
        })
    }

    async fn wait_ready(
        &self,
        plugin: &dyn Plugin,
        cancel: Cancellation,
    ) -> Result<Option<PluginStatus>, OrchestratorError> {
        let name = plugin.name().to_string();
        let Some(probe) = self.workloads.as_ref() else {
            warn!(plugin = %name, "No workload probe configured, skipping readiness wait");
            return Ok(None);
        };

        wait_until_ready(plugin, probe.as_ref(), self.readiness, cancel)
            .await
            .map(Some)
            .map_err(|e| match e {
                ReadinessError::Timeout { waited, pending } => OrchestratorError::ReadinessTimeout {
                    plugin: name.clone(),
                    waited,
                    pending,
                },
                ReadinessError::Cancelled => OrchestratorError::Cancelled {
                    plugin: name.clone(),
                },
                source => OrchestratorError::Readiness {
                    plugin: name.clone(),
                    source,
                },
            })
    }

    /// Uninstall one plugin with the installer it was installed with.
    ///
    /// The record is removed only after the uninstall succeeds.
    pub async fn uninstall(
        &self,
        plugin: &dyn Plugin,
        cancel: Cancellation,
    ) -> Result<Outcome, OrchestratorError> {
        let name = plugin.name().to_string();
        if cancel.is_cancelled() {
            return Err(OrchestratorError::Cancelled { plugin: name });
        }

        let selection = self
            .selector
            .select(&name)
            .await
            .map_err(|source| OrchestratorError::Selection {
                plugin: name.clone(),
                source,
            })?;
        let kind = selection.kind();
        if selection.source != SelectionSource::Recorded {
            warn!(plugin = %name, kind = %kind, "No installer record, uninstalling with the selected default");
        }

        if let Err(source) = selection.installer.uninstall(&plugin.options()).await {
            warn!(plugin = %name, kind = %kind, error = %source, "Uninstall failed");
            return Err(OrchestratorError::UninstallFailed {
                plugin: name,
                kind,
                source,
            });
        }
        info!(plugin = %name, kind = %kind, "Uninstalled");

        let recorded = match self.selector.tracker().delete(&name).await {
            Ok(()) => true,
            Err(e) => {
                warn!(plugin = %name, error = %e, "Could not remove installer record");
                false
            }
        };

        Ok(Outcome {
            plugin: name,
            kind,
            source: selection.source,
            recorded,
            status: None,
        })
    }

    /// Install `targets` and whatever they need that is not in `installed`.
    ///
    /// The plan is validated up front; a graph error aborts before anything
    /// runs. Without `keep_going` the first failure stops the batch. With
    /// it, only plugins depending on a failed one are skipped.
    pub async fn install_all<S: AsRef<str>>(
        &self,
        registry: &PluginRegistry,
        targets: &[S],
        installed: &HashSet<String>,
        options: BatchOptions,
        cancel: Cancellation,
    ) -> Result<BatchReport, OrchestratorError> {
        check_targets(registry, targets)?;
        let validator = DependencyValidator::from_registry(registry);
        let plan = validator.validate_installation(targets, installed)?;
        info!(plan = ?plan, "Install plan");

        self.run_batch(registry, &validator, plan, Direction::Install, options, cancel)
            .await
    }

    /// Uninstall `targets` and every installed plugin that depends on them.
    pub async fn uninstall_all<S: AsRef<str>>(
        &self,
        registry: &PluginRegistry,
        targets: &[S],
        installed: &HashSet<String>,
        options: BatchOptions,
        cancel: Cancellation,
    ) -> Result<BatchReport, OrchestratorError> {
        check_targets(registry, targets)?;
        let validator = DependencyValidator::from_registry(registry);
        let plan = validator.validate_uninstallation(targets, installed)?;
        info!(plan = ?plan, "Uninstall plan");

        self.run_batch(registry, &validator, plan, Direction::Uninstall, options, cancel)
            .await
    }

    async fn run_batch(
        &self,
        registry: &PluginRegistry,
        validator: &DependencyValidator,
        plan: Vec<String>,
        direction: Direction,
        options: BatchOptions,
        cancel: Cancellation,
    ) -> Result<BatchReport, OrchestratorError> {
        let mut report = BatchReport {
            planned: plan.clone(),
            ..BatchReport::default()
        };
        let mut stopped = false;

        for name in plan {
            if stopped || cancel.is_cancelled() {
                report.skipped.push(name);
                continue;
            }

            // Install needs its dependencies; uninstall needs its dependents gone
            let prerequisites = match direction {
                Direction::Install => validator.graph().dependencies(&name),
                Direction::Uninstall => validator.graph().dependents(&name),
            };
            let blocked = prerequisites.iter().any(|p| {
                report.skipped.contains(p) || report.failed_names().any(|f| f == p.as_str())
            });
            if blocked {
                warn!(plugin = %name, "Skipping, a prerequisite did not complete");
                report.skipped.push(name);
                continue;
            }

            let Some(plugin) = registry.get(&name) else {
                report.failed.push(OrchestratorError::UnknownPlugin(name));
                stopped = !options.keep_going;
                continue;
            };

            let result = match direction {
                Direction::Install => {
                    self.install(plugin.as_ref(), options.wait, cancel.clone())
                        .await
                }
                Direction::Uninstall => self.uninstall(plugin.as_ref(), cancel.clone()).await,
            };

            match result {
                Ok(outcome) => report.completed.push(outcome),
                Err(e) => {
                    if matches!(e, OrchestratorError::Cancelled { .. }) {
                        stopped = true;
                    } else {
                        stopped = !options.keep_going;
                    }
                    report.failed.push(e);
                }
            }
        }

        info!(report = %report, "Batch finished");
        Ok(report)
    }
}

fn check_targets<S: AsRef<str>>(
    registry: &PluginRegistry,
    targets: &[S],
) -> Result<(), OrchestratorError> {
    match targets.iter().find(|t| !registry.contains(t.as_ref())) {
        Some(missing) => Err(OrchestratorError::UnknownPlugin(missing.as_ref().to_string())),
        None => Ok(()),
    }
}
