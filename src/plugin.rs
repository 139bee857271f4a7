//! Plugin contract and the per-session plugin registry.
//!
//! A plugin is a named cluster add-on with declared dependencies on other
//! plugins. The registry is built once per session from whatever plugin set
//! the caller supplies and is then handed by reference to the dependency
//! graph; nothing here is global.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::graph::GraphError;
use crate::readiness::{PluginStatus, ReadinessError, WorkloadProbe};
use crate::values::ValueTree;

/// Where a plugin's chart comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    /// Chart repository URL
    pub repository: String,
    /// Chart name inside the repository
    pub chart: String,
    /// Pinned chart version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ChartRef {
    pub fn new(repository: impl Into<String>, chart: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            chart: chart.into(),
            version: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Materialized install options handed to an installer.
///
/// The orchestration core never looks inside; only the concrete drivers do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginOptions {
    /// Target namespace for the plugin's workloads
    pub namespace: String,
    /// Release / application name
    pub release: String,
    pub chart: ChartRef,
    /// Chart values
    #[serde(default)]
    pub values: ValueTree,
}

/// Capability every installable plugin provides
#[async_trait]
pub trait Plugin: Send + Sync + fmt::Debug {
    /// Stable, unique name
    fn name(&self) -> &str;

    /// Names of plugins this one needs installed first. May name plugins
    /// that have not been registered.
    fn dependencies(&self) -> &[String];

    /// Namespace the plugin deploys into
    fn namespace(&self) -> &str;

    /// Build the option bag for an install or uninstall call
    fn options(&self) -> PluginOptions;

    /// Names of workloads that must exist before the plugin counts as ready.
    /// Empty means "whatever is in the namespace".
    fn expected_workloads(&self) -> &[String] {
        &[]
    }

    /// Current readiness of the plugin's workloads
    async fn status(&self, probe: &dyn WorkloadProbe) -> Result<PluginStatus, ReadinessError> {
        let workloads = probe.workloads(self.namespace()).await?;
        Ok(PluginStatus::evaluate(&workloads, self.expected_workloads()))
    }

    /// Whether any of the plugin's workloads exist, ready or not.
    ///
    /// With expected workloads, only those names count, so plugins sharing
    /// a namespace do not see each other.
    async fn is_deployed(&self, probe: &dyn WorkloadProbe) -> Result<bool, ReadinessError> {
        let workloads = probe.workloads(self.namespace()).await?;
        let expected = self.expected_workloads();
        Ok(if expected.is_empty() {
            !workloads.is_empty()
        } else {
            workloads.iter().any(|w| expected.contains(&w.name))
        })
    }
}

/// Declarative plugin definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub namespace: String,
    pub chart: ChartRef,
    /// Release name override; defaults to the plugin name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default)]
    pub values: ValueTree,
    #[serde(default)]
    pub expected_workloads: Vec<String>,
}

impl PluginDescriptor {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, chart: ChartRef) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            namespace: namespace.into(),
            chart,
            release: None,
            values: ValueTree::new(),
            expected_workloads: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_values(mut self, values: ValueTree) -> Self {
        self.values = values;
        self
    }

    /// Merge `overrides` over the current values; nested maps keep their
    /// other keys
    pub fn with_overrides(mut self, overrides: &ValueTree) -> Self {
        self.values = self.values.merged(overrides);
        self
    }

    pub fn with_release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn expecting<I, S>(mut self, workloads: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_workloads = workloads.into_iter().map(Into::into).collect();
        self
    }
}

#[async_trait]
impl Plugin for PluginDescriptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn options(&self) -> PluginOptions {
        PluginOptions {
            namespace: self.namespace.clone(),
            release: self.release.clone().unwrap_or_else(|| self.name.clone()),
            chart: self.chart.clone(),
            values: self.values.clone(),
        }
    }

    fn expected_workloads(&self) -> &[String] {
        &self.expected_workloads
    }
}

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("static plugin name pattern")
});

/// Check a plugin name is a DNS-1123 label. Names end up as Kubernetes
/// object names and ConfigMap keys.
pub fn validate_name(name: &str) -> Result<(), GraphError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(GraphError::InvalidName(name.to_string()))
    }
}

/// Plugins available to one orchestration session
#[derive(Debug, Default, Clone)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn Plugin>>,
    index: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any earlier registration under the same name
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<(), GraphError> {
        validate_name(plugin.name())?;
        for dep in plugin.dependencies() {
            validate_name(dep)?;
        }
        match self.index.get(plugin.name()) {
            Some(&slot) => self.plugins[slot] = plugin,
            None => {
                self.index
                    .insert(plugin.name().to_string(), self.plugins.len());
                self.plugins.push(plugin);
            }
        }
        Ok(())
    }

    pub fn with(mut self, plugin: impl Plugin + 'static) -> Result<Self, GraphError> {
        self.register(Arc::new(plugin))?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.index.get(name).map(|&slot| &self.plugins[slot])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Plugins in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Plugin>> {
        self.plugins.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
