//! Installers - the delivery mechanisms that materialize a plugin.
//!
//! Two kinds exist:
//! - Package-manager release: `helm upgrade --install` straight into the cluster
//! - GitOps application: an Argo CD `Application` resource the controller syncs
//!
//! The set is closed. [`Installer`] is a sum type over the kinds, each
//! variant carrying the driver that does the actual work.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::config::{AppConfig, GitOpsConfig, HelmConfig, KubeConfig};
use crate::kube::{KubeClient, KubeError};
use crate::plugin::PluginOptions;

/// Delivery mechanism used for a plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallerKind {
    /// Declarative application synced by the GitOps controller
    GitOpsApplication,
    /// Direct package-manager release
    PackageManagerRelease,
    /// Record present but not understood
    Unknown,
}

impl InstallerKind {
    /// Tag stored in the tracking record
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallerKind::GitOpsApplication => "argocd",
            InstallerKind::PackageManagerRelease => "helm",
            InstallerKind::Unknown => "unknown",
        }
    }

    /// Parse a stored record. Anything unrecognized reads as `Unknown`.
    pub fn from_record(value: &str) -> Self {
        value.parse().unwrap_or(InstallerKind::Unknown)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, InstallerKind::Unknown)
    }
}

impl fmt::Display for InstallerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for InstallerKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "argocd" | "gitops" => Ok(Self::GitOpsApplication),
            "helm" => Ok(Self::PackageManagerRelease),
            _ => Err(format!(
                "Invalid installer kind '{}'. Must be: argocd, helm",
                s
            )),
        }
    }
}

/// Errors raised by a concrete driver
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with status {code}: {stderr}")]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("{program} timed out after {after:?}")]
    Timeout { program: String, after: Duration },

    #[error("Invalid install options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Kube(#[from] KubeError),
}

/// Capability implemented by each concrete delivery mechanism.
/// Options are passed through unexamined by the orchestration layer.
#[async_trait]
pub trait InstallDriver: Send + Sync {
    async fn install(&self, options: &PluginOptions) -> Result<(), DriverError>;
    async fn uninstall(&self, options: &PluginOptions) -> Result<(), DriverError>;
}

/// A constructed installer of a particular kind
#[derive(Clone)]
pub enum Installer {
    PackageManagerRelease(Arc<dyn InstallDriver>),
    GitOpsApplication(Arc<dyn InstallDriver>),
}

impl fmt::Debug for Installer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Installer({})", self.kind())
    }
}

impl Installer {
    pub fn kind(&self) -> InstallerKind {
        match self {
            Installer::PackageManagerRelease(_) => InstallerKind::PackageManagerRelease,
            Installer::GitOpsApplication(_) => InstallerKind::GitOpsApplication,
        }
    }

    fn driver(&self) -> &dyn InstallDriver {
        match self {
            Installer::PackageManagerRelease(driver) | Installer::GitOpsApplication(driver) => {
                driver.as_ref()
            }
        }
    }

    pub async fn install(&self, options: &PluginOptions) -> Result<(), DriverError> {
        debug!(kind = %self.kind(), release = %options.release, namespace = %options.namespace, "Installing");
        self.driver().install(options).await
    }

    pub async fn uninstall(&self, options: &PluginOptions) -> Result<(), DriverError> {
        debug!(kind = %self.kind(), release = %options.release, namespace = %options.namespace, "Uninstalling");
        self.driver().uninstall(options).await
    }
}

/// Could not construct an installer for the chosen kind
#[derive(Error, Debug)]
#[error("Cannot construct {kind} installer: {reason}")]
pub struct BuildError {
    pub kind: InstallerKind,
    pub reason: String,
}

/// Builds the concrete installer for a kind
pub trait InstallerFactory: Send + Sync {
    fn build(&self, kind: InstallerKind) -> Result<Installer, BuildError>;
}

/// Factory producing the real drivers from configuration
#[derive(Debug, Clone)]
pub struct DriverFactory {
    kube: KubeConfig,
    gitops: GitOpsConfig,
    helm: HelmConfig,
}

impl DriverFactory {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            kube: config.kube.clone(),
            gitops: config.gitops.clone(),
            helm: config.helm.clone(),
        }
    }
}

impl InstallerFactory for DriverFactory {
    fn build(&self, kind: InstallerKind) -> Result<Installer, BuildError> {
        match kind {
            InstallerKind::PackageManagerRelease => Ok(Installer::PackageManagerRelease(
                Arc::new(HelmCli::new(&self.helm)),
            )),
            InstallerKind::GitOpsApplication => {
                let client = ApplicationClient::new(&self.kube, &self.gitops).map_err(|e| {
                    BuildError {
                        kind,
                        reason: e.to_string(),
                    }
                })?;
                Ok(Installer::GitOpsApplication(Arc::new(client)))
            }
            InstallerKind::Unknown => Err(BuildError {
                kind,
                reason: "no installer exists for an unknown kind".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Package-manager release driver
// ---------------------------------------------------------------------------

/// Drives the `helm` binary
#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: String,
    timeout: Duration,
}

impl HelmCli {
    pub fn new(config: &HelmConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Arguments for `helm upgrade --install`; values are read from stdin
    pub fn install_args(&self, options: &PluginOptions) -> Vec<String> {
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            options.release.clone(),
            options.chart.chart.clone(),
            "--repo".to_string(),
            options.chart.repository.clone(),
            "--namespace".to_string(),
            options.namespace.clone(),
            "--create-namespace".to_string(),
            "--values".to_string(),
            "-".to_string(),
            "--timeout".to_string(),
            format!("{}s", self.timeout.as_secs()),
        ];
        if let Some(version) = &options.chart.version {
            args.push("--version".to_string());
            args.push(version.clone());
        }
        args
    }

    pub fn uninstall_args(&self, options: &PluginOptions) -> Vec<String> {
        vec![
            "uninstall".to_string(),
            options.release.clone(),
            "--namespace".to_string(),
            options.namespace.clone(),
            "--ignore-not-found".to_string(),
        ]
    }

    async fn run(&self, args: &[String], stdin: Option<&str>) -> Result<String, DriverError> {
        debug!(program = %self.binary, args = ?args, "Running helm");

        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DriverError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        let pipe = child.stdin.take();
        let exchange = async move {
            if let (Some(input), Some(mut pipe)) = (stdin, pipe) {
                if let Err(e) = pipe.write_all(input.as_bytes()).await {
                    debug!(error = %e, "helm closed stdin early");
                }
                // close stdin so helm sees EOF
                drop(pipe);
            }
            child.wait_with_output().await
        };

        // the deadline covers feeding stdin as well; the child dies with `exchange`
        match timeout(self.timeout, exchange).await {
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => Err(DriverError::CommandFailed {
                program: self.binary.clone(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(source)) => Err(DriverError::Spawn {
                program: self.binary.clone(),
                source,
            }),
            Err(_) => Err(DriverError::Timeout {
                program: self.binary.clone(),
                after: self.timeout,
            }),
        }
    }
}

#[async_trait]
impl InstallDriver for HelmCli {
    async fn install(&self, options: &PluginOptions) -> Result<(), DriverError> {
        let values = options
            .values
            .to_yaml()
            .map_err(|e| DriverError::InvalidOptions(e.to_string()))?;
        self.run(&self.install_args(options), Some(&values)).await?;
        info!(release = %options.release, namespace = %options.namespace, "Helm release installed");
        Ok(())
    }

    async fn uninstall(&self, options: &PluginOptions) -> Result<(), DriverError> {
        self.run(&self.uninstall_args(options), None).await?;
        info!(release = %options.release, namespace = %options.namespace, "Helm release removed");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GitOps application driver
// ---------------------------------------------------------------------------

const APPLICATION_FINALIZER: &str = "resources-finalizer.argocd.argoproj.io";

/// Manages Argo CD `Application` resources through the Kubernetes API
#[derive(Debug, Clone)]
pub struct ApplicationClient {
    client: KubeClient,
    config: GitOpsConfig,
}

impl ApplicationClient {
    /// Connect using the configured credentials. Fails without a bearer token.
    pub fn new(kube: &KubeConfig, gitops: &GitOpsConfig) -> Result<Self, KubeError> {
        let client = KubeClient::new(kube)?;
        if !client.has_token() {
            return Err(KubeError::Credentials(
                "no bearer token configured for the GitOps installer".to_string(),
            ));
        }
        Ok(Self::with_client(client, gitops.clone()))
    }

    pub fn with_client(client: KubeClient, config: GitOpsConfig) -> Self {
        Self { client, config }
    }

    fn collection_path(&self) -> String {
        format!(
            "/apis/argoproj.io/v1alpha1/namespaces/{}/applications",
            self.config.namespace
        )
    }

    fn object_path(&self, name: &str) -> String {
        format!("{}/{}", self.collection_path(), name)
    }

    /// The `Application` manifest for a plugin
    pub fn manifest(&self, options: &PluginOptions) -> Value {
        json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Application",
            "metadata": {
                "name": options.release,
                "namespace": self.config.namespace,
                "labels": { "app.kubernetes.io/managed-by": "clusterplug" },
                "finalizers": [APPLICATION_FINALIZER],
            },
            "spec": {
                "project": self.config.project,
                "source": {
                    "repoURL": options.chart.repository,
                    "chart": options.chart.chart,
                    "targetRevision": options.chart.version.as_deref().unwrap_or("*"),
                    "helm": {
                        "releaseName": options.release,
                        "valuesObject": options.values.to_json(),
                    },
                },
                "destination": {
                    "server": self.config.destination_server,
                    "namespace": options.namespace,
                },
                "syncPolicy": {
                    "automated": { "prune": true, "selfHeal": true },
                    "syncOptions": ["CreateNamespace=true"],
                },
            },
        })
    }
}

#[async_trait]
impl InstallDriver for ApplicationClient {
    async fn install(&self, options: &PluginOptions) -> Result<(), DriverError> {
        let manifest = self.manifest(options);
        match self.client.create(&self.collection_path(), &manifest).await {
            Ok(_) => {}
            Err(e) if e.is_conflict() => {
                // Already exists: replace it in place
                let path = self.object_path(&options.release);
                let existing = self.client.get(&path).await?.ok_or_else(|| {
                    DriverError::InvalidOptions(format!(
                        "application '{}' vanished during update",
                        options.release
                    ))
                })?;
                let mut updated = manifest;
                updated["metadata"]["resourceVersion"] =
                    existing["metadata"]["resourceVersion"].clone();
                self.client.replace(&path, &updated).await?;
            }
            Err(e) => return Err(e.into()),
        }
        info!(application = %options.release, namespace = %self.config.namespace, "GitOps application applied");
        Ok(())
    }

    async fn uninstall(&self, options: &PluginOptions) -> Result<(), DriverError> {
        let existed = self
            .client
            .delete(&self.object_path(&options.release))
            .await?;
        if existed {
            info!(application = %options.release, "GitOps application deleted");
        } else {
            debug!(application = %options.release, "GitOps application already absent");
        }
        Ok(())
    }
}
