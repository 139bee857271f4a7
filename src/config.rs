//! Configuration loader.
//!
//! Loads configuration from (later sources win):
//! 1. Default values
//! 2. `~/.clusterplug/config.yaml` in the home directory
//! 3. `.clusterplug/config.yaml` in the working directory
//! 4. Environment variables with the `CLUSTERPLUG_` prefix
//!    (e.g. `CLUSTERPLUG_TRACKER__NAMESPACE=platform`)
//! 5. `KUBE_API_SERVER` / `KUBE_TOKEN`
//!
//! Chart values for a plugin can be overridden under `plugins.<name>.values`.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::values::ValueTree;

/// Main configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub kube: KubeConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub gitops: GitOpsConfig,
    #[serde(default)]
    pub helm: HelmConfig,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Per-plugin overrides, keyed by plugin name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugins: BTreeMap<String, PluginOverrides>,
}

/// User overrides for one plugin
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
pub struct PluginOverrides {
    /// Merged over the plugin's default chart values
    #[serde(default)]
    pub values: ValueTree,
}

/// Kubernetes API access
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KubeConfig {
    #[serde(default = "default_api_server")]
    pub api_server: String,
    /// Bearer token. Takes precedence over `token_file`.
    #[serde(default, skip_serializing)]
    pub token: Option<String>,
    #[serde(default)]
    pub token_file: Option<PathBuf>,
    /// Local clusters use self-signed serving certificates
    #[serde(default = "default_true")]
    pub insecure_skip_tls_verify: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_server() -> String {
    "https://127.0.0.1:6443".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for KubeConfig {
    fn default() -> Self {
        Self {
            api_server: default_api_server(),
            token: None,
            token_file: None,
            insecure_skip_tls_verify: true,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl KubeConfig {
    /// Resolve the bearer token from `token` or `token_file`
    pub fn resolve_token(&self) -> std::io::Result<Option<String>> {
        if let Some(token) = &self.token {
            return Ok(Some(token.trim().to_string()));
        }
        match &self.token_file {
            Some(path) => Ok(Some(std::fs::read_to_string(path)?.trim().to_string())),
            None => Ok(None),
        }
    }
}

/// Where installer choices are recorded
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TrackerConfig {
    #[serde(default = "default_tracker_namespace")]
    pub namespace: String,
    #[serde(default = "default_config_map")]
    pub config_map: String,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

fn default_tracker_namespace() -> String {
    "kube-system".to_string()
}

fn default_config_map() -> String {
    "clusterplug-installers".to_string()
}

fn default_read_timeout() -> u64 {
    10
}

fn default_write_timeout() -> u64 {
    30
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            namespace: default_tracker_namespace(),
            config_map: default_config_map(),
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

impl TrackerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }
}

/// GitOps controller detection and application defaults
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GitOpsConfig {
    /// Namespace the controller runs in; applications are created here too
    #[serde(default = "default_gitops_namespace")]
    pub namespace: String,
    /// Label selector matching the controller pods
    #[serde(default = "default_controller_selector")]
    pub controller_selector: String,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_destination_server")]
    pub destination_server: String,
}

fn default_gitops_namespace() -> String {
    "argocd".to_string()
}

fn default_controller_selector() -> String {
    "app.kubernetes.io/name=argocd-server".to_string()
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_project() -> String {
    "default".to_string()
}

fn default_destination_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

impl Default for GitOpsConfig {
    fn default() -> Self {
        Self {
            namespace: default_gitops_namespace(),
            controller_selector: default_controller_selector(),
            probe_timeout_secs: default_probe_timeout(),
            project: default_project(),
            destination_server: default_destination_server(),
        }
    }
}

impl GitOpsConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Package-manager driver settings
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HelmConfig {
    #[serde(default = "default_helm_binary")]
    pub binary: String,
    #[serde(default = "default_helm_timeout")]
    pub timeout_secs: u64,
}

fn default_helm_binary() -> String {
    "helm".to_string()
}

fn default_helm_timeout() -> u64 {
    600
}

impl Default for HelmConfig {
    fn default() -> Self {
        Self {
            binary: default_helm_binary(),
            timeout_secs: default_helm_timeout(),
        }
    }
}

/// Readiness polling after an install
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReadinessConfig {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_readiness_timeout")]
    pub timeout_secs: u64,
}

fn default_interval() -> u64 {
    5
}

fn default_readiness_timeout() -> u64 {
    300
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            timeout_secs: default_readiness_timeout(),
        }
    }
}

/// Load configuration from all sources
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let home_config = dirs::home_dir().map(|home| home.join(".clusterplug/config.yaml"));
    let project_config = PathBuf::from(".clusterplug/config.yaml");

    let mut files: Vec<PathBuf> = Vec::new();
    files.extend(home_config);
    files.push(project_config);

    load_config_from(&files)
}

/// Load configuration from the given files (missing files are skipped), then
/// apply environment overrides
pub fn load_config_from(files: &[PathBuf]) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    for path in files {
        if path.exists() {
            builder = builder.add_source(File::from(path.as_path()).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("CLUSTERPLUG")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    if let Ok(server) = std::env::var("KUBE_API_SERVER") {
        builder = builder.set_override("kube.api_server", server)?;
    }
    if let Ok(token) = std::env::var("KUBE_TOKEN") {
        builder = builder.set_override("kube.token", token)?;
    }

    builder.build()?.try_deserialize()
}

/// Write the default configuration to `path` unless it already exists
pub fn write_default_config(path: &Path, force: bool) -> std::io::Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serde_yaml::to_string(&AppConfig::default())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, yaml)?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.kube.api_server, "https://127.0.0.1:6443");
        assert!(config.kube.insecure_skip_tls_verify);
        assert_eq!(config.tracker.namespace, "kube-system");
        assert_eq!(config.tracker.config_map, "clusterplug-installers");
        assert_eq!(config.tracker.read_timeout(), Duration::from_secs(10));
        assert_eq!(config.tracker.write_timeout(), Duration::from_secs(30));
        assert_eq!(config.gitops.namespace, "argocd");
        assert_eq!(config.helm.binary, "helm");
        assert_eq!(config.readiness.interval_secs, 5);
        assert_eq!(config.readiness.timeout_secs, 300);
        assert!(config.plugins.is_empty());
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: AppConfig = serde_yaml::from_str(
            r#"
tracker:
  namespace: platform
gitops:
  probe_timeout_secs: 3
"#,
        )
        .unwrap();
        assert_eq!(config.tracker.namespace, "platform");
        assert_eq!(config.tracker.config_map, "clusterplug-installers");
        assert_eq!(config.gitops.probe_timeout(), Duration::from_secs(3));
        assert_eq!(config.gitops.namespace, "argocd");
        assert_eq!(config.kube.request_timeout_secs, 30);
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            "kube:\n  api_server: https://10.0.0.5:6443\nreadiness:\n  timeout_secs: 60\n",
        )
        .unwrap();

        let config = load_config_from(&[path]).unwrap();
        assert_eq!(config.readiness.timeout_secs, 60);
        assert_eq!(config.readiness.interval_secs, 5);
        assert_eq!(config.helm.timeout_secs, 600);
    }

    #[test]
    fn test_plugin_value_overrides_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(
            &path,
            r#"
plugins:
  nginx-ingress:
    values:
      controller:
        service:
          type: nodeport
        replicas: 2
"#,
        )
        .unwrap();

        let config = load_config_from(&[path]).unwrap();
        let values = &config.plugins["nginx-ingress"].values;
        assert_eq!(
            values.get_path("controller.service.type"),
            Some(&crate::values::Value::from("nodeport"))
        );
        assert_eq!(
            values.get_path("controller.replicas"),
            Some(&crate::values::Value::from(2))
        );
    }

    #[test]
    fn test_missing_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let config = load_config_from(&[dir.path().join("nope.yaml")]).unwrap();
        assert_eq!(config.tracker.read_timeout_secs, 10);
    }

    #[test]
    fn test_resolve_token_prefers_inline() {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("token");
        std::fs::write(&token_path, "from-file\n").unwrap();

        let mut kube = KubeConfig {
            token_file: Some(token_path),
            ..KubeConfig::default()
        };
        assert_eq!(kube.resolve_token().unwrap().as_deref(), Some("from-file"));

        kube.token = Some(" inline ".into());
        assert_eq!(kube.resolve_token().unwrap().as_deref(), Some("inline"));
    }

    #[test]
    fn test_resolve_token_none() {
        assert!(KubeConfig::default().resolve_token().unwrap().is_none());
    }

    #[test]
    fn test_write_default_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".clusterplug/config.yaml");
        assert!(write_default_config(&path, false).unwrap());
        assert!(!write_default_config(&path, false).unwrap());
        assert!(write_default_config(&path, true).unwrap());

        let written: AppConfig =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.tracker.config_map, "clusterplug-installers");
    }
}
