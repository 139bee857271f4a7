//! Installer tracking.
//!
//! Records which delivery mechanism was used for each plugin so later
//! operations on the same plugin keep using it. Records live in a durable,
//! namespaced key/value document; a missing record is a normal answer, not
//! an error. Every call is bounded by a timeout so that a slow store shows
//! up as a transport failure rather than a hang.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::TrackerConfig;
use crate::installer::InstallerKind;
use crate::kube::{KubeClient, KubeError};

/// Annotation holding the last time the record document was written
pub const UPDATED_AT_ANNOTATION: &str = "clusterplug.io/updated-at";

const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const WRITE_ATTEMPTS: usize = 3;

/// Errors from the tracking store. These are transport problems; "no
/// record" is never an error.
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Tracking store {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Tracking store error: {0}")]
    Kube(#[from] KubeError),

    #[error("Tracking store error: {0}")]
    Store(String),
}

/// Durable key/value document holding installer records
#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, TrackerError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), TrackerError>;
    async fn delete(&self, key: &str) -> Result<(), TrackerError>;
    /// All records, sorted by key
    async fn entries(&self) -> Result<Vec<(String, String)>, TrackerError>;
}

/// In-process store, used for dry runs and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TrackerError> {
        Ok(self.data.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TrackerError> {
        self.data
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), TrackerError> {
        self.data.write().await.remove(key);
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<(String, String)>, TrackerError> {
        Ok(self
            .data
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

/// Store backed by a single ConfigMap. Each plugin is one `data` key.
#[derive(Debug, Clone)]
pub struct ConfigMapStore {
    client: KubeClient,
    namespace: String,
    name: String,
}

impl ConfigMapStore {
    pub fn new(client: KubeClient, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    fn collection_path(&self) -> String {
        format!("/api/v1/namespaces/{}/configmaps", self.namespace)
    }

    fn object_path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }

    async fn fetch(&self) -> Result<Option<Value>, TrackerError> {
        Ok(self.client.get(&self.object_path()).await?)
    }

    fn touch(document: &mut Value) {
        document["metadata"]["annotations"][UPDATED_AT_ANNOTATION] =
            Value::String(Utc::now().to_rfc3339());
    }

    /// Read-modify-write with retry on a resource-version conflict
    async fn write_with<F>(&self, mut edit: F) -> Result<(), TrackerError>
    where
        F: FnMut(&mut serde_json::Map<String, Value>) -> bool + Send,
    {
        let mut last_conflict = None;

        for attempt in 1..=WRITE_ATTEMPTS {
            let result = match self.fetch().await? {
                Some(mut document) => {
                    if !document["data"].is_object() {
                        document["data"] = json!({});
                    }
                    let changed = match document["data"].as_object_mut() {
                        Some(data) => edit(data),
                        None => false,
                    };
                    if !changed {
                        return Ok(());
                    }
                    Self::touch(&mut document);
                    self.client
                        .replace(&self.object_path(), &document)
                        .await
                        .map(|_| ())
                }
                None => {
                    let mut data = serde_json::Map::new();
                    if !edit(&mut data) {
                        return Ok(());
                    }
                    let mut document = json!({
                        "apiVersion": "v1",
                        "kind": "ConfigMap",
                        "metadata": {
                            "name": self.name,
                            "namespace": self.namespace,
                            "labels": { MANAGED_BY_LABEL: "clusterplug" },
                        },
                        "data": Value::Object(data),
                    });
                    Self::touch(&mut document);
                    self.client
                        .create(&self.collection_path(), &document)
                        .await
                        .map(|_| ())
                }
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_conflict() => {
                    debug!(attempt, config_map = %self.name, "Tracker write conflict, retrying");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_conflict
            .map(TrackerError::from)
            .unwrap_or_else(|| TrackerError::Store("write retries exhausted".to_string())))
    }
}

#[async_trait]
impl TrackingStore for ConfigMapStore {
    async fn get(&self, key: &str) -> Result<Option<String>, TrackerError> {
        Ok(self
            .fetch()
            .await?
            .and_then(|doc| doc["data"][key].as_str().map(str::to_string)))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TrackerError> {
        self.write_with(|data| {
            if data.get(key).and_then(Value::as_str) == Some(value) {
                return false;
            }
            data.insert(key.to_string(), Value::String(value.to_string()));
            true
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), TrackerError> {
        // Never create the document just to delete from it
        if self.fetch().await?.is_none() {
            return Ok(());
        }
        self.write_with(|data| data.remove(key).is_some()).await
    }

    async fn entries(&self) -> Result<Vec<(String, String)>, TrackerError> {
        let Some(document) = self.fetch().await? else {
            return Ok(Vec::new());
        };
        let mut entries: Vec<(String, String)> = document["data"]
            .as_object()
            .map(|data| {
                data.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort();
        Ok(entries)
    }
}

/// Maps plugin names to the installer kind they were installed with
#[derive(Clone)]
pub struct InstallerTracker {
    store: Arc<dyn TrackingStore>,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl std::fmt::Debug for InstallerTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallerTracker")
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .finish_non_exhaustive()
    }
}

impl InstallerTracker {
    pub fn new(store: Arc<dyn TrackingStore>) -> Self {
        let defaults = TrackerConfig::default();
        Self {
            store,
            read_timeout: defaults.read_timeout(),
            write_timeout: defaults.write_timeout(),
        }
    }

    /// Tracker backed by the ConfigMap named in `config`
    pub fn from_config(client: KubeClient, config: &TrackerConfig) -> Self {
        let store = ConfigMapStore::new(client, &config.namespace, &config.config_map);
        Self::new(Arc::new(store)).with_timeouts(config.read_timeout(), config.write_timeout())
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn with_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.read_timeout = read;
        self.write_timeout = write;
        self
    }

    async fn bounded<T, F>(
        operation: &'static str,
        limit: Duration,
        call: F,
    ) -> Result<T, TrackerError>
    where
        F: Future<Output = Result<T, TrackerError>>,
    {
        match timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation, after = ?limit, "Tracking store call timed out");
                Err(TrackerError::Timeout {
                    operation,
                    after: limit,
                })
            }
        }
    }

    /// Recorded kind for `name`, or `None` if nothing is recorded
    pub async fn get(&self, name: &str) -> Result<Option<InstallerKind>, TrackerError> {
        let raw = Self::bounded("read", self.read_timeout, self.store.get(name)).await?;
        Ok(raw.map(|value| InstallerKind::from_record(&value)))
    }

    pub async fn set(&self, name: &str, kind: InstallerKind) -> Result<(), TrackerError> {
        Self::bounded(
            "write",
            self.write_timeout,
            self.store.set(name, kind.as_str()),
        )
        .await?;
        debug!(plugin = %name, kind = %kind, "Recorded installer kind");
        Ok(())
    }

    pub async fn delete(&self, name: &str) -> Result<(), TrackerError> {
        Self::bounded("delete", self.write_timeout, self.store.delete(name)).await?;
        debug!(plugin = %name, "Removed installer record");
        Ok(())
    }

    /// Every recorded plugin with its kind
    pub async fn list(&self) -> Result<Vec<(String, InstallerKind)>, TrackerError> {
        let entries = Self::bounded("list", self.read_timeout, self.store.entries()).await?;
        Ok(entries
            .into_iter()
            .map(|(name, value)| {
                let kind = InstallerKind::from_record(&value);
                (name, kind)
            })
            .collect())
    }
}
