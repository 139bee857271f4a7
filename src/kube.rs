//! Minimal Kubernetes API client.
//!
//! Only what the tracker, the controller probe, the readiness probe and the
//! GitOps driver need: JSON get/list/create/replace/delete against the REST
//! API with a bearer token. A 404 is reported as absence, not as an error.

use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::KubeConfig;

/// Errors talking to the Kubernetes API
#[derive(Error, Debug)]
pub enum KubeError {
    #[error("Invalid API server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Credentials error: {0}")]
    Credentials(String),

    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("API returned {status} for {path}: {message}")]
    Api {
        status: u16,
        path: String,
        message: String,
    },

    #[error("Invalid response from {path}: {message}")]
    InvalidResponse { path: String, message: String },
}

impl KubeError {
    /// True for a 409 Conflict (resource version mismatch or already exists)
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Api { status: 409, .. })
    }
}

/// Thin JSON client for the Kubernetes REST API
#[derive(Debug, Clone)]
pub struct KubeClient {
    http: Client,
    base: Url,
    token: Option<String>,
}

impl KubeClient {
    /// Build a client from configuration
    pub fn new(config: &KubeConfig) -> Result<Self, KubeError> {
        let token = config
            .resolve_token()
            .map_err(|e| KubeError::Credentials(format!("reading token file: {}", e)))?;
        Self::from_parts(
            &config.api_server,
            token,
            config.insecure_skip_tls_verify,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn from_parts(
        api_server: &str,
        token: Option<String>,
        insecure: bool,
        timeout: Duration,
    ) -> Result<Self, KubeError> {
        let mut base = Url::parse(api_server).map_err(|e| KubeError::InvalidUrl {
            url: api_server.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(KubeError::InvalidUrl {
                url: api_server.to_string(),
                reason: format!("unsupported scheme '{}'", base.scheme()),
            });
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Self {
            http,
            base,
            token: token.filter(|t| !t.is_empty()),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    fn url(&self, path: &str) -> Result<Url, KubeError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| KubeError::InvalidUrl {
                url: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Option<Value>, KubeError> {
        let url = self.url(path)?;
        debug!(method = %method, url = %url, "Kubernetes API request");

        let mut request = self.http.request(method, url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| v["message"].as_str().map(str::to_string))
                .unwrap_or(text);
            return Err(KubeError::Api {
                status: status.as_u16(),
                path: path.to_string(),
                message,
            });
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Some(Value::Null));
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| KubeError::InvalidResponse {
                path: path.to_string(),
                message: e.to_string(),
            })
    }

    /// GET a single object; `None` if it does not exist
    pub async fn get(&self, path: &str) -> Result<Option<Value>, KubeError> {
        self.send(Method::GET, path, &[], None).await
    }

    /// List a collection, optionally filtered by a label selector.
    /// A missing collection (e.g. namespace absent) lists as empty.
    pub async fn list(
        &self,
        path: &str,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>, KubeError> {
        let query: Vec<(&str, &str)> = label_selector
            .map(|s| vec![("labelSelector", s)])
            .unwrap_or_default();
        let body = self.send(Method::GET, path, &query, None).await?;
        match body {
            None => Ok(Vec::new()),
            Some(list) => match list.get("items") {
                Some(Value::Array(items)) => Ok(items.clone()),
                Some(Value::Null) | None => Ok(Vec::new()),
                Some(_) => Err(KubeError::InvalidResponse {
                    path: path.to_string(),
                    message: "'items' is not an array".to_string(),
                }),
            },
        }
    }

    /// POST a new object into a collection
    pub async fn create(&self, path: &str, body: &Value) -> Result<Value, KubeError> {
        self.send(Method::POST, path, &[], Some(body))
            .await?
            .ok_or_else(|| KubeError::Api {
                status: 404,
                path: path.to_string(),
                message: "collection not found".to_string(),
            })
    }

    /// PUT an existing object
    pub async fn replace(&self, path: &str, body: &Value) -> Result<Value, KubeError> {
        self.send(Method::PUT, path, &[], Some(body))
            .await?
            .ok_or_else(|| KubeError::Api {
                status: 404,
                path: path.to_string(),
                message: "object not found".to_string(),
            })
    }

    /// DELETE an object; returns `false` if it was already gone
    pub async fn delete(&self, path: &str) -> Result<bool, KubeError> {
        Ok(self.send(Method::DELETE, path, &[], None).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(server: &str) -> Result<KubeClient, KubeError> {
        KubeClient::from_parts(server, Some("t0ken".into()), true, Duration::from_secs(5))
    }

    #[test]
    fn test_rejects_malformed_url() {
        assert!(matches!(
            client("not a url"),
            Err(KubeError::InvalidUrl { .. })
        ));
        assert!(matches!(
            client("ftp://127.0.0.1"),
            Err(KubeError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_url_joins_under_base_path() {
        let c = client("https://proxy.local/k8s").unwrap();
        let url = c.url("/api/v1/namespaces/argocd").unwrap();
        assert_eq!(url.as_str(), "https://proxy.local/k8s/api/v1/namespaces/argocd");
    }

    #[test]
    fn test_empty_token_is_dropped() {
        let c = KubeClient::from_parts(
            "https://127.0.0.1:6443",
            Some(String::new()),
            true,
            Duration::from_secs(5),
        )
        .unwrap();
        assert!(!c.has_token());
        assert!(client("https://127.0.0.1:6443").unwrap().has_token());
    }

    #[test]
    fn test_conflict_detection() {
        let err = KubeError::Api {
            status: 409,
            path: "/x".into(),
            message: "conflict".into(),
        };
        assert!(err.is_conflict());
        assert!(err.to_string().contains("409"));
    }
}
