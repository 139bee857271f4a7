//! clusterplug - add-on management for local multi-node Kubernetes clusters
//!
//! Resolves plugin dependencies into install and uninstall orders, picks the
//! delivery mechanism for each plugin (GitOps application or package-manager
//! release), and remembers that choice so later operations stay consistent.
//!
//! This library exposes the core for both the CLI binary and integration
//! testing.

pub mod catalog;
pub mod config;
pub mod graph;
pub mod installer;
pub mod kube;
pub mod orchestrator;
pub mod plugin;
pub mod readiness;
pub mod selector;
pub mod tracker;
pub mod values;
