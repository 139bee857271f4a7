//! Built-in plugin catalog.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::PluginOverrides;
use crate::graph::GraphError;
use crate::plugin::{ChartRef, PluginDescriptor, PluginRegistry};
use crate::values::ValueTree;

const ARGO_HELM: &str = "https://argoproj.github.io/argo-helm";
const JETSTACK: &str = "https://charts.jetstack.io";
const METALLB: &str = "https://metallb.github.io/metallb";
const INGRESS_NGINX: &str = "https://kubernetes.github.io/ingress-nginx";
const BITNAMI: &str = "https://charts.bitnami.com/bitnami";
const PROMETHEUS_COMMUNITY: &str = "https://prometheus-community.github.io/helm-charts";

/// Every curated plugin, dependencies before dependents
pub fn builtin_plugins() -> Vec<PluginDescriptor> {
    let mut cert_manager_values = ValueTree::new();
    cert_manager_values.set_path("crds.enabled", true);

    let mut nginx_values = ValueTree::new();
    nginx_values.set_path("controller.service.type", "LoadBalancer");
    nginx_values.set_path("controller.ingressClassResource.default", true);

    let mut backend_values = ValueTree::new();
    backend_values.set_path("service.type", "ClusterIP");
    backend_values.set_path("ingress.enabled", true);
    backend_values.set_path("ingress.ingressClassName", "nginx");
    backend_values.set_path("ingress.hostname", "default.cluster.local");

    let mut trust_values = ValueTree::new();
    trust_values.set_path("app.trust.namespace", "cert-manager");

    let mut observability_values = ValueTree::new();
    observability_values.set_path("grafana.ingress.enabled", true);
    observability_values.set_path("grafana.ingress.ingressClassName", "nginx");
    observability_values.set_path("alertmanager.enabled", false);

    vec![
        PluginDescriptor::new("argocd", "argocd", ChartRef::new(ARGO_HELM, "argo-cd"))
            .with_values(ValueTree::new().with(
                "configs",
                ValueTree::new().with("params", ValueTree::new().with("server.insecure", true)),
            ))
            .expecting(["argocd-server", "argocd-repo-server"]),
        PluginDescriptor::new(
            "cert-manager",
            "cert-manager",
            ChartRef::new(JETSTACK, "cert-manager"),
        )
        .with_values(cert_manager_values)
        .expecting(["cert-manager", "cert-manager-webhook", "cert-manager-cainjector"]),
        PluginDescriptor::new(
            "load-balancer",
            "metallb-system",
            ChartRef::new(METALLB, "metallb"),
        )
        .with_release("metallb")
        .expecting(["metallb-controller", "metallb-speaker"]),
        PluginDescriptor::new(
            "nginx-ingress",
            "ingress-nginx",
            ChartRef::new(INGRESS_NGINX, "ingress-nginx"),
        )
        .depends_on(["load-balancer"])
        .with_release("ingress-nginx")
        .with_values(nginx_values)
        .expecting(["ingress-nginx-controller"]),
        PluginDescriptor::new("ingress", "ingress", ChartRef::new(BITNAMI, "nginx"))
            .depends_on(["nginx-ingress", "load-balancer"])
            .with_release("default-backend")
            .with_values(backend_values),
        PluginDescriptor::new(
            "tls-bootstrap",
            "cert-manager",
            ChartRef::new(JETSTACK, "trust-manager"),
        )
        .depends_on(["cert-manager"])
        .with_release("trust-manager")
        .with_values(trust_values)
        .expecting(["trust-manager"]),
        PluginDescriptor::new(
            "observability",
            "monitoring",
            ChartRef::new(PROMETHEUS_COMMUNITY, "kube-prometheus-stack"),
        )
        .depends_on(["ingress"])
        .with_values(observability_values)
        .expecting(["observability-grafana", "observability-kube-prometheus-operator"]),
    ]
}

/// One-line summary for a built-in plugin
pub fn describe(name: &str) -> Option<&'static str> {
    let text = match name {
        "argocd" => "GitOps controller (Argo CD)",
        "cert-manager" => "Certificate management",
        "load-balancer" => "Bare-metal LoadBalancer services (MetalLB)",
        "nginx-ingress" => "NGINX ingress controller",
        "ingress" => "Default HTTP backend behind the ingress controller",
        "tls-bootstrap" => "Cluster CA bundle distribution (trust-manager)",
        "observability" => "Prometheus and Grafana monitoring stack",
        _ => return None,
    };
    Some(text)
}

/// Registry holding the built-in catalog
pub fn builtin_registry() -> Result<PluginRegistry, GraphError> {
    configured_registry(&BTreeMap::new())
}

/// Built-in catalog with user value overrides merged over each plugin's
/// defaults
pub fn configured_registry(
    overrides: &BTreeMap<String, PluginOverrides>,
) -> Result<PluginRegistry, GraphError> {
    let plugins = builtin_plugins();
    for name in overrides.keys() {
        if !plugins.iter().any(|p| &p.name == name) {
            warn!(plugin = %name, "Ignoring overrides for unknown plugin");
        }
    }

    let mut registry = PluginRegistry::new();
    for mut descriptor in plugins {
        if let Some(custom) = overrides.get(&descriptor.name) {
            debug!(plugin = %descriptor.name, "Applying value overrides");
            descriptor = descriptor.with_overrides(&custom.values);
        }
        registry.register(Arc::new(descriptor))?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyGraph, DependencyValidator};
    use crate::plugin::Plugin;
    use crate::values::Value;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_registry_is_acyclic() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.len(), 7);
        assert!(!DependencyGraph::from_registry(&registry).has_cycles());
    }

    #[test]
    fn test_every_plugin_described() {
        for plugin in builtin_plugins() {
            assert!(describe(&plugin.name).is_some(), "{} lacks a description", plugin.name);
        }
        assert!(describe("nope").is_none());
    }

    #[test]
    fn test_every_dependency_registered() {
        let registry = builtin_registry().unwrap();
        for plugin in registry.iter() {
            for dep in plugin.dependencies() {
                assert!(registry.contains(dep), "{} -> {}", plugin.name(), dep);
            }
        }
    }

    #[test]
    fn test_observability_pulls_ingress_chain() {
        let validator = DependencyValidator::from_registry(&builtin_registry().unwrap());
        let plan = validator
            .validate_installation(&["observability"], &HashSet::new())
            .unwrap();
        assert_eq!(
            plan,
            vec!["load-balancer", "nginx-ingress", "ingress", "observability"]
        );
    }

    #[test]
    fn test_release_overrides() {
        let registry = builtin_registry().unwrap();
        let lb = registry.get("load-balancer").unwrap().options();
        assert_eq!(lb.release, "metallb");
        assert_eq!(lb.namespace, "metallb-system");

        let argocd = registry.get("argocd").unwrap().options();
        assert_eq!(argocd.release, "argocd");
        assert_eq!(
            argocd.values.get_path("configs.params"),
            Some(&Value::Map(
                ValueTree::new().with("server.insecure", true)
            ))
        );
    }

    #[test]
    fn test_overrides_keep_sibling_values() {
        let mut custom = ValueTree::new();
        custom.set_path("controller.service.type", "NodePort");
        custom.set_path("controller.replicaCount", 2);
        let overrides = BTreeMap::from([(
            "nginx-ingress".to_string(),
            PluginOverrides { values: custom },
        )]);

        let registry = configured_registry(&overrides).unwrap();
        let values = registry.get("nginx-ingress").unwrap().options().values;
        assert_eq!(
            values.get_path("controller.service.type"),
            Some(&Value::from("NodePort"))
        );
        assert_eq!(values.get_path("controller.replicaCount"), Some(&Value::from(2)));
        assert_eq!(
            values.get_path("controller.ingressClassResource.default"),
            Some(&Value::from(true))
        );

        // other plugins keep their defaults
        let cert_manager = registry.get("cert-manager").unwrap().options().values;
        assert_eq!(cert_manager.get_path("crds.enabled"), Some(&Value::from(true)));
    }

    #[test]
    fn test_overrides_for_unknown_plugin_ignored() {
        let overrides = BTreeMap::from([(
            "service-mesh".to_string(),
            PluginOverrides::default(),
        )]);
        let registry = configured_registry(&overrides).unwrap();
        assert_eq!(registry.len(), 7);
        assert!(!registry.contains("service-mesh"));
    }
}
