//! Plugin dependency graph.
//!
//! Builds a graph from the dependencies each plugin declares and computes
//! install orders (dependencies first) and uninstall orders (dependents
//! first). Cycles are rejected before any order is produced.
//!
//! A name that is referenced as a dependency but never registered gets a
//! placeholder node. Registration stays lazy: the placeholder only turns
//! into [`GraphError::PluginNotFound`] when an install order actually needs
//! it, which keeps that failure distinct from a cycle.
//!
//! [`DependencyValidator`] wraps the graph and filters the computed orders
//! against a caller-supplied snapshot of installed plugins.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::plugin::{Plugin, PluginRegistry};

/// Errors produced while planning plugin operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Circular dependency detected at plugin '{0}'")]
    CircularDependency(String),

    #[error("Plugin '{plugin}' requires '{dependency}', which is not installed")]
    UnmetDependency { plugin: String, dependency: String },

    #[error("Cannot remove '{plugin}': still required by {}", dependents.join(", "))]
    BlockedByDependents {
        plugin: String,
        dependents: Vec<String>,
    },

    #[error("Invalid plugin name '{0}': must be lowercase alphanumerics and '-', at most 63 characters")]
    InvalidName(String),
}

/// A node in the dependency graph
#[derive(Debug, Clone, Default)]
struct GraphNode {
    /// Registered plugin; `None` for a placeholder created by a dependency reference
    plugin: Option<Arc<dyn Plugin>>,
    /// Declared dependency names, in declaration order
    dependencies: Vec<String>,
}

/// Direct dependency edges of a single plugin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyInfo {
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
}

/// Dependency graph over plugin names
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: HashMap<String, GraphNode>,
    /// Node names in first-seen order, so traversals are reproducible
    order: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph holding every plugin in the registry
    pub fn from_registry(registry: &PluginRegistry) -> Self {
        let mut graph = Self::new();
        for plugin in registry.iter() {
            graph.add_plugin(Arc::clone(plugin));
        }
        graph
    }

    fn ensure_node(&mut self, name: &str) -> &mut GraphNode {
        if !self.nodes.contains_key(name) {
            self.order.push(name.to_string());
        }
        self.nodes.entry(name.to_string()).or_default()
    }

    /// Insert or replace the node for `plugin`.
    ///
    /// The dependency list is replaced, not merged. Unknown dependency names
    /// get placeholder nodes.
    pub fn add_plugin(&mut self, plugin: Arc<dyn Plugin>) {
        let name = plugin.name().to_string();

        let mut dependencies: Vec<String> = Vec::with_capacity(plugin.dependencies().len());
        for dep in plugin.dependencies() {
            if !dependencies.contains(dep) {
                dependencies.push(dep.clone());
            }
        }

        for dep in &dependencies {
            self.ensure_node(dep);
        }

        let node = self.ensure_node(&name);
        node.plugin = Some(plugin);
        node.dependencies = dependencies;
    }

    /// Number of nodes, placeholders included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// True if `name` has a real registration (not just a placeholder)
    pub fn is_registered(&self, name: &str) -> bool {
        self.plugin(name).is_some()
    }

    pub fn plugin(&self, name: &str) -> Option<&Arc<dyn Plugin>> {
        self.nodes.get(name).and_then(|n| n.plugin.as_ref())
    }

    /// Direct dependencies of `name`
    pub fn dependencies(&self, name: &str) -> Vec<String> {
        self.nodes
            .get(name)
            .map(|n| n.dependencies.clone())
            .unwrap_or_default()
    }

    /// Direct dependents of `name`, derived from every other node's declarations
    pub fn dependents(&self, name: &str) -> Vec<String> {
        self.order
            .iter()
            .filter(|candidate| {
                self.nodes
                    .get(candidate.as_str())
                    .is_some_and(|n| n.dependencies.iter().any(|d| d == name))
            })
            .cloned()
            .collect()
    }

    /// Install order for `targets` and everything they transitively need.
    ///
    /// Dependencies always precede their dependents. Among plugins that do
    /// not depend on each other no particular order is promised.
    pub fn install_order<S: AsRef<str>>(&self, targets: &[S]) -> Result<Vec<String>, GraphError> {
        let mut visiting = HashSet::new();
        let mut collected = HashSet::new();
        let mut closure = Vec::new();

        for target in targets {
            self.collect_dependencies(
                target.as_ref(),
                &mut visiting,
                &mut collected,
                &mut closure,
            )?;
        }

        let order = self.topological_sort(&closure)?;
        debug!(targets = targets.len(), order = ?order, "Computed install order");
        Ok(order)
    }

    fn collect_dependencies(
        &self,
        name: &str,
        visiting: &mut HashSet<String>,
        collected: &mut HashSet<String>,
        closure: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if collected.contains(name) {
            return Ok(());
        }
        if visiting.contains(name) {
            return Err(GraphError::CircularDependency(name.to_string()));
        }

        let node = self
            .nodes
            .get(name)
            .filter(|n| n.plugin.is_some())
            .ok_or_else(|| GraphError::PluginNotFound(name.to_string()))?;

        visiting.insert(name.to_string());
        for dep in &node.dependencies {
            self.collect_dependencies(dep, visiting, collected, closure)?;
        }
        visiting.remove(name);

        collected.insert(name.to_string());
        closure.push(name.to_string());
        Ok(())
    }

    /// Uninstall order for `targets` and every plugin that transitively
    /// depends on them. Dependents are removed before their dependencies.
    pub fn uninstall_order<S: AsRef<str>>(
        &self,
        targets: &[S],
    ) -> Result<Vec<String>, GraphError> {
        let mut seen = HashSet::new();
        let mut closure = Vec::new();
        let mut queue = VecDeque::new();

        for target in targets {
            let target = target.as_ref();
            if !self.is_registered(target) {
                return Err(GraphError::PluginNotFound(target.to_string()));
            }
            if seen.insert(target.to_string()) {
                queue.push_back(target.to_string());
            }
        }

        while let Some(name) = queue.pop_front() {
            for dependent in self.dependents(&name) {
                if seen.insert(dependent.clone()) {
                    queue.push_back(dependent);
                }
            }
            closure.push(name);
        }

        let mut order = self.topological_sort(&closure)?;
        order.reverse();
        debug!(targets = targets.len(), order = ?order, "Computed uninstall order");
        Ok(order)
    }

    /// Kahn's algorithm restricted to `closure`; edges leaving the closure are ignored
    fn topological_sort(&self, closure: &[String]) -> Result<Vec<String>, GraphError> {
        let members: HashSet<&str> = closure.iter().map(String::as_str).collect();
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(closure.len());
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::with_capacity(closure.len());

        for name in closure {
            let deps = self
                .nodes
                .get(name.as_str())
                .map(|n| n.dependencies.as_slice())
                .unwrap_or_default();
            let inside: Vec<&str> = deps
                .iter()
                .map(String::as_str)
                .filter(|d| members.contains(d))
                .collect();
            in_degree.insert(name.as_str(), inside.len());
            for dep in inside {
                dependents.entry(dep).or_default().push(name.as_str());
            }
        }

        let mut queue: VecDeque<&str> = closure
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();
        let mut sorted = Vec::with_capacity(closure.len());

        while let Some(name) = queue.pop_front() {
            sorted.push(name.to_string());
            for &dependent in dependents.get(name).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if sorted.len() != closure.len() {
            let stuck = closure
                .iter()
                .find(|n| in_degree.get(n.as_str()).is_some_and(|d| *d > 0))
                .cloned()
                .unwrap_or_default();
            return Err(GraphError::CircularDependency(stuck));
        }

        Ok(sorted)
    }

    /// Check only the direct dependencies of `name` against `installed`
    pub fn validate_install(&self, name: &str, installed: &HashSet<String>) -> Result<(), GraphError> {
        let node = self
            .nodes
            .get(name)
            .filter(|n| n.plugin.is_some())
            .ok_or_else(|| GraphError::PluginNotFound(name.to_string()))?;

        match node.dependencies.iter().find(|d| !installed.contains(*d)) {
            Some(missing) => Err(GraphError::UnmetDependency {
                plugin: name.to_string(),
                dependency: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Check only the direct dependents of `name` against `installed`
    pub fn validate_uninstall(
        &self,
        name: &str,
        installed: &HashSet<String>,
    ) -> Result<(), GraphError> {
        if !self.contains(name) {
            return Err(GraphError::PluginNotFound(name.to_string()));
        }

        let blocking: Vec<String> = self
            .dependents(name)
            .into_iter()
            .filter(|d| installed.contains(d))
            .collect();

        if blocking.is_empty() {
            Ok(())
        } else {
            Err(GraphError::BlockedByDependents {
                plugin: name.to_string(),
                dependents: blocking,
            })
        }
    }

    /// Whole-graph cycle scan, independent of any particular request
    pub fn has_cycles(&self) -> bool {
        let mut colors: HashMap<&str, Color> = self
            .order
            .iter()
            .map(|n| (n.as_str(), Color::White))
            .collect();

        for name in &self.order {
            if colors.get(name.as_str()) == Some(&Color::White) && self.visit(name, &mut colors) {
                return true;
            }
        }
        false
    }

    fn visit<'a>(&'a self, name: &'a str, colors: &mut HashMap<&'a str, Color>) -> bool {
        colors.insert(name, Color::Gray);
        if let Some(node) = self.nodes.get(name) {
            for dep in &node.dependencies {
                match colors.get(dep.as_str()).copied().unwrap_or(Color::White) {
                    Color::Gray => return true,
                    Color::White => {
                        if self.visit(dep, colors) {
                            return true;
                        }
                    }
                    Color::Black => {}
                }
            }
        }
        colors.insert(name, Color::Black);
        false
    }
}

/// Turns graph orderings into actionable, snapshot-aware plans
#[derive(Debug, Clone)]
pub struct DependencyValidator {
    graph: DependencyGraph,
}

impl DependencyValidator {
    pub fn new(graph: DependencyGraph) -> Self {
        Self { graph }
    }

    pub fn from_registry(registry: &PluginRegistry) -> Self {
        Self::new(DependencyGraph::from_registry(registry))
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Plugins that still need installing for `targets`, in install order.
    ///
    /// Plugins already in `installed` are skipped. Each remaining plugin is
    /// checked against a working copy of the snapshot that grows as the plan
    /// is built, so later entries may rely on earlier ones.
    pub fn validate_installation<S: AsRef<str>>(
        &self,
        targets: &[S],
        installed: &HashSet<String>,
    ) -> Result<Vec<String>, GraphError> {
        let order = self.graph.install_order(targets)?;
        let mut working = installed.clone();
        let mut needed = Vec::new();

        for name in order {
            if installed.contains(&name) {
                continue;
            }
            self.graph.validate_install(&name, &working)?;
            working.insert(name.clone());
            needed.push(name);
        }

        Ok(needed)
    }

    /// Plugins that need removing for `targets`, dependents first.
    ///
    /// Plugins not in `installed` are skipped. The working snapshot shrinks
    /// as the plan is built.
    pub fn validate_uninstallation<S: AsRef<str>>(
        &self,
        targets: &[S],
        installed: &HashSet<String>,
    ) -> Result<Vec<String>, GraphError> {
        let order = self.graph.uninstall_order(targets)?;
        let mut working = installed.clone();
        let mut needed = Vec::new();

        for name in order {
            if !installed.contains(&name) {
                continue;
            }
            self.graph.validate_uninstall(&name, &working)?;
            working.remove(&name);
            needed.push(name);
        }

        Ok(needed)
    }

    pub fn dependency_info(&self, name: &str) -> DependencyInfo {
        DependencyInfo {
            dependencies: self.graph.dependencies(name),
            dependents: self.graph.dependents(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::{ChartRef, PluginDescriptor};

    fn plugin(name: &str, deps: &[&str]) -> Arc<dyn Plugin> {
        Arc::new(
            PluginDescriptor::new(
                name,
                "default",
                ChartRef::new("https://charts.example.com", name),
            )
            .depends_on(deps.iter().copied()),
        )
    }

    fn graph(decls: &[(&str, &[&str])]) -> DependencyGraph {
        let mut g = DependencyGraph::new();
        for (name, deps) in decls {
            g.add_plugin(plugin(name, deps));
        }
        g
    }

    fn installed(names: &[&str]) -> HashSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn position(order: &[String], name: &str) -> usize {
        order
            .iter()
            .position(|n| n == name)
            .unwrap_or_else(|| panic!("{} missing from {:?}", name, order))
    }

    fn diamond() -> DependencyGraph {
        graph(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])])
    }

    fn ingress_stack() -> DependencyGraph {
        graph(&[
            ("load-balancer", &[]),
            ("nginx-ingress", &["load-balancer"]),
            ("ingress", &["nginx-ingress", "load-balancer"]),
        ])
    }

    // ========================================================================
    // Graph construction
    // ========================================================================

    #[test]
    fn test_placeholder_created_for_unknown_dependency() {
        let g = graph(&[("b", &["a"])]);
        assert!(g.contains("a"));
        assert!(!g.is_registered("a"));
        assert!(g.is_registered("b"));
        assert_eq!(g.dependents("a"), vec!["b"]);
    }

    #[test]
    fn test_reregistering_replaces_dependencies() {
        let mut g = graph(&[("a", &[]), ("c", &[]), ("b", &["a"])]);
        g.add_plugin(plugin("b", &["c"]));
        assert_eq!(g.dependencies("b"), vec!["c"]);
        assert!(g.dependents("a").is_empty());
        assert_eq!(g.dependents("c"), vec!["b"]);
    }

    #[test]
    fn test_registering_twice_is_idempotent() {
        let mut g = diamond();
        let before: Vec<(String, Vec<String>, Vec<String>)> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| (n.to_string(), g.dependencies(n), g.dependents(n)))
            .collect();

        g.add_plugin(plugin("d", &["b", "c"]));
        g.add_plugin(plugin("a", &[]));

        let after: Vec<(String, Vec<String>, Vec<String>)> = ["a", "b", "c", "d"]
            .iter()
            .map(|n| (n.to_string(), g.dependencies(n), g.dependents(n)))
            .collect();
        assert_eq!(before, after);
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn test_duplicate_dependency_declared_once() {
        let g = graph(&[("a", &[]), ("b", &["a", "a"])]);
        assert_eq!(g.dependencies("b"), vec!["a"]);
        assert_eq!(g.install_order(&["b"]).unwrap(), vec!["a", "b"]);
    }

    // ========================================================================
    // Install order
    // ========================================================================

    #[test]
    fn test_install_order_diamond() {
        let order = diamond().install_order(&["d"]).unwrap();
        assert_eq!(order.len(), 4);
        assert!(position(&order, "a") < position(&order, "b"));
        assert!(position(&order, "a") < position(&order, "c"));
        assert!(position(&order, "b") < position(&order, "d"));
        assert!(position(&order, "c") < position(&order, "d"));
    }

    #[test]
    fn test_install_order_only_includes_closure() {
        let g = graph(&[("a", &[]), ("b", &["a"]), ("unrelated", &[])]);
        assert_eq!(g.install_order(&["b"]).unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_install_order_multiple_targets_shared_dependency() {
        let order = diamond().install_order(&["b", "c"]).unwrap();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0], "a");
    }

    #[test]
    fn test_install_order_empty_targets() {
        let order = diamond().install_order::<&str>(&[]).unwrap();
        assert!(order.is_empty());
    }

    #[test]
    fn test_install_order_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]);
        let err = g.install_order(&["a"]).unwrap_err();
        assert!(matches!(err, GraphError::CircularDependency(_)));
    }

    #[test]
    fn test_install_order_self_dependency() {
        let g = graph(&[("a", &["a"])]);
        assert_eq!(
            g.install_order(&["a"]).unwrap_err(),
            GraphError::CircularDependency("a".into())
        );
    }

    #[test]
    fn test_cycle_outside_closure_is_ignored() {
        let g = graph(&[("a", &[]), ("x", &["y"]), ("y", &["x"])]);
        assert_eq!(g.install_order(&["a"]).unwrap(), vec!["a"]);
        assert!(g.has_cycles());
    }

    #[test]
    fn test_install_order_unregistered_dependency() {
        let g = graph(&[("b", &["typo"])]);
        assert_eq!(
            g.install_order(&["b"]).unwrap_err(),
            GraphError::PluginNotFound("typo".into())
        );
    }

    #[test]
    fn test_install_order_unknown_target() {
        assert_eq!(
            diamond().install_order(&["nope"]).unwrap_err(),
            GraphError::PluginNotFound("nope".into())
        );
    }

    // ========================================================================
    // Uninstall order
    // ========================================================================

    #[test]
    fn test_uninstall_order_dependents_first() {
        let order = ingress_stack().uninstall_order(&["load-balancer"]).unwrap();
        assert_eq!(order, vec!["ingress", "nginx-ingress", "load-balancer"]);
    }

    #[test]
    fn test_uninstall_order_leaf_only() {
        let order = diamond().uninstall_order(&["d"]).unwrap();
        assert_eq!(order, vec!["d"]);
    }

    #[test]
    fn test_uninstall_order_diamond_root() {
        let order = diamond().uninstall_order(&["a"]).unwrap();
        assert_eq!(order.len(), 4);
        assert_eq!(order[0], "d");
        assert_eq!(order[3], "a");
    }

    #[test]
    fn test_uninstall_order_cycle() {
        let g = graph(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(
            g.uninstall_order(&["a"]).unwrap_err(),
            GraphError::CircularDependency(_)
        ));
    }

    #[test]
    fn test_uninstall_order_placeholder_target() {
        let g = graph(&[("b", &["a"])]);
        assert_eq!(
            g.uninstall_order(&["a"]).unwrap_err(),
            GraphError::PluginNotFound("a".into())
        );
    }

    #[test]
    fn test_install_and_uninstall_orders_respect_every_edge() {
        // Small deterministic generator for acyclic declaration sets:
        // plugin i may only depend on plugins with a lower index.
        let mut seed: u64 = 0x5eed;
        let mut next = move || {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (seed >> 33) as usize
        };

        for _ in 0..50 {
            let count = 2 + next() % 8;
            let names: Vec<String> = (0..count).map(|i| format!("p{}", i)).collect();
            let mut g = DependencyGraph::new();
            for i in 0..count {
                let deps: Vec<&str> = (0..i)
                    .filter(|_| next() % 3 == 0)
                    .map(|j| names[j].as_str())
                    .collect();
                g.add_plugin(plugin(&names[i], &deps));
            }

            let targets: Vec<&str> = names.iter().map(String::as_str).collect();
            let install = g.install_order(&targets).unwrap();
            let uninstall = g.uninstall_order(&targets).unwrap();
            assert_eq!(install.len(), count);
            assert_eq!(uninstall.len(), count);

            for a in &names {
                for b in g.dependencies(a) {
                    assert!(position(&install, &b) < position(&install, a));
                    assert!(position(&uninstall, a) < position(&uninstall, &b));
                }
            }
        }
    }

    // ========================================================================
    // Direct validation
    // ========================================================================

    #[test]
    fn test_validate_install_direct_only() {
        let g = diamond();
        // d's direct deps are b and c; a being absent is not checked here
        assert!(g.validate_install("d", &installed(&["b", "c"])).is_ok());
        assert_eq!(
            g.validate_install("d", &installed(&["b"])).unwrap_err(),
            GraphError::UnmetDependency {
                plugin: "d".into(),
                dependency: "c".into()
            }
        );
    }

    #[test]
    fn test_validate_uninstall_blocked() {
        let g = ingress_stack();
        let err = g
            .validate_uninstall("load-balancer", &installed(&["load-balancer", "ingress"]))
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::BlockedByDependents {
                plugin: "load-balancer".into(),
                dependents: vec!["ingress".into()],
            }
        );
        assert!(err.to_string().contains("still required by ingress"));
    }

    #[test]
    fn test_has_cycles() {
        assert!(!diamond().has_cycles());
        assert!(graph(&[("a", &["b"]), ("b", &["c"]), ("c", &["a"])]).has_cycles());
        assert!(!DependencyGraph::new().has_cycles());
    }

    // ========================================================================
    // Validator
    // ========================================================================

    #[test]
    fn test_validate_installation_skips_installed() {
        let v = DependencyValidator::new(diamond());
        let plan = v
            .validate_installation(&["d"], &installed(&["a", "b"]))
            .unwrap();
        assert_eq!(plan, vec!["c", "d"]);
    }

    #[test]
    fn test_validate_installation_everything_installed() {
        let v = DependencyValidator::new(diamond());
        let plan = v
            .validate_installation(&["d"], &installed(&["a", "b", "c", "d"]))
            .unwrap();
        assert!(plan.is_empty());
    }

    #[test]
    fn test_validate_installation_empty_snapshot() {
        let v = DependencyValidator::new(diamond());
        let plan = v.validate_installation(&["d"], &HashSet::new()).unwrap();
        assert_eq!(plan.len(), 4);
        assert_eq!(plan[0], "a");
        assert_eq!(plan[3], "d");
    }

    #[test]
    fn test_validate_installation_cycle_produces_nothing() {
        let v = DependencyValidator::new(graph(&[("a", &["b"]), ("b", &["a"])]));
        assert!(matches!(
            v.validate_installation(&["a"], &HashSet::new()),
            Err(GraphError::CircularDependency(_))
        ));
    }

    #[test]
    fn test_validate_uninstallation_ingress_stack() {
        let v = DependencyValidator::new(ingress_stack());
        let plan = v
            .validate_uninstallation(
                &["load-balancer"],
                &installed(&["load-balancer", "nginx-ingress", "ingress"]),
            )
            .unwrap();
        assert_eq!(plan, vec!["ingress", "nginx-ingress", "load-balancer"]);
    }

    #[test]
    fn test_validate_uninstallation_skips_not_installed() {
        let v = DependencyValidator::new(ingress_stack());
        let plan = v
            .validate_uninstallation(&["load-balancer"], &installed(&["load-balancer", "ingress"]))
            .unwrap();
        assert_eq!(plan, vec!["ingress", "load-balancer"]);
    }

    #[test]
    fn test_validate_uninstallation_dependents_scheduled_earlier() {
        let v = DependencyValidator::new(diamond());
        let snapshot = installed(&["a", "b", "c", "d"]);
        let plan = v.validate_uninstallation(&["a"], &snapshot).unwrap();

        for (i, name) in plan.iter().enumerate() {
            for dependent in v.graph().dependents(name) {
                if snapshot.contains(&dependent) {
                    assert!(position(&plan, &dependent) < i);
                }
            }
        }
    }

    #[test]
    fn test_dependency_info() {
        let v = DependencyValidator::new(diamond());
        let info = v.dependency_info("b");
        assert_eq!(info.dependencies, vec!["a"]);
        assert_eq!(info.dependents, vec!["d"]);

        let unknown = v.dependency_info("zzz");
        assert!(unknown.dependencies.is_empty());
        assert!(unknown.dependents.is_empty());
    }

    #[test]
    fn test_from_registry() {
        let registry = PluginRegistry::new()
            .with(PluginDescriptor::new("a", "ns", ChartRef::new("r", "a")))
            .unwrap()
            .with(PluginDescriptor::new("b", "ns", ChartRef::new("r", "b")).depends_on(["a"]))
            .unwrap();
        let v = DependencyValidator::from_registry(&registry);
        assert_eq!(
            v.validate_installation(&["b"], &HashSet::new()).unwrap(),
            vec!["a", "b"]
        );
    }
}
