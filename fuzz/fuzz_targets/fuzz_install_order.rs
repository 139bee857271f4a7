#![no_main]

use clusterplug::graph::{DependencyGraph, GraphError};
use clusterplug::plugin::{ChartRef, PluginDescriptor};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

const NAMES: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

// Each byte pair declares "plugin x depends on plugin y". The low bit of the
// first byte decides whether x is registered at all.
fuzz_target!(|data: &[u8]| {
    let mut deps: Vec<Vec<&str>> = vec![Vec::new(); NAMES.len()];
    let mut registered = [true; NAMES.len()];
    for pair in data.chunks_exact(2) {
        let from = (pair[0] >> 1) as usize % NAMES.len();
        let to = pair[1] as usize % NAMES.len();
        if pair[0] & 1 == 1 && from != 0 {
            registered[from] = false;
        }
        deps[from].push(NAMES[to]);
    }

    let mut graph = DependencyGraph::new();
    for (i, name) in NAMES.iter().enumerate() {
        if registered[i] {
            let plugin = PluginDescriptor::new(*name, "default", ChartRef::new("https://charts", *name))
                .depends_on(deps[i].iter().copied());
            graph.add_plugin(Arc::new(plugin));
        }
    }

    match graph.install_order(&["a"]) {
        Ok(order) => {
            let position = |n: &str| order.iter().position(|o| o == n);
            for name in &order {
                let at = position(name).unwrap();
                for dep in graph.dependencies(name) {
                    let dep_at = position(&dep).expect("dependency missing from order");
                    assert!(dep_at < at, "{dep} must precede {name}");
                }
            }
            assert!(!graph.has_cycles() || order.len() < NAMES.len());
        }
        Err(GraphError::CircularDependency(_)) | Err(GraphError::PluginNotFound(_)) => {}
        Err(other) => panic!("unexpected error: {other}"),
    }
});
