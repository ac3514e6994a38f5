//! Dependency ordering for revisions and tables
//!
//! Both the revision chain (parents before children) and autogenerated DDL
//! (referenced tables before referencing tables) are a topological sort over
//! named nodes. The sort is stable: among nodes that are ready at the same
//! time, the one given first wins, so output is deterministic.

use std::collections::{BTreeSet, HashMap};

/// A named node and the names it depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub dependencies: Vec<String>,
}

impl Node {
    pub fn new(name: impl Into<String>, dependencies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            dependencies,
        }
    }
}

/// Sort `nodes` so every node follows its dependencies.
///
/// Dependencies that are not in `nodes` are ignored (they are satisfied
/// elsewhere, e.g. a table that already exists). On a cycle, returns the
/// names of the nodes that could not be ordered.
pub fn topological_sort(nodes: &[Node]) -> Result<Vec<String>, Vec<String>> {
    let index: HashMap<&str, usize> = nodes
        .iter()
        .enumerate()
        .map(|(i, n)| (n.name.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let deps: BTreeSet<usize> = node
            .dependencies
            .iter()
            .filter_map(|d| index.get(d.as_str()).copied())
            .filter(|&d| d != i)
            .collect();
        in_degree[i] = deps.len();
        for d in deps {
            dependents[d].push(i);
        }
    }

    // ordered by input position for stability
    let mut ready: BTreeSet<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut result = Vec::with_capacity(nodes.len());

    while let Some(current) = ready.pop_first() {
        result.push(nodes[current].name.clone());
        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if result.len() != nodes.len() {
        let placed: BTreeSet<&String> = result.iter().collect();
        let stuck = nodes
            .iter()
            .filter(|n| !placed.contains(&n.name))
            .map(|n| n.name.clone())
            .collect();
        return Err(stuck);
    }

    Ok(result)
}

/// Dependencies that name no node in `nodes`
pub fn missing_dependencies(nodes: &[Node]) -> Vec<(String, String)> {
    let names: BTreeSet<&str> = nodes.iter().map(|n| n.name.as_str()).collect();
    nodes
        .iter()
        .flat_map(|n| {
            n.dependencies
                .iter()
                .filter(|d| !names.contains(d.as_str()))
                .map(move |d| (n.name.clone(), d.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, deps: &[&str]) -> Node {
        Node::new(name, deps.iter().map(|d| d.to_string()).collect())
    }

    #[test]
    fn test_topological_sort_simple() {
        let nodes = vec![
            node("order_items", &["orders", "wine_batches"]),
            node("orders", &["customers"]),
            node("customers", &[]),
            node("wine_batches", &["suppliers"]),
            node("suppliers", &[]),
        ];
        let sorted = topological_sort(&nodes).unwrap();
        let pos = |n: &str| sorted.iter().position(|s| s == n).unwrap();
        assert!(pos("customers") < pos("orders"));
        assert!(pos("orders") < pos("order_items"));
        assert!(pos("suppliers") < pos("wine_batches"));
        assert!(pos("wine_batches") < pos("order_items"));
    }

    #[test]
    fn test_sort_is_stable() {
        let nodes = vec![node("b", &[]), node("a", &[]), node("c", &["a"])];
        assert_eq!(topological_sort(&nodes).unwrap(), vec!["b", "a", "c"]);
    }

    #[test]
    fn test_cycle_reports_members() {
        let nodes = vec![node("a", &["b"]), node("b", &["a"]), node("c", &[])];
        let stuck = topological_sort(&nodes).unwrap_err();
        assert_eq!(stuck, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_missing_dependencies() {
        let nodes = vec![node("wine_inventory", &["wine_batches"])];
        assert_eq!(
            missing_dependencies(&nodes),
            vec![("wine_inventory".to_string(), "wine_batches".to_string())]
        );
    }
}
