//! Directed acyclic graph over field names

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, SynthError};

/// Parent lists keyed by child field
///
/// An edge `parent -> child` means the child's table is indexed by the
/// parent's value. Serialized as a JSON object `{child: [parents...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphStructure {
    parents: BTreeMap<String, Vec<String>>,
}

impl GraphStructure {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(child, parents)` pairs
    #[must_use]
    pub fn from_edges(edges: &[(&str, &[&str])]) -> Self {
        let mut structure = Self::new();
        for (child, parents) in edges {
            structure.add_node(child, parents.iter().map(|p| (*p).to_string()).collect());
        }
        structure
    }

    /// Declare `field` with its ordered parents, replacing any previous entry
    pub fn add_node(&mut self, field: &str, parents: Vec<String>) {
        self.parents.insert(field.to_string(), parents);
    }

    /// Ordered parents of `field`; empty for roots and unknown fields
    #[must_use]
    pub fn parents_of(&self, field: &str) -> &[String] {
        self.parents.get(field).map_or(&[], Vec::as_slice)
    }

    /// Every field mentioned as a child or a parent
    #[must_use]
    pub fn nodes(&self) -> BTreeSet<&str> {
        self.parents
            .iter()
            .flat_map(|(child, parents)| {
                std::iter::once(child.as_str()).chain(parents.iter().map(String::as_str))
            })
            .collect()
    }

    /// Copy of this structure in which every field of `fields` is a node
    ///
    /// Fields without a declared entry become parentless roots.
    #[must_use]
    pub fn completed(&self, fields: &[String]) -> Self {
        let mut structure = self.clone();
        for field in fields {
            structure.parents.entry(field.clone()).or_default();
        }
        structure
    }

    /// Check that every node is a known field and that the graph is acyclic
    pub fn validate(&self, fields: &[String]) -> Result<()> {
        if let Some(unknown) = self
            .nodes()
            .into_iter()
            .find(|node| !fields.iter().any(|f| f == node))
        {
            return Err(SynthError::UnknownField(unknown.to_string()));
        }
        for (child, parents) in &self.parents {
            let distinct: BTreeSet<&String> = parents.iter().collect();
            if distinct.len() != parents.len() {
                return Err(SynthError::validation(format!(
                    "field {child} lists a parent more than once"
                )));
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Nodes ordered so every parent precedes its children
    ///
    /// Kahn's algorithm; among ready nodes the smallest name goes first, so
    /// the order is deterministic. A cycle fails with the fields on it.
    pub fn topological_order(&self) -> Result<Vec<String>> {
        let nodes = self.nodes();
        let mut in_degree: BTreeMap<&str, usize> = nodes.iter().map(|n| (*n, 0)).collect();
        let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (child, parents) in &self.parents {
            for parent in parents {
                *in_degree.entry(child.as_str()).or_default() += 1;
                children
                    .entry(parent.as_str())
                    .or_default()
                    .push(child.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(node, _)| *node)
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some(node) = ready.pop_first() {
            order.push(node.to_string());
            for &child in children.get(node).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(child);
                    }
                }
            }
        }

        if order.len() < nodes.len() {
            let cyclic = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(node, _)| node.to_string())
                .collect();
            return Err(SynthError::DisconnectedStructure(cyclic));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| (*n).to_string()).collect()
    }

    #[test]
    fn test_parents_precede_children() {
        let structure = GraphStructure::from_edges(&[
            ("income", &["age", "sex"]),
            ("sex", &[]),
            ("age", &[]),
            ("vehicles", &["income"]),
        ]);
        let order = structure.topological_order().unwrap();
        assert_eq!(order, vec!["age", "sex", "income", "vehicles"]);
    }

    #[test]
    fn test_cycle_detected() {
        let structure = GraphStructure::from_edges(&[("a", &["b"]), ("b", &["a"]), ("c", &[])]);
        match structure.validate(&fields(&["a", "b", "c"])) {
            Err(SynthError::DisconnectedStructure(cycle)) => assert_eq!(cycle, vec!["a", "b"]),
            other => panic!("expected DisconnectedStructure, got {other:?}"),
        }
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let structure = GraphStructure::from_edges(&[("a", &["a"])]);
        assert!(matches!(
            structure.topological_order(),
            Err(SynthError::DisconnectedStructure(_))
        ));
    }

    #[test]
    fn test_unknown_parent_rejected() {
        let structure = GraphStructure::from_edges(&[("income", &["agep"])]);
        match structure.validate(&fields(&["income", "age"])) {
            Err(SynthError::UnknownField(name)) => assert_eq!(name, "agep"),
            other => panic!("expected UnknownField, got {other:?}"),
        }
    }

    #[test]
    fn test_completed_adds_roots() {
        let structure = GraphStructure::from_edges(&[("sex", &["age"])]);
        let completed = structure.completed(&fields(&["age", "sex", "employment"]));
        assert_eq!(completed.nodes().len(), 3);
        assert!(completed.parents_of("employment").is_empty());
    }

    #[test]
    fn test_json_shape() {
        let structure: GraphStructure =
            serde_json::from_str(r#"{"age": [], "sex": ["age"]}"#).unwrap();
        assert_eq!(structure.parents_of("sex"), ["age".to_string()]);
    }
}
