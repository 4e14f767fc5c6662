// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Context-graph types and the pluggable slice / pack services.

use crate::ContextError;
use async_trait::async_trait;
use thermal_policy::Workload;

/// Per-request thermal bounds attached to a [`SliceRecipe`].
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ThermalConstraints {
    /// Reject the call when the current temperature is above this.
    pub max_temperature: Option<f64>,
    /// Overrides the service's rapid-increase threshold.
    pub rapid_increase_threshold: Option<f64>,
}

/// What to slice out of the context graph, and how much of it.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SliceRecipe {
    /// Node ids the slice grows from.
    pub anchors: Vec<String>,
    pub max_depth: u32,
    pub max_nodes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thermal_constraints: Option<ThermalConstraints>,
}

impl SliceRecipe {
    pub fn new(max_depth: u32, max_nodes: u32) -> Self {
        Self {
            anchors: Vec::new(),
            max_depth,
            max_nodes,
            thermal_constraints: None,
        }
    }

    pub fn with_anchor(mut self, anchor: impl Into<String>) -> Self {
        self.anchors.push(anchor.into());
        self
    }

    pub fn with_constraints(mut self, constraints: ThermalConstraints) -> Self {
        self.thermal_constraints = Some(constraints);
        self
    }

    /// The recipe's bounds as a policy workload.
    pub fn workload(&self) -> Workload {
        Workload::new(self.max_depth, self.max_nodes)
    }
}

/// A node of a context subgraph.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ContextNode {
    pub id: String,
    /// Hops from the nearest anchor.
    pub depth: u32,
    pub content: String,
}

/// A directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ContextEdge {
    pub from: String,
    pub to: String,
}

/// A bounded piece of the context graph.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Subgraph {
    pub nodes: Vec<ContextNode>,
    pub edges: Vec<ContextEdge>,
}

impl Subgraph {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Deepest node depth, 0 for an empty subgraph.
    pub fn depth(&self) -> u32 {
        self.nodes.iter().map(|n| n.depth).max().unwrap_or(0)
    }
}

/// Output of a slice delegate.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SliceResult {
    pub subgraph: Subgraph,
    /// The delegate stopped at a limit before exhausting the graph.
    pub truncated: bool,
}

impl SliceResult {
    /// The zero-filled result returned for rejected calls.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// How a subgraph is rendered into a context window.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct PackOptions {
    /// Upper bound on the packed size, in tokens.
    pub token_budget: usize,
    /// Include node ids and edges alongside the content.
    pub include_structure: bool,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            token_budget: 4096,
            include_structure: false,
        }
    }
}

/// A packed context window.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PackedContext {
    pub content: String,
    pub token_count: usize,
    pub node_count: usize,
}

impl PackedContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.node_count == 0
    }
}

/// Slices a bounded subgraph out of the context graph.
#[async_trait]
pub trait ContextSliceService: Send + Sync {
    async fn slice(&self, recipe: SliceRecipe) -> Result<SliceResult, ContextError>;
}

/// Packs a subgraph into a context window.
#[async_trait]
pub trait ContextPackService: Send + Sync {
    async fn pack(
        &self,
        subgraph: Subgraph,
        options: PackOptions,
    ) -> Result<PackedContext, ContextError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, depth: u32) -> ContextNode {
        ContextNode {
            id: id.into(),
            depth,
            content: format!("content of {id}"),
        }
    }

    #[test]
    fn test_recipe_builder() {
        let r = SliceRecipe::new(5, 50)
            .with_anchor("fn:main")
            .with_constraints(ThermalConstraints {
                max_temperature: Some(85.0),
                ..Default::default()
            });
        assert_eq!(r.anchors, vec!["fn:main".to_string()]);
        assert_eq!(r.workload(), Workload::new(5, 50));
        assert_eq!(r.thermal_constraints.unwrap().max_temperature, Some(85.0));
    }

    #[test]
    fn test_subgraph_shape() {
        let g = Subgraph {
            nodes: vec![node("a", 0), node("b", 1), node("c", 2)],
            edges: vec![ContextEdge {
                from: "a".into(),
                to: "b".into(),
            }],
        };
        assert_eq!(g.node_count(), 3);
        assert_eq!(g.depth(), 2);
        assert!(!g.is_empty());
        assert!(Subgraph::empty().is_empty());
        assert_eq!(Subgraph::empty().depth(), 0);
    }

    #[test]
    fn test_recipe_json_without_constraints() {
        let json = r#"{"anchors":["x"],"max_depth":3,"max_nodes":10}"#;
        let r: SliceRecipe = serde_json::from_str(json).unwrap();
        assert_eq!(r.thermal_constraints, None);
        let back = serde_json::to_string(&r).unwrap();
        assert!(!back.contains("thermal_constraints"));
    }

    #[test]
    fn test_empty_pack() {
        assert!(PackedContext::empty().is_empty());
        assert_eq!(PackOptions::default().token_budget, 4096);
    }
}
