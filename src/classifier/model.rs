//! Decision tree and forest structures as consumed by the classifier.
//!
//! A forest document is a JSON array of trees. Each tree lists its nodes with
//! the root first:
//!
//! ```json
//! [{"nodes": [
//!     {"feature": 20, "threshold": 1500000.0, "left": 1, "right": 2},
//!     {"label": 0},
//!     {"label": 1}
//! ]}]
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FlowGuardError, Result};
use crate::processor::FEATURE_VECTOR_LEN;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// `feature <= threshold` descends left, anything else right.
    Internal { feature: usize, threshold: f64, left: usize, right: usize },
    Leaf { label: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<TreeNode>,
}

impl DecisionTree {
    pub fn new(nodes: Vec<TreeNode>) -> Result<Self> {
        let tree = Self { nodes };
        tree.validate()?;
        Ok(tree)
    }

    pub fn nodes(&self) -> &[TreeNode] {
        &self.nodes
    }

    /// Children must point forward inside the node list, which rules out cycles.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(FlowGuardError::ModelFormat("tree has no nodes".into()));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Internal { feature, threshold, left, right } = *node {
                if feature >= FEATURE_VECTOR_LEN {
                    return Err(FlowGuardError::ModelFormat(format!(
                        "node {i}: feature index {feature} out of range (< {FEATURE_VECTOR_LEN})"
                    )));
                }
                if threshold.is_nan() {
                    return Err(FlowGuardError::ModelFormat(format!("node {i}: threshold is NaN")));
                }
                for child in [left, right] {
                    if child <= i || child >= self.nodes.len() {
                        return Err(FlowGuardError::ModelFormat(format!(
                            "node {i}: child {child} must be in ({i}, {})",
                            self.nodes.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Walks from the root to a leaf. `None` only for a tree that skipped validation.
    pub fn evaluate(&self, features: &[f64]) -> Option<i32> {
        let mut idx = 0;
        for _ in 0..self.nodes.len() {
            match self.nodes.get(idx)? {
                TreeNode::Leaf { label } => return Some(*label),
                TreeNode::Internal { feature, threshold, left, right } => {
                    let value = *features.get(*feature)?;
                    idx = if value <= *threshold { *left } else { *right };
                }
            }
        }
        None
    }
}

/// Ordered collection of independently trained trees.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Forest {
    pub trees: Vec<DecisionTree>,
}

impl Forest {
    pub fn new(trees: Vec<DecisionTree>) -> Result<Self> {
        let forest = Self { trees };
        forest.validate()?;
        Ok(forest)
    }

    pub fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            return Err(FlowGuardError::ModelFormat("forest has no trees".into()));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate()
                .map_err(|e| FlowGuardError::ModelFormat(format!("tree {i}: {e}")))?;
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(json)?;
        Self::from_value(doc)
    }

    pub fn from_value(doc: Value) -> Result<Self> {
        let Value::Array(items) = doc else {
            return Err(FlowGuardError::ModelFormat("forest is not an array of trees".into()));
        };
        let trees = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                serde_json::from_value::<DecisionTree>(item)
                    .map_err(|e| FlowGuardError::ModelFormat(format!("tree {i}: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(trees)
    }
}
