//! Parsed task-graph nodes.
//!
//! A composed task is handed to the engine as a tree of [`GraphNode`]s. The
//! textual DSL that produces this tree lives elsewhere; the engine only knows
//! the node shapes. Trees can also be deserialized from a definition file:
//!
//! ```yaml
//! type: sequence
//! children:
//!   - type: task
//!     name: extract
//!   - type: split
//!     branches:
//!       - { type: task, name: clean, label: clean-a }
//!       - { type: task, name: clean, label: clean-b }
//!   - type: label
//!     name: again
//!     target: clean-a
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A node of a parsed composed-task graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GraphNode {
    /// Launch one task definition.
    Task {
        /// Name of the task definition to launch.
        name: String,
        /// Optional label, unique within the graph.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        /// Deployment properties passed with the launch.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, String>,
        /// Command-line arguments passed with the launch.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        arguments: Vec<String>,
    },

    /// Children run one after another, in document order.
    Sequence { children: Vec<GraphNode> },

    /// Branches run concurrently with no ordering among them.
    Split { branches: Vec<GraphNode> },

    /// Named reference to another labelled node.
    Label { name: String, target: String },
}

impl GraphNode {
    /// A task node with no label, properties or arguments.
    pub fn task(name: impl Into<String>) -> Self {
        GraphNode::Task {
            name: name.into(),
            label: None,
            properties: BTreeMap::new(),
            arguments: Vec::new(),
        }
    }

    /// A task node carrying a label.
    pub fn labelled(label: impl Into<String>, name: impl Into<String>) -> Self {
        GraphNode::task(name).with_label(label)
    }

    pub fn sequence(children: impl IntoIterator<Item = GraphNode>) -> Self {
        GraphNode::Sequence {
            children: children.into_iter().collect(),
        }
    }

    pub fn split(branches: impl IntoIterator<Item = GraphNode>) -> Self {
        GraphNode::Split {
            branches: branches.into_iter().collect(),
        }
    }

    /// A reference node that runs whatever `target` labels.
    pub fn label(name: impl Into<String>, target: impl Into<String>) -> Self {
        GraphNode::Label {
            name: name.into(),
            target: target.into(),
        }
    }

    /// Set the label of a task node. Other node kinds are returned unchanged.
    pub fn with_label(mut self, value: impl Into<String>) -> Self {
        if let GraphNode::Task { label, .. } = &mut self {
            *label = Some(value.into());
        }
        self
    }

    /// Add a deployment property to a task node.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let GraphNode::Task { properties, .. } = &mut self {
            properties.insert(key.into(), value.into());
        }
        self
    }

    /// Add a command-line argument to a task node.
    pub fn with_argument(mut self, arg: impl Into<String>) -> Self {
        if let GraphNode::Task { arguments, .. } = &mut self {
            arguments.push(arg.into());
        }
        self
    }

    /// Short kind name, used in log fields and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            GraphNode::Task { .. } => "task",
            GraphNode::Sequence { .. } => "sequence",
            GraphNode::Split { .. } => "split",
            GraphNode::Label { .. } => "label",
        }
    }

    /// Number of task nodes in this subtree, not following label references.
    pub fn task_count(&self) -> usize {
        match self {
            GraphNode::Task { .. } => 1,
            GraphNode::Sequence { children } => children.iter().map(GraphNode::task_count).sum(),
            GraphNode::Split { branches } => branches.iter().map(GraphNode::task_count).sum(),
            GraphNode::Label { .. } => 0,
        }
    }
}
