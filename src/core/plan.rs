//! Graph compilation into an execution plan.
//!
//! [`compile`] walks a [`GraphNode`] tree once and produces an immutable
//! [`ExecutionPlan`] whose shape mirrors the tree: sequences stay in document
//! order, split branches keep no meaningful order, and label references are
//! expanded into launch directives for the task they point at.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use super::graph::GraphNode;
use super::types::NodeRef;

/// Structural problems that make a graph impossible to run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedGraphError {
    /// A label node points at a label nobody defines.
    #[error("label '{label}' references undefined target '{target}'")]
    UndefinedTarget { label: String, target: String },

    /// Label references loop back on themselves.
    #[error("cyclic label reference: {}", .0.join(" -> "))]
    CyclicReference(Vec<String>),

    /// The same label is defined more than once.
    #[error("duplicate label: {0}")]
    DuplicateLabel(String),

    /// A sequence with no children.
    #[error("sequence has no children")]
    EmptySequence,

    /// A split with no branches.
    #[error("split has no branches")]
    EmptySplit,

    /// A task node with an empty name.
    #[error("task name must not be empty")]
    EmptyTaskName,
}

/// A single launch of one task definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchDirective {
    /// Step identifier, unique within the plan.
    pub step: NodeRef,
    /// Task definition to launch.
    pub task_name: String,
    /// Label the step was declared or referenced with.
    pub label: Option<String>,
    /// Deployment properties from the graph.
    pub properties: BTreeMap<String, String>,
    /// Command-line arguments from the graph.
    pub arguments: Vec<String>,
}

impl LaunchDirective {
    /// Key used to look up per-step configuration: the label, else the task name.
    pub fn config_key(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.task_name)
    }
}

/// Entries executed strictly in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequencePlan {
    pub node: NodeRef,
    pub entries: Vec<PlanEntry>,
}

/// Entries executed concurrently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitPlan {
    pub node: NodeRef,
    pub branches: Vec<Arc<PlanEntry>>,
}

/// One entry of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanEntry {
    Launch(LaunchDirective),
    Sequence(SequencePlan),
    Split(SplitPlan),
}

impl PlanEntry {
    /// Reference of the node this entry was compiled from.
    pub fn node(&self) -> &NodeRef {
        match self {
            PlanEntry::Launch(directive) => &directive.step,
            PlanEntry::Sequence(seq) => &seq.node,
            PlanEntry::Split(split) => &split.node,
        }
    }

    /// Number of launch directives reachable from this entry.
    pub fn step_count(&self) -> usize {
        match self {
            PlanEntry::Launch(_) => 1,
            PlanEntry::Sequence(seq) => seq.entries.iter().map(PlanEntry::step_count).sum(),
            PlanEntry::Split(split) => split.branches.iter().map(|b| b.step_count()).sum(),
        }
    }

    /// Deepest nesting of splits below and including this entry.
    pub fn split_depth(&self) -> usize {
        match self {
            PlanEntry::Launch(_) => 0,
            PlanEntry::Sequence(seq) => seq
                .entries
                .iter()
                .map(PlanEntry::split_depth)
                .max()
                .unwrap_or(0),
            PlanEntry::Split(split) => {
                1 + split
                    .branches
                    .iter()
                    .map(|b| b.split_depth())
                    .max()
                    .unwrap_or(0)
            }
        }
    }

    fn collect_steps<'a>(&'a self, out: &mut Vec<&'a LaunchDirective>) {
        match self {
            PlanEntry::Launch(directive) => out.push(directive),
            PlanEntry::Sequence(seq) => seq.entries.iter().for_each(|e| e.collect_steps(out)),
            PlanEntry::Split(split) => split.branches.iter().for_each(|b| b.collect_steps(out)),
        }
    }
}

/// Compiler bookkeeping, kept for deterministic debug output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceMarker {
    EnterSequence(NodeRef),
    ExitSequence(NodeRef),
    EnterSplit(NodeRef),
    SplitBoundary(NodeRef),
    Step(NodeRef),
}

/// The compiled, immutable form of a composed-task graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    root: PlanEntry,
    trace: Vec<TraceMarker>,
}

impl ExecutionPlan {
    /// Root entry of the plan.
    pub fn root(&self) -> &PlanEntry {
        &self.root
    }

    /// Top-level entries in execution order.
    pub fn entries(&self) -> &[PlanEntry] {
        match &self.root {
            PlanEntry::Sequence(seq) => &seq.entries,
            other => std::slice::from_ref(other),
        }
    }

    /// Traversal markers recorded while compiling.
    pub fn trace(&self) -> &[TraceMarker] {
        &self.trace
    }

    /// Total number of launch directives.
    pub fn step_count(&self) -> usize {
        self.root.step_count()
    }

    /// Deepest split nesting in the plan.
    pub fn max_split_depth(&self) -> usize {
        self.root.split_depth()
    }

    /// Every launch directive, in compile order.
    pub fn steps(&self) -> Vec<&LaunchDirective> {
        let mut out = Vec::new();
        self.root.collect_steps(&mut out);
        out
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn write_entry(f: &mut fmt::Formatter<'_>, entry: &PlanEntry, depth: usize) -> fmt::Result {
            let indent = "  ".repeat(depth);
            match entry {
                PlanEntry::Launch(d) => {
                    write!(f, "{}- {} ({})", indent, d.step, d.task_name)?;
                    if !d.arguments.is_empty() {
                        write!(f, " args={:?}", d.arguments)?;
                    }
                    writeln!(f)
                }
                PlanEntry::Sequence(seq) => {
                    writeln!(f, "{}{}:", indent, seq.node)?;
                    seq.entries
                        .iter()
                        .try_for_each(|e| write_entry(f, e, depth + 1))
                }
                PlanEntry::Split(split) => {
                    writeln!(f, "{}{} (parallel):", indent, split.node)?;
                    split
                        .branches
                        .iter()
                        .try_for_each(|b| write_entry(f, b, depth + 1))
                }
            }
        }
        write_entry(f, &self.root, 0)
    }
}

/// Compile a graph into an execution plan.
///
/// Fails before anything is launched if the graph is malformed.
pub fn compile(root: &GraphNode) -> Result<ExecutionPlan, MalformedGraphError> {
    let mut compiler = Compiler::default();
    compiler.collect_definitions(root)?;
    let root = compiler.visit(root)?;
    Ok(ExecutionPlan {
        root,
        trace: compiler.trace,
    })
}

#[derive(Default)]
struct Compiler<'g> {
    definitions: HashMap<&'g str, &'g GraphNode>,
    occurrences: HashMap<String, usize>,
    taken: HashSet<String>,
    sequences: usize,
    splits: usize,
    trace: Vec<TraceMarker>,
}

impl<'g> Compiler<'g> {
    fn collect_definitions(&mut self, node: &'g GraphNode) -> Result<(), MalformedGraphError> {
        let defined = match node {
            GraphNode::Task {
                label: Some(label), ..
            } => Some(label.as_str()),
            GraphNode::Label { name, .. } => Some(name.as_str()),
            GraphNode::Sequence { children } => {
                return children
                    .iter()
                    .try_for_each(|c| self.collect_definitions(c));
            }
            GraphNode::Split { branches } => {
                return branches
                    .iter()
                    .try_for_each(|b| self.collect_definitions(b));
            }
            GraphNode::Task { label: None, .. } => None,
        };

        if let Some(name) = defined {
            if self.definitions.insert(name, node).is_some() {
                return Err(MalformedGraphError::DuplicateLabel(name.to_string()));
            }
            self.taken.insert(name.to_string());
        }
        Ok(())
    }

    fn visit(&mut self, node: &'g GraphNode) -> Result<PlanEntry, MalformedGraphError> {
        match node {
            GraphNode::Task {
                name,
                label,
                properties,
                arguments,
            } => {
                let step = match label {
                    Some(label) => NodeRef::new(label.clone()),
                    None => self.next_step_id(name),
                };
                self.launch(step, name, label.clone(), properties, arguments)
            }
            GraphNode::Label { name, target } => {
                let resolved = self.resolve(name, target)?;
                match resolved {
                    GraphNode::Task {
                        name: task_name,
                        properties,
                        arguments,
                        ..
                    } => self.launch(
                        NodeRef::new(name.clone()),
                        task_name,
                        Some(name.clone()),
                        properties,
                        arguments,
                    ),
                    // Resolution only ever stops at a task node.
                    other => Err(MalformedGraphError::UndefinedTarget {
                        label: name.clone(),
                        target: other.kind().to_string(),
                    }),
                }
            }
            GraphNode::Sequence { children } => {
                if children.is_empty() {
                    return Err(MalformedGraphError::EmptySequence);
                }
                let node = fresh_id(&mut self.taken, "sequence", &mut self.sequences);

                self.trace.push(TraceMarker::EnterSequence(node.clone()));
                let entries = children
                    .iter()
                    .map(|child| self.visit(child))
                    .collect::<Result<Vec<_>, _>>()?;
                self.trace.push(TraceMarker::ExitSequence(node.clone()));

                Ok(PlanEntry::Sequence(SequencePlan { node, entries }))
            }
            GraphNode::Split { branches } => {
                if branches.is_empty() {
                    return Err(MalformedGraphError::EmptySplit);
                }
                let node = fresh_id(&mut self.taken, "split", &mut self.splits);

                self.trace.push(TraceMarker::EnterSplit(node.clone()));
                let branches = branches
                    .iter()
                    .map(|branch| self.visit(branch).map(Arc::new))
                    .collect::<Result<Vec<_>, _>>()?;
                self.trace.push(TraceMarker::SplitBoundary(node.clone()));

                Ok(PlanEntry::Split(SplitPlan { node, branches }))
            }
        }
    }

    fn launch(
        &mut self,
        step: NodeRef,
        task_name: &str,
        label: Option<String>,
        properties: &BTreeMap<String, String>,
        arguments: &[String],
    ) -> Result<PlanEntry, MalformedGraphError> {
        if task_name.trim().is_empty() {
            return Err(MalformedGraphError::EmptyTaskName);
        }
        self.trace.push(TraceMarker::Step(step.clone()));
        Ok(PlanEntry::Launch(LaunchDirective {
            step,
            task_name: task_name.to_string(),
            label,
            properties: properties.clone(),
            arguments: arguments.to_vec(),
        }))
    }

    /// Follow label references until a task node is reached.
    fn resolve(&self, name: &str, target: &str) -> Result<&'g GraphNode, MalformedGraphError> {
        let mut chain = vec![name.to_string()];
        let mut current = target;
        loop {
            if chain.iter().any(|seen| seen == current) {
                chain.push(current.to_string());
                return Err(MalformedGraphError::CyclicReference(chain));
            }
            let node = self.definitions.get(current).copied().ok_or_else(|| {
                MalformedGraphError::UndefinedTarget {
                    label: chain.last().cloned().unwrap_or_default(),
                    target: current.to_string(),
                }
            })?;
            match node {
                GraphNode::Label { target: next, .. } => {
                    chain.push(current.to_string());
                    current = next.as_str();
                }
                task => return Ok(task),
            }
        }
    }

    fn next_step_id(&mut self, task_name: &str) -> NodeRef {
        let counter = self.occurrences.entry(task_name.to_string()).or_default();
        fresh_id(&mut self.taken, task_name, counter)
    }
}

/// Next `<prefix>_<n>` not already used by a label or another node.
fn fresh_id(taken: &mut HashSet<String>, prefix: &str, counter: &mut usize) -> NodeRef {
    loop {
        let candidate = format!("{}_{}", prefix, counter);
        *counter += 1;
        if taken.insert(candidate.clone()) {
            return NodeRef::new(candidate);
        }
    }
}
