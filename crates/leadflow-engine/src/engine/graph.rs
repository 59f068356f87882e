//! Explicit step graph built from a workflow's step rows.
//!
//! Nodes are keyed by step id; edges are the typed successor pointers
//! `next`, `true_branch` and `false_branch`. Traversal is iterative in the
//! executor, bounded by a per-run step ceiling, so authoring cycles cannot
//! recurse or loop forever.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::db::models::WorkflowStep;

use super::step::StepError;

/// Typed outgoing edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Next,
    TrueBranch,
    FalseBranch,
}

#[derive(Debug, Clone, Default)]
pub struct StepGraph {
    /// Steps in position order.
    order: Vec<Uuid>,
    nodes: HashMap<Uuid, WorkflowStep>,
}

impl StepGraph {
    pub fn new(mut steps: Vec<WorkflowStep>) -> Self {
        steps.sort_by_key(|s| s.position);
        let order = steps.iter().map(|s| s.id).collect();
        let nodes = steps.into_iter().map(|s| (s.id, s)).collect();
        Self { order, nodes }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn get(&self, id: Uuid) -> Option<&WorkflowStep> {
        self.nodes.get(&id)
    }

    /// Entry step: the step at explicit position 0, else the first step (by
    /// position) that no other step points to.
    pub fn entry(&self) -> Option<&WorkflowStep> {
        let ordered = self.order.iter().filter_map(|id| self.nodes.get(id));

        if let Some(step) = ordered.clone().find(|s| s.position == 0) {
            return Some(step);
        }

        let targets: HashSet<Uuid> = self
            .nodes
            .values()
            .flat_map(|s| [s.next_step_id, s.true_branch_step_id, s.false_branch_step_id])
            .flatten()
            .collect();
        ordered.clone().find(|s| !targets.contains(&s.id))
    }

    /// Follow `edge` from `step`. `Ok(None)` means the edge is unset; a
    /// pointer to a step outside the graph is a configuration error.
    pub fn successor(&self, step: &WorkflowStep, edge: Edge) -> Result<Option<&WorkflowStep>, StepError> {
        let target = match edge {
            Edge::Next => step.next_step_id,
            Edge::TrueBranch => step.true_branch_step_id,
            Edge::FalseBranch => step.false_branch_step_id,
        };
        match target {
            None => Ok(None),
            Some(id) => self.nodes.get(&id).map(Some).ok_or_else(|| {
                StepError::Configuration(format!(
                    "step {} points to missing step {}",
                    step.uid, id
                ))
            }),
        }
    }
}
