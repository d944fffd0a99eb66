//! Plan inputs and orchestration results.

use std::collections::{BTreeMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::governance::GovernanceResult;
use crate::plan::audit::AuditEvent;
use crate::plan::envelope::MessageEnvelope;
use crate::plan::error::{PlanError, PlanResult, StepFailure};

/// One unit of work assigned to an agent role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub action: String,
    /// Open role tag resolved through the handler registry.
    #[serde(alias = "role")]
    pub agent_role: String,
    #[serde(default, alias = "deps")]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, agent_role: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            agent_role: agent_role.into(),
            dependencies: Vec::new(),
            acceptance_criteria: Vec::new(),
        }
    }

    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    pub fn with_criterion(mut self, criterion: impl Into<String>) -> Self {
        self.acceptance_criteria.push(criterion.into());
        self
    }
}

/// A set of steps with explicit dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Becomes the task id of every envelope and audit event. Generated when
    /// empty.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub objective: String,
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(objective: impl Into<String>, steps: Vec<PlanStep>) -> Self {
        Self {
            id: String::new(),
            objective: objective.into(),
            steps,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Shape checks run before any dispatch: unique ids, known dependencies,
    /// a handler for every role, and an acyclic dependency relation.
    pub fn validate(&self, has_handler: impl Fn(&str) -> bool) -> PlanResult<()> {
        let mut ids = HashSet::with_capacity(self.steps.len());
        for step in &self.steps {
            if !ids.insert(step.id.as_str()) {
                return Err(PlanError::DuplicateStep {
                    id: step.id.clone(),
                });
            }
        }
        for step in &self.steps {
            if let Some(dep) = step.dependencies.iter().find(|d| !ids.contains(d.as_str())) {
                return Err(PlanError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dep.clone(),
                });
            }
            if !has_handler(step.agent_role.as_str()) {
                return Err(PlanError::MissingHandler {
                    step: step.id.clone(),
                    role: step.agent_role.clone(),
                });
            }
        }
        self.check_acyclic()
    }

    /// Kahn's algorithm; any step left with a positive in-degree sits on (or
    /// behind) a cycle.
    fn check_acyclic(&self) -> PlanResult<()> {
        let mut indegree: BTreeMap<&str, usize> =
            self.steps.iter().map(|s| (s.id.as_str(), 0usize)).collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for step in &self.steps {
            let unique: HashSet<&str> = step.dependencies.iter().map(String::as_str).collect();
            for dep in unique {
                dependents.entry(dep).or_default().push(step.id.as_str());
                if let Some(degree) = indegree.get_mut(step.id.as_str()) {
                    *degree += 1;
                }
            }
        }

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(k, _)| *k)
            .collect();
        while let Some(node) = queue.pop_front() {
            indegree.remove(node);
            for next in dependents.get(node).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(next) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        if indegree.is_empty() {
            Ok(())
        } else {
            Err(PlanError::DependencyCycle {
                steps: indegree.keys().map(|k| k.to_string()).collect(),
            })
        }
    }
}

/// A step that ran and produced no output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedStep {
    pub step_id: String,
    pub wave: usize,
    pub error: StepFailure,
}

/// Structured outcome of a plan run. Failures are carried as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    pub task_id: String,
    /// True only when every step produced an output.
    pub success: bool,
    /// Sealed envelopes in completion order.
    pub outputs: Vec<MessageEnvelope>,
    pub audit_trail: Vec<AuditEvent>,
    /// Advisory: a human should inspect the outputs before acting on them.
    pub requires_human_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_reason: Option<String>,
    pub failed_steps: Vec<FailedStep>,
    /// Steps never dispatched because an upstream step failed.
    pub blocked_steps: Vec<String>,
    pub governance: GovernanceResult,
    pub waves: usize,
}

impl OrchestrationResult {
    pub fn output_for(&self, step_id: &str) -> Option<&MessageEnvelope> {
        self.outputs.iter().find(|e| e.step_id == step_id)
    }
}
