//! Condition nodes: pick one of two branches from a runtime-evaluated predicate.
//!
//! [`evaluate`] is the pure part: same condition and environment, same branch.
//! [`ConditionEvaluator`] wraps it with the status lifecycle
//! (`ready -> evaluating -> true | false | error`) recorded on a shared
//! [`ConditionBoard`] that renderers observe through the event bus.

pub mod expression;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use guild_core::context::ValueEnvironment;
use guild_core::error::EvaluationError;
use guild_core::event::{EventBus, SessionEvent};
use guild_core::types::{Branch, ConditionStatus, ConditionType, NodeId};

use crate::graph::{ConditionNode, WorkflowGraph};
use expression::{parse_condition, truthy, type_name, values_equal, ConditionExpr};

/// The branch a condition selected, with a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub branch: Branch,
    pub detail: String,
}

/// Everything a renderer needs to draw a condition node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionNodeState {
    pub status: ConditionStatus,
    pub condition: String,
    pub condition_type: ConditionType,
}

/// Evaluate condition text against an environment.
pub fn evaluate(
    condition_type: ConditionType,
    condition: &str,
    env: &ValueEnvironment,
) -> Result<Decision, EvaluationError> {
    match parse_condition(condition_type, condition, env)? {
        ConditionExpr::Predicate(expr) => {
            let value = expr.eval(env)?;
            let passed = match (condition_type, &value) {
                (ConditionType::Gate, v) => truthy(v),
                (_, Value::Bool(b)) => *b,
                (_, other) => {
                    return Err(EvaluationError::TypeMismatch(format!(
                        "condition produced {}, expected a boolean",
                        type_name(other)
                    )))
                }
            };
            let detail = match condition_type {
                ConditionType::Gate if passed => format!("gate `{}` is open", condition.trim()),
                ConditionType::Gate => format!("gate `{}` is closed", condition.trim()),
                _ => format!("`{}` evaluated to {}", condition.trim(), passed),
            };
            Ok(Decision {
                branch: Branch::from_bool(passed),
                detail,
            })
        }
        ConditionExpr::Switch { subject, cases } => {
            let subject = subject.eval(env)?;
            for case in &cases {
                let candidate = case.eval(env)?;
                if values_equal(&subject, &candidate)? {
                    return Ok(Decision {
                        branch: Branch::True,
                        detail: format!("switch matched case {candidate}"),
                    });
                }
            }
            Ok(Decision {
                branch: Branch::False,
                detail: format!("switch value {subject} matched none of {} cases", cases.len()),
            })
        }
        ConditionExpr::Filter {
            collection,
            predicate,
        } => {
            let items = match collection.eval(env)? {
                Value::Array(items) => items,
                other => {
                    return Err(EvaluationError::TypeMismatch(format!(
                        "filter needs an array, found {}",
                        type_name(&other)
                    )))
                }
            };
            let mut scoped = env.clone();
            let mut matched = 0usize;
            for item in &items {
                scoped.set("item", item.clone());
                match predicate.eval(&scoped)? {
                    Value::Bool(true) => matched += 1,
                    Value::Bool(false) => {}
                    other => {
                        return Err(EvaluationError::TypeMismatch(format!(
                            "filter predicate produced {}, expected a boolean",
                            type_name(&other)
                        )))
                    }
                }
            }
            Ok(Decision {
                branch: Branch::from_bool(matched > 0),
                detail: format!("filter matched {matched} of {} items", items.len()),
            })
        }
    }
}

/// Shared, observable status of every condition node in a session.
///
/// Cloning yields another handle onto the same board.
#[derive(Clone)]
pub struct ConditionBoard {
    statuses: Arc<Mutex<BTreeMap<NodeId, ConditionStatus>>>,
    event_bus: Arc<EventBus>,
}

impl ConditionBoard {
    pub fn new(event_bus: Arc<EventBus>) -> Self {
        Self {
            statuses: Arc::new(Mutex::new(BTreeMap::new())),
            event_bus,
        }
    }

    /// Record a status and notify subscribers if it changed.
    pub fn set(&self, node_id: &NodeId, status: ConditionStatus) {
        let previous = {
            let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
            statuses.insert(node_id.clone(), status)
        };
        if previous != Some(status) {
            self.event_bus.publish(SessionEvent::ConditionStatusChanged {
                node_id: node_id.clone(),
                status,
            });
        }
    }

    /// Current status; nodes never evaluated are `ready`.
    pub fn status(&self, node_id: &NodeId) -> ConditionStatus {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(node_id)
            .copied()
            .unwrap_or_default()
    }

    /// Put every listed node back to `ready` and forget anything else.
    pub fn reset<'a>(&self, node_ids: impl IntoIterator<Item = &'a NodeId>) {
        let ids: Vec<&NodeId> = node_ids.into_iter().collect();
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id, _| ids.contains(&id));
        for id in ids {
            self.set(id, ConditionStatus::Ready);
        }
    }

    pub fn snapshot(&self) -> BTreeMap<NodeId, ConditionStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Combine a node's definition with its current status.
    pub fn state(&self, graph: &WorkflowGraph, node_id: &NodeId) -> Option<ConditionNodeState> {
        let node = graph.node(node_id)?.as_condition()?;
        Some(ConditionNodeState {
            status: self.status(node_id),
            condition: node.condition.clone(),
            condition_type: node.condition_type,
        })
    }
}

impl std::fmt::Debug for ConditionBoard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionBoard")
            .field("statuses", &self.snapshot())
            .finish()
    }
}

/// Evaluates condition nodes and drives their status lifecycle.
#[derive(Debug, Clone)]
pub struct ConditionEvaluator {
    board: ConditionBoard,
}

impl ConditionEvaluator {
    pub fn new(board: ConditionBoard) -> Self {
        Self { board }
    }

    pub fn board(&self) -> &ConditionBoard {
        &self.board
    }

    /// Evaluate one condition node, moving its status through `evaluating`
    /// to `true`, `false` or `error`.
    pub fn evaluate(
        &self,
        node_id: &NodeId,
        node: &ConditionNode,
        env: &ValueEnvironment,
    ) -> Result<Decision, EvaluationError> {
        self.board.set(node_id, ConditionStatus::Evaluating);
        let outcome = evaluate(node.condition_type, &node.condition, env);
        match &outcome {
            Ok(decision) => {
                debug!(
                    node_id = %node_id,
                    branch = %decision.branch,
                    detail = %decision.detail,
                    "Condition evaluated"
                );
                self.board.set(node_id, decision.branch.status());
            }
            Err(e) => {
                warn!(node_id = %node_id, error = %e, "Condition evaluation failed");
                self.board.set(node_id, ConditionStatus::Error);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env() -> ValueEnvironment {
        ValueEnvironment::from_value(json!({
            "value": 42,
            "threshold": 10,
            "tier": "gold",
            "orders": [{"total": 40}, {"total": 140}, {"total": 240}],
            "pending": [],
        }))
    }

    #[test]
    fn if_selects_branch() {
        let d = evaluate(ConditionType::If, "value > threshold", &env()).unwrap();
        assert_eq!(d.branch, Branch::True);
        assert_eq!(d.detail, "`value > threshold` evaluated to true");
        let d = evaluate(ConditionType::If, "value < threshold", &env()).unwrap();
        assert_eq!(d.branch, Branch::False);
    }

    #[test]
    fn if_requires_boolean() {
        assert!(matches!(
            evaluate(ConditionType::If, "value", &env()),
            Err(EvaluationError::TypeMismatch(_))
        ));
    }

    #[test]
    fn gate_uses_truthiness() {
        assert_eq!(evaluate(ConditionType::Gate, "value", &env()).unwrap().branch, Branch::True);
        assert_eq!(evaluate(ConditionType::Gate, "pending", &env()).unwrap().branch, Branch::False);
        assert_eq!(
            evaluate(ConditionType::Gate, "value > 100", &env()).unwrap().detail,
            "gate `value > 100` is closed"
        );
    }

    #[test]
    fn switch_reduces_case_match_to_boolean() {
        let d = evaluate(ConditionType::Switch, "tier => \"silver\" | \"gold\"", &env()).unwrap();
        assert_eq!(d.branch, Branch::True);
        let d = evaluate(ConditionType::Switch, "tier => \"bronze\"", &env()).unwrap();
        assert_eq!(d.branch, Branch::False);
        assert!(matches!(
            evaluate(ConditionType::Switch, "tier => 3", &env()),
            Err(EvaluationError::TypeMismatch(_))
        ));
    }

    #[test]
    fn filter_passes_when_any_item_matches() {
        let d = evaluate(ConditionType::Filter, "orders where item.total > 100", &env()).unwrap();
        assert_eq!(d.branch, Branch::True);
        assert_eq!(d.detail, "filter matched 2 of 3 items");
        let d = evaluate(ConditionType::Filter, "orders where item.total > 1000", &env()).unwrap();
        assert_eq!(d.branch, Branch::False);
        assert!(matches!(
            evaluate(ConditionType::Filter, "tier where item > 1", &env()),
            Err(EvaluationError::TypeMismatch(_))
        ));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let first = evaluate(ConditionType::If, "value > threshold && tier == \"gold\"", &env());
        let second = evaluate(ConditionType::If, "value > threshold && tier == \"gold\"", &env());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn evaluator_drives_status_lifecycle() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let evaluator = ConditionEvaluator::new(ConditionBoard::new(bus.clone()));
        let id = NodeId::from("cond");
        let node = ConditionNode {
            condition: "value > threshold".into(),
            condition_type: ConditionType::If,
            description: String::new(),
        };

        assert_eq!(evaluator.board().status(&id), ConditionStatus::Ready);
        evaluator.evaluate(&id, &node, &env()).unwrap();
        assert_eq!(evaluator.board().status(&id), ConditionStatus::True);

        let mut seen = vec![];
        while let Ok(SessionEvent::ConditionStatusChanged { status, .. }) = rx.try_recv() {
            seen.push(status);
        }
        assert_eq!(seen, vec![ConditionStatus::Evaluating, ConditionStatus::True]);
    }

    #[test]
    fn evaluator_marks_errors() {
        let board = ConditionBoard::new(Arc::new(EventBus::default()));
        let evaluator = ConditionEvaluator::new(board.clone());
        let id = NodeId::from("cond");
        let node = ConditionNode {
            condition: "unknown > 1".into(),
            condition_type: ConditionType::If,
            description: String::new(),
        };
        assert!(evaluator.evaluate(&id, &node, &env()).is_err());
        assert_eq!(board.status(&id), ConditionStatus::Error);

        board.reset([&id]);
        assert_eq!(board.status(&id), ConditionStatus::Ready);
    }

    #[test]
    fn reset_forgets_removed_nodes() {
        let board = ConditionBoard::new(Arc::new(EventBus::default()));
        board.set(&"old".into(), ConditionStatus::False);
        board.set(&"kept".into(), ConditionStatus::True);
        let kept = NodeId::from("kept");
        board.reset([&kept]);
        let snapshot = board.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[&kept], ConditionStatus::Ready);
    }
}
