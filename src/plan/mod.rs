pub mod cost;
pub mod planner;

pub use cost::{CostModel, CostModelRegistry, StepCountCost, WideColumnCost};
pub use planner::{CostEntry, CostMatrix, PlanError, Planner};

use crate::schema::FieldId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One step of an execution plan. Index references are by stable index
/// key, which keeps plans serializable and comparable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StepKind {
    IndexLookup { index: String },
    Filter {
        fields: Vec<FieldId>,
        range: Option<FieldId>,
    },
    Sort { fields: Vec<FieldId> },
    Limit { count: u64 },
    Insert { index: String },
    Delete { index: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub kind: StepKind,
    pub cost: f64,
}

/// An ordered sequence of steps answering one statement. Mutation plans
/// carry the support-query sub-plans that run before the maintenance
/// steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub statement: String,
    pub steps: Vec<Step>,
    pub cost: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub support: Vec<Plan>,
}

impl Plan {
    /// Stable keys of the indexes this plan reads or writes, in step
    /// order, support plans included.
    pub fn index_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .support
            .iter()
            .flat_map(|p| p.index_keys())
            .collect();
        for step in &self.steps {
            match &step.kind {
                StepKind::IndexLookup { index }
                | StepKind::Insert { index }
                | StepKind::Delete { index } => keys.push(index),
                _ => {}
            }
        }
        keys
    }

    /// Keys of lookup steps only, used for plan tie-breaking.
    pub fn lookup_keys(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|step| match &step.kind {
                StepKind::IndexLookup { index } => Some(index.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Running facts threaded through a plan while it is costed: how many
/// rows flow into the next step, how many partitions the current lookup
/// touches, and which conditions are already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanState {
    pub cardinality: f64,
    pub partitions: f64,
    pub resolved_eq: BTreeSet<FieldId>,
    pub range_resolved: bool,
    /// The required ordering is already established and every later step
    /// preserves it.
    pub order_done: bool,
}

impl PlanState {
    pub fn initial() -> Self {
        Self {
            cardinality: 1.0,
            partitions: 1.0,
            resolved_eq: BTreeSet::new(),
            range_resolved: false,
            order_done: false,
        }
    }
}

impl Default for PlanState {
    fn default() -> Self {
        Self::initial()
    }
}
