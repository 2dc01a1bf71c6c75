use crate::config::{ConfigError, KeyplanConfig};
use crate::error::KeyplanError;
use crate::ilp::solver::Solver;
use crate::ilp::Problem;
use crate::index::{Index, IndexEnumerator};
use crate::plan::cost::CostModel;
use crate::plan::planner::{CostEntry, CostMatrix};
use crate::plan::{Plan, Planner};
use crate::schema::Schema;
use crate::workload::Workload;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

/// One materialized index in a finished design, with its human-oriented
/// definition captured at search time so the result is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChosenIndex {
    pub definition: String,
    pub index: Index,
}

/// The advisor's output: the selected indexes, the winning plan per
/// statement, and the totals the objective saw. Serializes round-trip
/// clean; the `Display` form is presentation-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub mix: String,
    pub indexes: Vec<ChosenIndex>,
    pub plans: Vec<Plan>,
    pub total_size: f64,
    pub total_cost: f64,
    /// How many candidates enumeration produced.
    pub enumerated: usize,
    /// First-stage optimal objective value.
    pub objective_value: f64,
}

impl SearchResult {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> Result<SearchResult, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn plan_for(&self, label: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.statement == label)
    }
}

impl fmt::Display for SearchResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} indexes, {:.0} bytes, cost {:.4} (of {} enumerated)",
            self.indexes.len(),
            self.total_size,
            self.total_cost,
            self.enumerated
        )?;
        for chosen in &self.indexes {
            writeln!(f, "  {} ({:.0} bytes)", chosen.definition, chosen.index.size())?;
        }
        for plan in &self.plans {
            writeln!(
                f,
                "  {}: {} steps, cost {:.4}",
                plan.statement,
                plan.steps.len(),
                plan.cost
            )?;
        }
        Ok(())
    }
}

/// Runs the full pipeline: enumerate candidates, fill the cost matrix,
/// build and solve the integer program, then reassemble the winning plans
/// from the cached tables.
pub fn search(
    schema: &Schema,
    workload: &Workload,
    config: &KeyplanConfig,
    cost_model: &dyn CostModel,
    solver: &dyn Solver,
) -> Result<SearchResult, KeyplanError> {
    config.validate()?;
    if let Some(mix) = config.mix.as_deref() {
        if !workload.has_mix(mix) {
            return Err(ConfigError::UnknownMix {
                name: mix.to_string(),
            }
            .into());
        }
    }
    let mix = config.mix.as_deref();

    let candidates = IndexEnumerator::new(schema).candidates(workload);
    info!(candidates = candidates.len(), "candidate enumeration complete");

    let planner = Planner::new(schema, cost_model, &candidates);
    let matrix = planner.cost_matrix(workload, config.executor)?;

    let mut problem = Problem::build(solver, workload, mix, &candidates, &matrix, config)?;
    let solution = problem.solve()?;

    let selected: Vec<&Index> = candidates
        .iter()
        .zip(&solution.selected)
        .filter(|(_, &s)| s)
        .map(|(i, _)| i)
        .collect();

    let mut plans = Vec::new();
    let mut total_cost = 0.0;
    for statement in workload.statements() {
        let label = statement.label();
        let freq = workload.frequency(mix, label);
        if statement.is_read() {
            let entries = &matrix.queries[label];
            let chosen = resolve_winner(entries, &solution.chosen_terminals[label]);
            total_cost += freq * chosen.total;
            plans.push(chosen.plan.clone());
        } else if let Some(plan) = write_plan(&matrix, label, &selected) {
            total_cost += freq * plan.cost;
            plans.push(plan);
        }
    }

    let total_size: f64 = selected.iter().map(|i| i.size()).sum();
    let indexes = selected
        .into_iter()
        .map(|index| ChosenIndex {
            definition: index.render(schema),
            index: index.clone(),
        })
        .collect();

    Ok(SearchResult {
        mix: mix.unwrap_or_else(|| workload.default_mix()).to_string(),
        indexes,
        plans,
        total_size,
        total_cost,
        enumerated: candidates.len(),
        objective_value: solution.objective_value,
    })
}

/// Picks the winning terminal among the set variables — normally exactly
/// one; the cheapest wins if the solver left a tie.
fn resolve_winner<'a>(
    entries: &'a std::collections::BTreeMap<String, CostEntry>,
    chosen: &[String],
) -> &'a CostEntry {
    chosen
        .iter()
        .map(|key| &entries[key])
        .min_by(|a, b| {
            a.total
                .partial_cmp(&b.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.plan.steps.len().cmp(&b.plan.steps.len()))
                .then_with(|| a.plan.lookup_keys().cmp(&b.plan.lookup_keys()))
        })
        .expect("every query has at least one chosen terminal")
}

/// Merges the maintenance plans of one write across the selected indexes
/// it modifies.
fn write_plan(matrix: &CostMatrix, label: &str, selected: &[&Index]) -> Option<Plan> {
    let plans = matrix.update_plans.get(label)?;
    let mut steps = Vec::new();
    let mut support = Vec::new();
    let mut cost = 0.0;
    for index in selected {
        if let Some(plan) = plans.get(index.key()) {
            steps.extend(plan.steps.iter().cloned());
            support.extend(plan.support.iter().cloned());
            cost += plan.cost;
        }
    }
    if steps.is_empty() && support.is_empty() {
        return None;
    }
    Some(Plan {
        statement: label.to_string(),
        steps,
        cost,
        support,
    })
}
