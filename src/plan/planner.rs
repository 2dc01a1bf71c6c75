use crate::executor::Executor;
use crate::index::Index;
use crate::plan::cost::CostModel;
use crate::plan::{Plan, PlanState, Step, StepKind};
use crate::schema::{EntityId, FieldId, Schema};
use crate::workload::{Query, Statement, Workload};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Selectivity charged for the single range predicate a statement may
/// carry.
pub const RANGE_SELECTIVITY: f64 = 0.1;

const COST_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// Fatal: the candidate set cannot answer this statement, which means
    /// enumeration is buggy rather than the workload being unservable.
    #[error("no valid plan exists for statement '{statement}'")]
    NoPlanFor { statement: String },
}

/// Cheapest way to answer one query with a given terminal index: the full
/// plan, its total cost, and the cost of the suffix from the terminal
/// lookup onward.
#[derive(Debug, Clone, PartialEq)]
pub struct CostEntry {
    pub total: f64,
    pub last_step: f64,
    pub plan: Plan,
}

/// Per-statement cost tables keyed by statement label and index key.
#[derive(Debug, Clone, Default)]
pub struct CostMatrix {
    /// Query label → terminal index key → cheapest completing plan.
    pub queries: BTreeMap<String, BTreeMap<String, CostEntry>>,
    /// Write label → index key → per-execution maintenance cost.
    pub updates: BTreeMap<String, BTreeMap<String, f64>>,
    /// Write label → index key → the maintenance plan behind that cost.
    pub update_plans: BTreeMap<String, BTreeMap<String, Plan>>,
}

/// Enumerates and costs every execution plan expressible over the
/// candidate set.
pub struct Planner<'a> {
    schema: &'a Schema,
    cost: &'a dyn CostModel,
    candidates: &'a [Index],
}

impl<'a> Planner<'a> {
    pub fn new(schema: &'a Schema, cost: &'a dyn CostModel, candidates: &'a [Index]) -> Self {
        Self {
            schema,
            cost,
            candidates,
        }
    }

    /// Fills the cost matrix for the whole workload. Query costing is
    /// independent per statement and shards across the executor; a query
    /// or support query with no valid plan is fatal.
    pub fn cost_matrix(
        &self,
        workload: &Workload,
        executor: Executor,
    ) -> Result<CostMatrix, PlanError> {
        let queries: Vec<&Query> = workload.queries().collect();
        let costed = executor.map(&queries, |&q| (q.label.clone(), self.query_costs(q)));

        let mut matrix = CostMatrix::default();
        for (label, entries) in costed {
            if entries.is_empty() {
                return Err(PlanError::NoPlanFor { statement: label });
            }
            matrix.queries.insert(label, entries);
        }

        let writes: Vec<&Statement> = workload.writes().collect();
        let maintained = executor.map(&writes, |&w| {
            let mut costs = BTreeMap::new();
            let mut plans = BTreeMap::new();
            for index in self.candidates {
                if let Some((cost, plan)) = self.maintenance(w, index)? {
                    costs.insert(index.key().to_string(), cost);
                    plans.insert(index.key().to_string(), plan);
                }
            }
            Ok::<_, PlanError>((w.label().to_string(), costs, plans))
        });
        for entry in maintained {
            let (label, costs, plans) = entry?;
            matrix.updates.insert(label.clone(), costs);
            matrix.update_plans.insert(label, plans);
        }
        Ok(matrix)
    }

    /// For each candidate index that can terminate a plan of `q`, the
    /// minimum-cost plan ending there. Ties break by plan length, then
    /// lexicographically by the lookup key sequence.
    pub fn query_costs(&self, q: &Query) -> BTreeMap<String, CostEntry> {
        let mut best = BTreeMap::new();
        let mut steps = Vec::new();
        self.extend(q, 0, true, false, PlanState::initial(), &mut steps, &mut best);
        best
    }

    #[allow(clippy::too_many_arguments)]
    fn extend(
        &self,
        q: &Query,
        pos: usize,
        first: bool,
        refetch: bool,
        state: PlanState,
        steps: &mut Vec<Step>,
        best: &mut BTreeMap<String, CostEntry>,
    ) {
        let n = q.path.len();
        for index in self.candidates {
            let len = index.path().len();
            // A later lookup overlaps the previous one at its anchor
            // entity, so it must extend coverage by at least one position —
            // except for the single final re-fetch, a point lookup at the
            // last position that swaps in a terminal with more stored
            // fields.
            if !first && len < 2 && !(refetch && pos + 1 == n) {
                continue;
            }
            let end = pos + len;
            if end > n || *index.path() != q.path.subpath(self.schema, pos, end) {
                continue;
            }
            let Some((next_state, cost)) = self.lookup(q, index, first, &state) else {
                continue;
            };
            steps.push(Step {
                kind: StepKind::IndexLookup {
                    index: index.key().to_string(),
                },
                cost,
            });
            if end == n {
                self.complete(q, index, next_state.clone(), steps, best);
                if !refetch {
                    self.extend(q, n - 1, false, true, next_state, steps, best);
                }
            } else {
                self.extend(q, end - 1, false, false, next_state, steps, best);
            }
            steps.pop();
        }
    }

    /// Checks that a lookup over `index` is answerable here and computes
    /// the state after it. The first step must have every hash field
    /// pinned by an equality condition; later steps may also pin via the
    /// anchor identity fetched upstream. A full scan is allowed only as a
    /// first step over an identity-hashed index when no equality condition
    /// touches the root entity.
    fn lookup(
        &self,
        q: &Query,
        index: &Index,
        first: bool,
        state: &PlanState,
    ) -> Option<(PlanState, f64)> {
        let eq: BTreeSet<FieldId> = q.eq_fields.iter().copied().collect();
        let first_entity = index.path().first_entity(self.schema);
        let anchor = self.schema.id_field(first_entity);

        let pinned = index
            .hash_fields()
            .iter()
            .all(|f| eq.contains(f) || (!first && *f == anchor));
        let mut st = state.clone();
        let partitions = if pinned {
            st.cardinality.max(1.0)
        } else {
            let eq_on_root = q
                .eq_fields
                .iter()
                .any(|&f| self.schema.field(f).parent == first_entity);
            if !(first && !eq_on_root && index.hash_fields() == [anchor]) {
                return None;
            }
            index.partitions()
        };

        let mut rows = partitions * index.entries_per_partition();
        let mut hash_parents: BTreeSet<EntityId> = BTreeSet::new();
        for &f in index.hash_fields() {
            hash_parents.insert(self.schema.field(f).parent);
            if eq.contains(&f) {
                st.resolved_eq.insert(f);
            }
        }
        // Consume the order prefix: equality fields narrow each partition,
        // and the range predicate, when it sits right after them, is
        // answered by the sort order and terminates the prefix. A field
        // owned by a partition-key entity is constant within a partition
        // and narrows nothing further.
        for &f in index.order_fields() {
            if eq.contains(&f) {
                let narrows = !hash_parents.contains(&self.schema.field(f).parent);
                if st.resolved_eq.insert(f) && narrows {
                    rows /= self.schema.field_cardinality(f) as f64;
                }
            } else if Some(f) == q.range_field && !st.range_resolved {
                st.range_resolved = true;
                rows *= RANGE_SELECTIVITY;
                break;
            } else {
                break;
            }
        }

        // An established ordering survives a point re-fetch keyed by the
        // anchor identity; any other lookup must establish it itself.
        let preserves_order = index.path().len() == 1 && index.hash_fields() == [anchor];
        st.order_done =
            (st.order_done && preserves_order) || self.order_satisfied(q, index);

        st.partitions = partitions;
        st.cardinality = rows.max(0.0);
        let cost = self.cost.index_lookup_cost(index, &st);
        Some((st, cost))
    }

    fn complete(
        &self,
        q: &Query,
        terminal: &Index,
        mut st: PlanState,
        lookups: &[Step],
        best: &mut BTreeMap<String, CostEntry>,
    ) {
        // The terminal index must cover the projection.
        if q.select.iter().any(|&f| !terminal.contains_field(f)) {
            return;
        }

        let mut trailing: Vec<Step> = Vec::new();
        let missing_eq: Vec<FieldId> = q
            .eq_fields
            .iter()
            .copied()
            .filter(|f| !st.resolved_eq.contains(f))
            .collect();
        let missing_range = q.range_field.filter(|_| !st.range_resolved);
        if !missing_eq.is_empty() || missing_range.is_some() {
            // Filtering happens on fetched rows, so the filtered fields
            // must be stored by the terminal index.
            if missing_eq
                .iter()
                .chain(missing_range.iter())
                .any(|&f| !terminal.contains_field(f))
            {
                return;
            }
            let cost = self
                .cost
                .filter_cost(&missing_eq, missing_range.is_some(), &st);
            for &f in &missing_eq {
                st.cardinality /= self.schema.field_cardinality(f) as f64;
                st.resolved_eq.insert(f);
            }
            if missing_range.is_some() {
                st.cardinality *= RANGE_SELECTIVITY;
                st.range_resolved = true;
            }
            trailing.push(Step {
                kind: StepKind::Filter {
                    fields: missing_eq,
                    range: missing_range,
                },
                cost,
            });
        }

        if !q.order_fields.is_empty() && !st.order_done {
            let fields: Vec<FieldId> = q.order_fields.iter().copied().collect();
            let cost = self.cost.sort_cost(&fields, &st);
            trailing.push(Step {
                kind: StepKind::Sort { fields },
                cost,
            });
        }

        if let Some(count) = q.limit {
            let cost = self.cost.limit_cost(count, &st);
            st.cardinality = st.cardinality.min(count as f64);
            trailing.push(Step {
                kind: StepKind::Limit { count },
                cost,
            });
        }

        let terminal_lookup_cost = lookups.last().map(|s| s.cost).unwrap_or(0.0);
        let steps: Vec<Step> = lookups.iter().cloned().chain(trailing).collect();
        let total: f64 = steps.iter().map(|s| s.cost).sum();
        let last_step = terminal_lookup_cost
            + steps[lookups.len()..].iter().map(|s| s.cost).sum::<f64>();
        let plan = Plan {
            statement: q.label.clone(),
            steps,
            cost: total,
            support: Vec::new(),
        };

        let candidate = CostEntry {
            total,
            last_step,
            plan,
        };
        match best.get(terminal.key()) {
            Some(existing) if !better(&candidate, existing) => {}
            _ => {
                best.insert(terminal.key().to_string(), candidate);
            }
        }
    }

    /// The required ordering is free when, after skipping order fields
    /// already pinned by equality, the terminal index sorts by the query's
    /// order fields as a prefix.
    fn order_satisfied(&self, q: &Query, terminal: &Index) -> bool {
        let eq: BTreeSet<FieldId> = q.eq_fields.iter().copied().collect();
        let rem: Vec<FieldId> = terminal
            .order_fields()
            .iter()
            .copied()
            .skip_while(|f| eq.contains(f))
            .collect();
        rem.len() >= q.order_fields.len() && rem[..q.order_fields.len()] == q.order_fields[..]
    }

    /// Per-execution cost of propagating `statement` into `index`, with
    /// the plan behind it: support queries fetch what the statement does
    /// not supply, then the affected entries are deleted and rewritten.
    /// `None` when the statement leaves the index untouched.
    pub fn maintenance(
        &self,
        statement: &Statement,
        index: &Index,
    ) -> Result<Option<(f64, Plan)>, PlanError> {
        if !statement.modifies_index(self.schema, index) {
            return Ok(None);
        }
        let entity = statement
            .mutated_entity(self.schema)
            .expect("only writes modify indexes");
        let entity_count = self.schema.entity(entity).count.max(1) as f64;
        let anchor = self.schema.id_field(entity);

        let rows = if matches!(statement, Statement::Insert(_)) {
            1.0
        } else {
            let mut rows = entity_count;
            for &f in statement.eq_fields() {
                rows /= self.schema.field_cardinality(f) as f64;
            }
            if statement.range_field().is_some() {
                rows *= RANGE_SELECTIVITY;
            }
            rows.max(1.0)
        };
        let fan = (index.entries() / entity_count).max(1.0);

        let mut support_plans = Vec::new();
        let mut support_cost = 0.0;
        for sq in statement.support_queries(self.schema, index) {
            let costs = self.query_costs(&sq);
            let Some(entry) = costs.values().min_by(|a, b| {
                compare_entries(a, b)
            }) else {
                return Err(PlanError::NoPlanFor {
                    statement: statement.label().to_string(),
                });
            };
            // A support query keyed by the identity runs once per affected
            // row; one keyed by the statement's own conditions runs once.
            let repeats = if sq.eq_fields.as_slice() == [anchor] {
                rows
            } else {
                1.0
            };
            support_cost += entry.total * repeats;
            support_plans.push(entry.plan.clone());
        }

        let mut st = PlanState::initial();
        st.cardinality = rows * fan;
        st.partitions = rows * fan;

        let mut steps = Vec::new();
        if matches!(statement, Statement::Update(_) | Statement::Delete(_)) {
            steps.push(Step {
                kind: StepKind::Delete {
                    index: index.key().to_string(),
                },
                cost: self.cost.delete_cost(index, &st),
            });
        }
        if matches!(statement, Statement::Update(_) | Statement::Insert(_)) {
            steps.push(Step {
                kind: StepKind::Insert {
                    index: index.key().to_string(),
                },
                cost: self.cost.insert_cost(index, &st),
            });
        }

        let total = support_cost + steps.iter().map(|s| s.cost).sum::<f64>();
        let plan = Plan {
            statement: statement.label().to_string(),
            steps,
            cost: total,
            support: support_plans,
        };
        Ok(Some((total, plan)))
    }
}

fn compare_entries(a: &CostEntry, b: &CostEntry) -> std::cmp::Ordering {
    a.total
        .partial_cmp(&b.total)
        .unwrap_or(std::cmp::Ordering::Equal)
        .then_with(|| a.plan.steps.len().cmp(&b.plan.steps.len()))
        .then_with(|| a.plan.lookup_keys().cmp(&b.plan.lookup_keys()))
}

/// Strictly-better test for the per-terminal best table: cheaper wins,
/// then shorter, then the lexicographically smaller lookup sequence.
fn better(candidate: &CostEntry, existing: &CostEntry) -> bool {
    if candidate.total < existing.total - COST_EPSILON {
        return true;
    }
    if candidate.total > existing.total + COST_EPSILON {
        return false;
    }
    match candidate.plan.steps.len().cmp(&existing.plan.steps.len()) {
        std::cmp::Ordering::Less => true,
        std::cmp::Ordering::Greater => false,
        std::cmp::Ordering::Equal => {
            candidate.plan.lookup_keys() < existing.plan.lookup_keys()
        }
    }
}
