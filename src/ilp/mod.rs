pub mod solver;

pub use solver::{
    BranchBoundSolver, LinExpr, Relation, Sense, SolveStatus, Solver, SolverError, SolverModel,
    SolverRegistry, VarId,
};

use crate::config::{KeyplanConfig, Objective};
use crate::index::Index;
use crate::plan::planner::CostMatrix;
use crate::workload::Workload;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

/// The integer program: one materialization variable per candidate, one
/// terminal-choice variable per (query, viable terminal index), and a
/// continuous objective variable `Z` pinned by equality to the active
/// objective expression.
pub struct Problem<'a> {
    model: Box<dyn SolverModel>,
    candidates: &'a [Index],
    x: Vec<VarId>,
    y: Vec<(String, String, VarId)>,
    z: VarId,
    objective: Objective,
}

/// Raw solver outcome, read back by the search driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    /// Aligned with the candidate slice handed to `build`.
    pub selected: Vec<bool>,
    /// Query label → index keys whose terminal-choice variable is set.
    pub chosen_terminals: BTreeMap<String, Vec<String>>,
    /// First-stage optimal `Z*`.
    pub objective_value: f64,
}

impl<'a> Problem<'a> {
    /// Builds variables and constraints in the documented order:
    /// IndexPresence, CompletePlan, Space, then the objective pin.
    pub fn build(
        solver: &dyn Solver,
        workload: &Workload,
        mix: Option<&str>,
        candidates: &'a [Index],
        matrix: &'a CostMatrix,
        config: &KeyplanConfig,
    ) -> Result<Problem<'a>, SolverError> {
        let mut model = solver.new_model()?;

        let key_to_pos: BTreeMap<&str, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.key(), i))
            .collect();
        let x: Vec<VarId> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| model.add_binary_var(&format!("x{}_{}", i, &c.key()[..8])))
            .collect();
        let z = model.add_continuous_var(0.0, f64::INFINITY, "Z");

        let mut y = Vec::new();
        for (label, entries) in &matrix.queries {
            for key in entries.keys() {
                let var = model.add_binary_var(&format!("y_{}_{}", label, &key[..8]));
                y.push((label.clone(), key.clone(), var));
            }
        }

        // IndexPresence: choosing a terminal implies materializing every
        // index its cached plan reads, the terminal itself included.
        for (label, key, var) in &y {
            let entry = &matrix.queries[label][key];
            let mut seen: BTreeSet<&str> = BTreeSet::new();
            for k in entry.plan.index_keys() {
                if seen.insert(k) {
                    let xi = x[key_to_pos[k]];
                    model.add_constraint(
                        LinExpr::new().term(*var, 1.0).term(xi, -1.0),
                        Relation::Le,
                        0.0,
                        &format!("presence_{}_{}_{}", label, &key[..8], &k[..8]),
                    );
                }
            }
        }

        // Materializing an index a write modifies drags in the indexes its
        // cached maintenance plan reads, so selected designs stay
        // executable.
        for (label, plans) in &matrix.update_plans {
            for (key, plan) in plans {
                let xi = x[key_to_pos[key.as_str()]];
                let mut seen: BTreeSet<&str> = BTreeSet::new();
                for k in plan.index_keys() {
                    if k != key && seen.insert(k) {
                        let xj = x[key_to_pos[k]];
                        model.add_constraint(
                            LinExpr::new().term(xi, 1.0).term(xj, -1.0),
                            Relation::Le,
                            0.0,
                            &format!("maintain_{}_{}_{}", label, &key[..8], &k[..8]),
                        );
                    }
                }
            }
        }

        // CompletePlan: every query picks at least one viable terminal.
        let mut y_by_label: BTreeMap<&str, LinExpr> = BTreeMap::new();
        for (label, _, var) in &y {
            let expr = y_by_label.entry(label).or_default();
            expr.terms.push((*var, 1.0));
        }
        for (label, expr) in y_by_label {
            model.add_constraint(expr, Relation::Ge, 1.0, &format!("complete_{label}"));
        }

        // Space: total materialized size within the budget.
        if let Some(budget) = config.space_budget {
            let mut expr = LinExpr::new();
            for (i, index) in candidates.iter().enumerate() {
                expr.terms.push((x[i], index.size()));
            }
            model.add_constraint(expr, Relation::Le, budget, "space");
        }

        // Objective pin: Z equals the active objective expression.
        let mut pin = LinExpr::new().term(z, 1.0);
        match config.objective {
            Objective::Cost => {
                for (label, key, var) in &y {
                    let freq = workload.frequency(mix, label);
                    let entry = &matrix.queries[label][key];
                    pin.terms.push((*var, -freq * entry.total));
                }
                for (label, maint) in &matrix.updates {
                    let freq = workload.frequency(mix, label);
                    for (key, cost) in maint {
                        pin.terms.push((x[key_to_pos[key.as_str()]], -freq * cost));
                    }
                }
            }
            Objective::Space => {
                for (i, index) in candidates.iter().enumerate() {
                    pin.terms.push((x[i], -index.size()));
                }
            }
            Objective::Indexes => {
                for &xi in &x {
                    pin.terms.push((xi, -1.0));
                }
            }
        }
        model.add_constraint(pin, Relation::Eq, 0.0, "objective");
        model.set_objective(z, Sense::Minimize);

        Ok(Problem {
            model,
            candidates,
            x,
            y,
            z,
            objective: config.objective,
        })
    }

    /// First stage minimizes `Z`; when the objective is cost or space a
    /// second stage pins `Z = Z*` and minimizes the number of materialized
    /// indexes among the optima. A second-stage failure keeps the
    /// first-stage solution; infeasibility of the first stage surfaces
    /// with its IIS.
    pub fn solve(&mut self) -> Result<Solution, SolverError> {
        match self.model.optimize()? {
            SolveStatus::Optimal => {}
            SolveStatus::Infeasible => {
                let iis = self.model.compute_iis();
                warn!(iis = ?iis, "no feasible design; irreducible infeasible subset logged");
                return Err(SolverError::Infeasible { iis });
            }
            SolveStatus::Unbounded => return Err(SolverError::Unbounded),
        }
        let z_star = self.model.value(self.z);
        let first_stage = self.snapshot(z_star);
        info!(
            objective = ?self.objective,
            z_star,
            indexes = first_stage.selected.iter().filter(|&&s| s).count(),
            "first-stage solve optimal"
        );

        if self.objective == Objective::Indexes {
            return Ok(first_stage);
        }

        self.model.add_constraint(
            LinExpr::new().term(self.z, 1.0),
            Relation::Eq,
            z_star,
            "pin_objective",
        );
        let z2 = self
            .model
            .add_continuous_var(0.0, f64::INFINITY, "Z_refine");
        let mut count = LinExpr::new().term(z2, 1.0);
        for &xi in &self.x {
            count.terms.push((xi, -1.0));
        }
        self.model
            .add_constraint(count, Relation::Eq, 0.0, "index_count");
        self.model.set_objective(z2, Sense::Minimize);

        match self.model.optimize() {
            Ok(SolveStatus::Optimal) => {
                let refined = self.snapshot(z_star);
                info!(
                    indexes = refined.selected.iter().filter(|&&s| s).count(),
                    "second-stage refinement optimal"
                );
                Ok(refined)
            }
            outcome => {
                warn!(
                    ?outcome,
                    "second-stage refinement failed; keeping the first-stage solution"
                );
                Ok(first_stage)
            }
        }
    }

    fn snapshot(&self, z_star: f64) -> Solution {
        let selected = self
            .x
            .iter()
            .map(|&xi| self.model.value(xi) > 0.5)
            .collect();
        let mut chosen_terminals: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (label, key, var) in &self.y {
            if self.model.value(*var) > 0.5 {
                chosen_terminals
                    .entry(label.clone())
                    .or_default()
                    .push(key.clone());
            }
        }
        Solution {
            selected,
            chosen_terminals,
            objective_value: z_star,
        }
    }

    pub fn candidates(&self) -> &[Index] {
        self.candidates
    }

    /// Dumps the current model for diagnostics.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        self.model.write(path)
    }
}

#[cfg(test)]
mod tests {
    use super::{Problem, Solution};
    use crate::config::{KeyplanConfig, Objective};
    use crate::executor::Executor;
    use crate::ilp::solver::{BranchBoundSolver, SolverError};
    use crate::index::IndexEnumerator;
    use crate::plan::cost::WideColumnCost;
    use crate::plan::Planner;
    use crate::schema::{EntitySpec, SchemaBuilder};
    use crate::workload::parser::parse_statement;
    use crate::workload::Workload;

    fn setup(
        texts: &[&str],
        config: &KeyplanConfig,
    ) -> Result<Solution, SolverError> {
        let schema = SchemaBuilder::new()
            .entity(
                EntitySpec::new("User", 1000)
                    .id_key("id")
                    .string("name", 20)
                    .int("age"),
            )
            .finish()
            .expect("schema");
        let statements = texts
            .iter()
            .enumerate()
            .map(|(i, t)| parse_statement(&schema, format!("s{i}"), t).expect("parse"))
            .collect();
        let workload = Workload::new(statements);
        let candidates = IndexEnumerator::new(&schema).candidates(&workload);
        let cost = WideColumnCost::default();
        let planner = Planner::new(&schema, &cost, &candidates);
        let matrix = planner
            .cost_matrix(&workload, Executor::Sequential)
            .expect("matrix");
        let mut problem = Problem::build(
            &BranchBoundSolver,
            &workload,
            None,
            &candidates,
            &matrix,
            config,
        )
        .expect("build");
        problem.solve()
    }

    #[test]
    fn selected_indexes_cover_every_chosen_terminal() {
        let solution = setup(
            &["SELECT name FROM User WHERE id = ?"],
            &KeyplanConfig::default(),
        )
        .expect("solve");
        assert!(!solution.chosen_terminals.is_empty());
        assert!(solution.selected.iter().any(|&s| s));
    }

    #[test]
    fn tight_budget_is_infeasible_with_an_iis() {
        let config = KeyplanConfig::default().with_budget(1.0);
        let err = setup(&["SELECT name FROM User WHERE id = ?"], &config)
            .expect_err("budget too small");
        let SolverError::Infeasible { iis } = err else {
            panic!("expected infeasibility");
        };
        assert!(iis.iter().any(|name| name == "space"));
    }

    #[test]
    fn index_count_objective_prefers_fewer_structures() {
        let config = KeyplanConfig::default().with_objective(Objective::Indexes);
        let solution = setup(
            &[
                "SELECT name FROM User WHERE id = ?",
                "SELECT age FROM User WHERE id = ?",
            ],
            &config,
        )
        .expect("solve");
        // One simple index answers both point reads.
        assert_eq!(solution.selected.iter().filter(|&&s| s).count(), 1);
        assert_eq!(solution.objective_value, 1.0);
    }
}
