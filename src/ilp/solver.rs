use crate::config::ConfigError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub type VarId = usize;
pub type ConstraintId = usize;

const FEASIBILITY_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sense {
    Minimize,
    Maximize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Le,
    Ge,
    Eq,
}

impl Relation {
    fn symbol(self) -> &'static str {
        match self {
            Relation::Le => "<=",
            Relation::Ge => ">=",
            Relation::Eq => "=",
        }
    }
}

/// Linear expression over model variables.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinExpr {
    pub terms: Vec<(VarId, f64)>,
}

impl LinExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(mut self, var: VarId, coef: f64) -> Self {
        self.terms.push((var, coef));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    Unbounded,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SolverError {
    #[error("solver '{name}' is unavailable")]
    Unavailable { name: String },
    #[error("model is infeasible")]
    Infeasible { iis: Vec<String> },
    #[error("objective is unbounded")]
    Unbounded,
    #[error("solver failure: {message}")]
    Failed { message: String },
}

/// One in-flight optimization model. Not thread-safe; owned exclusively by
/// the search driver during a solve.
pub trait SolverModel {
    fn add_binary_var(&mut self, name: &str) -> VarId;
    fn add_continuous_var(&mut self, lo: f64, hi: f64, name: &str) -> VarId;
    fn add_constraint(
        &mut self,
        expr: LinExpr,
        rel: Relation,
        rhs: f64,
        name: &str,
    ) -> ConstraintId;
    fn set_objective(&mut self, var: VarId, sense: Sense);
    fn optimize(&mut self) -> Result<SolveStatus, SolverError>;
    fn value(&self, var: VarId) -> f64;
    /// After an infeasible optimize: names of an irreducible infeasible
    /// constraint subset.
    fn compute_iis(&mut self) -> Vec<String>;
    /// Dumps the model in LP text format for diagnostics.
    fn write(&self, path: &Path) -> std::io::Result<()>;
}

pub trait Solver: Send + Sync {
    fn name(&self) -> &'static str;
    fn new_model(&self) -> Result<Box<dyn SolverModel>, SolverError>;
}

type SolverCtor = Arc<dyn Fn() -> Box<dyn Solver> + Send + Sync>;

/// Name → constructor registry. Unknown names fail fast at config time.
pub struct SolverRegistry {
    inner: RwLock<HashMap<String, SolverCtor>>,
}

impl SolverRegistry {
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry.register("branch_bound", || Box::new(BranchBoundSolver));
        registry
    }

    pub fn register<F>(&self, name: &str, ctor: F)
    where
        F: Fn() -> Box<dyn Solver> + Send + Sync + 'static,
    {
        self.inner
            .write()
            .insert(name.to_string(), Arc::new(ctor));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Solver>, ConfigError> {
        let ctor = self
            .inner
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownSolver {
                name: name.to_string(),
            })?;
        Ok(ctor())
    }
}

impl Default for SolverRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Built-in exact solver for the 0-1 models the problem builder emits:
/// depth-first branch and bound over the binary variables, with continuous
/// variables eliminated through their defining equality constraints.
pub struct BranchBoundSolver;

impl Solver for BranchBoundSolver {
    fn name(&self) -> &'static str {
        "branch_bound"
    }

    fn new_model(&self) -> Result<Box<dyn SolverModel>, SolverError> {
        Ok(Box::new(BranchBoundModel::default()))
    }
}

#[derive(Debug, Clone)]
enum VarKind {
    Binary,
    Continuous { lo: f64, hi: f64 },
}

#[derive(Debug, Clone)]
struct VarDef {
    name: String,
    kind: VarKind,
}

#[derive(Debug, Clone)]
struct ConstraintDef {
    name: String,
    expr: LinExpr,
    rel: Relation,
    rhs: f64,
}

#[derive(Default)]
pub struct BranchBoundModel {
    vars: Vec<VarDef>,
    constraints: Vec<ConstraintDef>,
    objective: Option<(VarId, Sense)>,
    solution: Option<Vec<f64>>,
}

/// A constraint reduced to binary variables only: coefficient per binary
/// plus a constant folded from eliminated continuous terms.
#[derive(Debug, Clone)]
struct Reduced {
    coefs: Vec<f64>,
    constant: f64,
    rel: Relation,
    rhs: f64,
}

impl BranchBoundModel {
    fn binaries(&self) -> Vec<VarId> {
        (0..self.vars.len())
            .filter(|&v| matches!(self.vars[v].kind, VarKind::Binary))
            .collect()
    }

    /// Finds, per continuous variable, the first equality constraint that
    /// pins it to an expression over binaries. Returns the defining
    /// constraint index and the binary expression `(terms, constant)` with
    /// `var = (rhs - terms·b) / coef`.
    fn continuous_definitions(&self) -> Result<HashMap<VarId, (usize, Vec<(VarId, f64)>, f64)>, SolverError> {
        let mut defs: HashMap<VarId, (usize, Vec<(VarId, f64)>, f64)> = HashMap::new();
        for (ci, c) in self.constraints.iter().enumerate() {
            if c.rel != Relation::Eq {
                continue;
            }
            let mut continuous = None;
            let mut ok = true;
            for &(v, coef) in &c.expr.terms {
                match self.vars[v].kind {
                    VarKind::Continuous { .. } => {
                        if continuous.is_some() || coef == 0.0 {
                            ok = false;
                            break;
                        }
                        continuous = Some((v, coef));
                    }
                    VarKind::Binary => {}
                }
            }
            let Some((v, coef)) = continuous else { continue };
            if !ok || defs.contains_key(&v) {
                continue;
            }
            let terms: Vec<(VarId, f64)> = c
                .expr
                .terms
                .iter()
                .filter(|(t, _)| *t != v)
                .map(|&(t, k)| (t, -k / coef))
                .collect();
            let constant = c.rhs / coef;
            defs.insert(v, (ci, terms, constant));
        }
        for (v, def) in self.vars.iter().enumerate() {
            if matches!(def.kind, VarKind::Continuous { .. }) && !defs.contains_key(&v) {
                return Err(SolverError::Failed {
                    message: format!(
                        "continuous variable '{}' has no defining equality",
                        def.name
                    ),
                });
            }
        }
        Ok(defs)
    }

    /// Rewrites every constraint (and continuous bounds) over binaries
    /// only, substituting the continuous definitions.
    fn reduce(
        &self,
        defs: &HashMap<VarId, (usize, Vec<(VarId, f64)>, f64)>,
        order: &[VarId],
    ) -> Vec<Reduced> {
        let slot: HashMap<VarId, usize> = order.iter().enumerate().map(|(i, &v)| (v, i)).collect();
        let mut out = Vec::new();
        let mut push = |terms: Vec<(VarId, f64)>, constant: f64, rel: Relation, rhs: f64| {
            let mut coefs = vec![0.0; order.len()];
            for (v, k) in terms {
                coefs[slot[&v]] += k;
            }
            out.push(Reduced {
                coefs,
                constant,
                rel,
                rhs,
            });
        };

        for (ci, c) in self.constraints.iter().enumerate() {
            // The defining equality of a continuous variable is satisfied
            // by construction once the variable is eliminated.
            if defs.values().any(|(def_ci, _, _)| *def_ci == ci) {
                continue;
            }
            let mut terms: Vec<(VarId, f64)> = Vec::new();
            let mut constant = 0.0;
            for &(v, coef) in &c.expr.terms {
                if let Some((_, def_terms, def_const)) = defs.get(&v) {
                    constant += coef * def_const;
                    for &(t, k) in def_terms {
                        terms.push((t, coef * k));
                    }
                } else {
                    terms.push((v, coef));
                }
            }
            push(terms, constant, c.rel, c.rhs);
        }

        for (&v, (_, def_terms, def_const)) in defs {
            if let VarKind::Continuous { lo, hi } = self.vars[v].kind {
                if lo.is_finite() {
                    push(def_terms.clone(), *def_const, Relation::Ge, lo);
                }
                if hi.is_finite() {
                    push(def_terms.clone(), *def_const, Relation::Le, hi);
                }
            }
        }
        out
    }

    /// DFS over binary assignments, zero-first so ties prefer sparse
    /// solutions. Returns the best assignment under `objective`, or the
    /// first feasible one when `objective` is `None`.
    fn search(
        &self,
        order: &[VarId],
        reduced: &[Reduced],
        objective: Option<(&[f64], f64)>,
    ) -> Option<(Vec<f64>, f64)> {
        struct Ctx<'a> {
            order_len: usize,
            reduced: &'a [Reduced],
            objective: Option<(&'a [f64], f64)>,
            assignment: Vec<f64>,
            best: Option<(Vec<f64>, f64)>,
        }

        fn feasible_bounds(ctx: &Ctx<'_>, depth: usize) -> bool {
            for c in ctx.reduced {
                let mut fixed = c.constant;
                let mut min = 0.0;
                let mut max = 0.0;
                for (i, &k) in c.coefs.iter().enumerate() {
                    if i < depth {
                        fixed += k * ctx.assignment[i];
                    } else if k < 0.0 {
                        min += k;
                    } else {
                        max += k;
                    }
                }
                let lo = fixed + min;
                let hi = fixed + max;
                let violated = match c.rel {
                    Relation::Le => lo > c.rhs + FEASIBILITY_TOLERANCE,
                    Relation::Ge => hi < c.rhs - FEASIBILITY_TOLERANCE,
                    Relation::Eq => {
                        lo > c.rhs + FEASIBILITY_TOLERANCE || hi < c.rhs - FEASIBILITY_TOLERANCE
                    }
                };
                if violated {
                    return false;
                }
            }
            true
        }

        fn objective_lower_bound(ctx: &Ctx<'_>, depth: usize) -> f64 {
            let Some((coefs, constant)) = ctx.objective else {
                return f64::NEG_INFINITY;
            };
            let mut bound = constant;
            for (i, &k) in coefs.iter().enumerate() {
                if i < depth {
                    bound += k * ctx.assignment[i];
                } else if k < 0.0 {
                    bound += k;
                }
            }
            bound
        }

        fn dfs(ctx: &mut Ctx<'_>, depth: usize) {
            if !feasible_bounds(ctx, depth) {
                return;
            }
            if let Some((best_obj, _)) = ctx.best.as_ref().map(|(_, o)| (*o, ())) {
                if objective_lower_bound(ctx, depth) >= best_obj - FEASIBILITY_TOLERANCE {
                    return;
                }
            }
            if depth == ctx.order_len {
                let objective = match ctx.objective {
                    Some((coefs, constant)) => {
                        constant
                            + coefs
                                .iter()
                                .zip(&ctx.assignment)
                                .map(|(k, b)| k * b)
                                .sum::<f64>()
                    }
                    None => 0.0,
                };
                ctx.best = Some((ctx.assignment.clone(), objective));
                return;
            }
            for value in [0.0, 1.0] {
                ctx.assignment[depth] = value;
                dfs(ctx, depth + 1);
                // Feasibility-only search stops at the first solution.
                if ctx.objective.is_none() && ctx.best.is_some() {
                    return;
                }
            }
            ctx.assignment[depth] = 0.0;
        }

        let mut ctx = Ctx {
            order_len: order.len(),
            reduced,
            objective,
            assignment: vec![0.0; order.len()],
            best: None,
        };
        dfs(&mut ctx, 0);
        ctx.best
    }

    fn solve_internal(&self, with_objective: bool) -> Result<Option<Vec<f64>>, SolverError> {
        let defs = self.continuous_definitions()?;
        let order = self.binaries();
        let reduced = self.reduce(&defs, &order);

        let objective_expr = if with_objective {
            match self.objective {
                Some((var, sense)) => {
                    let slot: HashMap<VarId, usize> =
                        order.iter().enumerate().map(|(i, &v)| (v, i)).collect();
                    let mut coefs = vec![0.0; order.len()];
                    let mut constant = 0.0;
                    match self.vars[var].kind {
                        VarKind::Binary => coefs[slot[&var]] = 1.0,
                        VarKind::Continuous { .. } => {
                            let (_, terms, def_const) = &defs[&var];
                            constant = *def_const;
                            for &(t, k) in terms {
                                coefs[slot[&t]] += k;
                            }
                        }
                    }
                    if sense == Sense::Maximize {
                        for k in &mut coefs {
                            *k = -*k;
                        }
                        constant = -constant;
                    }
                    Some((coefs, constant))
                }
                None => None,
            }
        } else {
            None
        };

        let found = self.search(
            &order,
            &reduced,
            objective_expr.as_ref().map(|(c, k)| (c.as_slice(), *k)),
        );
        let Some((assignment, _)) = found else {
            return Ok(None);
        };

        let mut values = vec![0.0; self.vars.len()];
        for (i, &v) in order.iter().enumerate() {
            values[v] = assignment[i];
        }
        for (&v, (_, terms, constant)) in &defs {
            values[v] = constant
                + terms
                    .iter()
                    .map(|&(t, k)| k * values[t])
                    .sum::<f64>();
        }
        Ok(Some(values))
    }
}

impl SolverModel for BranchBoundModel {
    fn add_binary_var(&mut self, name: &str) -> VarId {
        self.vars.push(VarDef {
            name: name.to_string(),
            kind: VarKind::Binary,
        });
        self.vars.len() - 1
    }

    fn add_continuous_var(&mut self, lo: f64, hi: f64, name: &str) -> VarId {
        self.vars.push(VarDef {
            name: name.to_string(),
            kind: VarKind::Continuous { lo, hi },
        });
        self.vars.len() - 1
    }

    fn add_constraint(
        &mut self,
        expr: LinExpr,
        rel: Relation,
        rhs: f64,
        name: &str,
    ) -> ConstraintId {
        self.constraints.push(ConstraintDef {
            name: name.to_string(),
            expr,
            rel,
            rhs,
        });
        self.constraints.len() - 1
    }

    fn set_objective(&mut self, var: VarId, sense: Sense) {
        self.objective = Some((var, sense));
    }

    fn optimize(&mut self) -> Result<SolveStatus, SolverError> {
        self.solution = None;
        match self.solve_internal(true)? {
            Some(values) => {
                self.solution = Some(values);
                Ok(SolveStatus::Optimal)
            }
            None => Ok(SolveStatus::Infeasible),
        }
    }

    fn value(&self, var: VarId) -> f64 {
        self.solution
            .as_ref()
            .map(|values| values[var])
            .unwrap_or(0.0)
    }

    /// Greedy deletion filter: drop every constraint whose removal keeps
    /// the model infeasible; what remains is irreducible.
    fn compute_iis(&mut self) -> Vec<String> {
        let mut kept: Vec<ConstraintDef> = self.constraints.clone();
        let mut i = 0;
        while i < kept.len() {
            let mut trial = kept.clone();
            trial.remove(i);
            let probe = BranchBoundModel {
                vars: self.vars.clone(),
                constraints: trial.clone(),
                objective: None,
                solution: None,
            };
            if matches!(probe.solve_internal(false), Ok(None)) {
                kept = trial;
            } else {
                i += 1;
            }
        }
        kept.into_iter().map(|c| c.name).collect()
    }

    fn write(&self, path: &Path) -> std::io::Result<()> {
        let mut out = std::fs::File::create(path)?;
        writeln!(out, "Minimize")?;
        match self.objective {
            Some((var, _)) => writeln!(out, " obj: {}", self.vars[var].name)?,
            None => writeln!(out, " obj: 0")?,
        }
        writeln!(out, "Subject To")?;
        for c in &self.constraints {
            let terms = c
                .expr
                .terms
                .iter()
                .map(|&(v, k)| format!("{:+} {}", k, self.vars[v].name))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(out, " {}: {} {} {}", c.name, terms, c.rel.symbol(), c.rhs)?;
        }
        writeln!(out, "Bounds")?;
        for v in &self.vars {
            if let VarKind::Continuous { lo, hi } = v.kind {
                writeln!(out, " {} <= {} <= {}", lo, v.name, hi)?;
            }
        }
        writeln!(out, "Binaries")?;
        for v in &self.vars {
            if matches!(v.kind, VarKind::Binary) {
                writeln!(out, " {}", v.name)?;
            }
        }
        writeln!(out, "End")
    }
}
