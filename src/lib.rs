pub mod backend;
pub mod config;
pub mod error;
pub mod executor;
pub mod ilp;
pub mod index;
pub mod plan;
pub mod schema;
pub mod search;
pub mod workload;

pub use config::{KeyplanConfig, Objective};
pub use error::{KeyplanError, KeyplanErrorCode};
pub use executor::Executor;
pub use search::{ChosenIndex, SearchResult};

use crate::ilp::solver::{Solver, SolverRegistry};
use crate::index::{Index, IndexEnumerator};
use crate::plan::cost::{CostModel, CostModelRegistry};
use crate::schema::Schema;
use crate::workload::Workload;

/// Physical-design advisor for denormalized wide-column stores: given a
/// schema and a weighted workload, selects the set of materialized indexes
/// minimizing the configured objective, subject to the space budget and to
/// every statement having a valid execution plan.
///
/// Plugin resolution happens once at construction; unknown cost-model or
/// solver names fail here rather than mid-search.
pub struct Advisor {
    config: KeyplanConfig,
    cost_model: Box<dyn CostModel>,
    solver: Box<dyn Solver>,
}

impl std::fmt::Debug for Advisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advisor")
            .field("config", &self.config)
            .field("cost_model", &self.cost_model.name())
            .field("solver", &self.solver.name())
            .finish()
    }
}

impl Advisor {
    pub fn new(config: KeyplanConfig) -> Result<Advisor, KeyplanError> {
        Self::with_registries(
            config,
            &CostModelRegistry::with_builtins(),
            &SolverRegistry::with_builtins(),
        )
    }

    /// Constructor for callers bringing their own plugins.
    pub fn with_registries(
        config: KeyplanConfig,
        cost_models: &CostModelRegistry,
        solvers: &SolverRegistry,
    ) -> Result<Advisor, KeyplanError> {
        config.validate()?;
        let cost_model = cost_models.create(&config.cost_model)?;
        let solver = solvers.create(&config.solver)?;
        Ok(Advisor {
            config,
            cost_model,
            solver,
        })
    }

    pub fn config(&self) -> &KeyplanConfig {
        &self.config
    }

    /// Full pipeline: enumerate, cost, solve, assemble.
    pub fn search(
        &self,
        schema: &Schema,
        workload: &Workload,
    ) -> Result<SearchResult, KeyplanError> {
        search::search(
            schema,
            workload,
            &self.config,
            self.cost_model.as_ref(),
            self.solver.as_ref(),
        )
    }

    /// Candidate enumeration alone, for diagnostics. Stays usable when the
    /// configured solver is unreachable at solve time.
    pub fn enumerate(&self, schema: &Schema, workload: &Workload) -> Vec<Index> {
        IndexEnumerator::new(schema).candidates(workload)
    }
}
