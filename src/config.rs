use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::executor::Executor;

/// What the optimizer minimizes. `Cost` and `Space` are lexicographically
/// refined by index count in a second solve stage; `Indexes` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    #[default]
    Cost,
    Space,
    Indexes,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown cost model '{name}'")]
    UnknownCostModel { name: String },
    #[error("unknown solver '{name}'")]
    UnknownSolver { name: String },
    #[error("unknown mix '{name}'")]
    UnknownMix { name: String },
    #[error("invalid config: {message}")]
    Invalid { message: String },
}

/// Runtime configuration for one advisor instance.
#[derive(Debug, Clone)]
pub struct KeyplanConfig {
    pub objective: Objective,
    /// Upper bound on the summed size of materialized indexes, in bytes.
    /// `None` means unconstrained.
    pub space_budget: Option<f64>,
    /// Which workload mix weights the statement frequencies. `None` uses
    /// the workload's default mix.
    pub mix: Option<String>,
    pub cost_model: String,
    pub solver: String,
    pub executor: Executor,
}

impl Default for KeyplanConfig {
    fn default() -> Self {
        Self {
            objective: Objective::Cost,
            space_budget: None,
            mix: None,
            cost_model: "wide_column".to_string(),
            solver: "branch_bound".to_string(),
            executor: Executor::Sequential,
        }
    }
}

impl KeyplanConfig {
    /// Profile for interactive exploration: parallel costing, no budget.
    pub fn exploratory() -> Self {
        Self {
            executor: Executor::Parallel,
            ..Self::default()
        }
    }

    /// Profile that minimizes the number of materialized structures first,
    /// useful when operational simplicity outweighs latency.
    pub fn lean(space_budget: f64) -> Self {
        Self {
            objective: Objective::Indexes,
            space_budget: Some(space_budget),
            ..Self::default()
        }
    }

    pub fn with_budget(mut self, budget: f64) -> Self {
        self.space_budget = Some(budget);
        self
    }

    pub fn with_objective(mut self, objective: Objective) -> Self {
        self.objective = objective;
        self
    }

    pub fn with_mix(mut self, mix: impl Into<String>) -> Self {
        self.mix = Some(mix.into());
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(budget) = self.space_budget {
            if !budget.is_finite() || budget < 0.0 {
                return Err(ConfigError::Invalid {
                    message: format!("space budget must be finite and non-negative, got {budget}"),
                });
            }
        }
        Ok(())
    }
}
