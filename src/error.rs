use crate::config::ConfigError;
use crate::ilp::solver::SolverError;
use crate::plan::planner::PlanError;
use crate::schema::SchemaError;
use crate::workload::parser::StatementParseError;
use crate::workload::WorkloadError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyplanErrorCode {
    Io,
    Schema,
    StatementParse,
    Workload,
    Plan,
    SolverInfeasible,
    SolverUnavailable,
    Solver,
    Config,
}

impl KeyplanErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyplanErrorCode::Io => "io",
            KeyplanErrorCode::Schema => "schema",
            KeyplanErrorCode::StatementParse => "statement_parse",
            KeyplanErrorCode::Workload => "workload",
            KeyplanErrorCode::Plan => "plan",
            KeyplanErrorCode::SolverInfeasible => "solver_infeasible",
            KeyplanErrorCode::SolverUnavailable => "solver_unavailable",
            KeyplanErrorCode::Solver => "solver",
            KeyplanErrorCode::Config => "config",
        }
    }
}

#[derive(Debug, Error)]
pub enum KeyplanError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    StatementParse(#[from] StatementParseError),
    #[error(transparent)]
    Workload(#[from] WorkloadError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Solver(#[from] SolverError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl KeyplanError {
    pub fn code(&self) -> KeyplanErrorCode {
        match self {
            KeyplanError::Io(_) => KeyplanErrorCode::Io,
            KeyplanError::Schema(_) => KeyplanErrorCode::Schema,
            KeyplanError::StatementParse(_) => KeyplanErrorCode::StatementParse,
            KeyplanError::Workload(_) => KeyplanErrorCode::Workload,
            KeyplanError::Plan(_) => KeyplanErrorCode::Plan,
            KeyplanError::Solver(SolverError::Infeasible { .. }) => {
                KeyplanErrorCode::SolverInfeasible
            }
            KeyplanError::Solver(SolverError::Unavailable { .. }) => {
                KeyplanErrorCode::SolverUnavailable
            }
            KeyplanError::Solver(_) => KeyplanErrorCode::Solver,
            KeyplanError::Config(_) => KeyplanErrorCode::Config,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Process exit code for CLI front-ends: 2 = infeasible, 3 = invalid
    /// workload, 4 = solver unavailable, 1 = anything else. A successful
    /// search exits 0 and never constructs this type.
    pub fn exit_code(&self) -> i32 {
        match self.code() {
            KeyplanErrorCode::SolverInfeasible => 2,
            KeyplanErrorCode::Schema
            | KeyplanErrorCode::StatementParse
            | KeyplanErrorCode::Workload => 3,
            KeyplanErrorCode::SolverUnavailable => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyplanError, KeyplanErrorCode};
    use crate::ilp::solver::SolverError;
    use crate::schema::SchemaError;

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(
            KeyplanErrorCode::SolverInfeasible.as_str(),
            "solver_infeasible"
        );
        assert_eq!(KeyplanErrorCode::StatementParse.as_str(), "statement_parse");
        assert_eq!(KeyplanErrorCode::Config.as_str(), "config");
    }

    #[test]
    fn exit_codes_match_cli_contract() {
        let infeasible = KeyplanError::Solver(SolverError::Infeasible { iis: Vec::new() });
        assert_eq!(infeasible.exit_code(), 2);

        let schema = KeyplanError::Schema(SchemaError::UnknownEntity {
            name: "User".into(),
        });
        assert_eq!(schema.exit_code(), 3);

        let unavailable = KeyplanError::Solver(SolverError::Unavailable {
            name: "gurobi".into(),
        });
        assert_eq!(unavailable.exit_code(), 4);
    }
}
