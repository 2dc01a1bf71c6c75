pub mod file;
pub mod parser;
pub mod statement;

pub use statement::{ConditionOp, Delete, Insert, Query, Statement, Update};

use crate::schema::SchemaError;
use crate::workload::parser::StatementParseError;
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_MIX: &str = "default";

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("workload document is empty")]
    EmptyDocument,
    #[error("unknown field type '{token}' for '{entity}.{field}'")]
    UnknownFieldType {
        entity: String,
        field: String,
        token: String,
    },
    #[error("mix '{mix}' references unknown statement '{statement}'")]
    MixReferencesUnknownStatement { mix: String, statement: String },
    #[error("invalid workload: {message}")]
    Invalid { message: String },
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("statement '{label}': {source}")]
    Statement {
        label: String,
        source: StatementParseError,
    },
}

/// The statements the design must serve, plus named mixes assigning each
/// statement a relative frequency. A statement absent from a mix weighs
/// zero in that mix but still requires a valid plan.
#[derive(Debug, Clone)]
pub struct Workload {
    statements: Vec<Statement>,
    mixes: BTreeMap<String, BTreeMap<String, f64>>,
    default_mix: String,
}

impl Workload {
    /// Workload with a synthetic uniform mix: every statement weighs 1.
    pub fn new(statements: Vec<Statement>) -> Self {
        let weights = statements
            .iter()
            .map(|s| (s.label().to_string(), 1.0))
            .collect();
        let mixes = BTreeMap::from([(DEFAULT_MIX.to_string(), weights)]);
        Self {
            statements,
            mixes,
            default_mix: DEFAULT_MIX.to_string(),
        }
    }

    pub fn with_mixes(
        statements: Vec<Statement>,
        mixes: BTreeMap<String, BTreeMap<String, f64>>,
    ) -> Result<Self, WorkloadError> {
        for (mix, weights) in &mixes {
            for statement in weights.keys() {
                if !statements.iter().any(|s| s.label() == statement) {
                    return Err(WorkloadError::MixReferencesUnknownStatement {
                        mix: mix.clone(),
                        statement: statement.clone(),
                    });
                }
            }
        }
        let default_mix = if mixes.contains_key(DEFAULT_MIX) {
            DEFAULT_MIX.to_string()
        } else {
            mixes
                .keys()
                .next()
                .cloned()
                .unwrap_or_else(|| DEFAULT_MIX.to_string())
        };
        if mixes.is_empty() {
            return Ok(Self::new(statements));
        }
        Ok(Self {
            statements,
            mixes,
            default_mix,
        })
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn queries(&self) -> impl Iterator<Item = &Query> {
        self.statements.iter().filter_map(|s| match s {
            Statement::Query(q) => Some(q),
            _ => None,
        })
    }

    pub fn writes(&self) -> impl Iterator<Item = &Statement> {
        self.statements.iter().filter(|s| s.is_write())
    }

    pub fn has_mix(&self, name: &str) -> bool {
        self.mixes.contains_key(name)
    }

    pub fn mix_names(&self) -> impl Iterator<Item = &str> {
        self.mixes.keys().map(String::as_str)
    }

    pub fn default_mix(&self) -> &str {
        &self.default_mix
    }

    /// Relative frequency of `label` in the given mix (default mix when
    /// `None`).
    pub fn frequency(&self, mix: Option<&str>, label: &str) -> f64 {
        let mix = mix.unwrap_or(&self.default_mix);
        self.mixes
            .get(mix)
            .and_then(|weights| weights.get(label))
            .copied()
            .unwrap_or(0.0)
    }
}
