use crate::config::ConfigError;
use crate::index::Index;
use crate::plan::PlanState;
use crate::schema::FieldId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Pluggable cost model: one scalar per plan step, plus the maintenance
/// costs writes pay per affected index entry. `state` describes the work
/// of the step being costed (partitions touched, rows flowing).
pub trait CostModel: Send + Sync {
    fn name(&self) -> &'static str;
    fn index_lookup_cost(&self, index: &Index, state: &PlanState) -> f64;
    fn filter_cost(&self, fields: &[FieldId], range: bool, state: &PlanState) -> f64;
    fn sort_cost(&self, fields: &[FieldId], state: &PlanState) -> f64;
    fn limit_cost(&self, count: u64, state: &PlanState) -> f64;
    fn insert_cost(&self, index: &Index, state: &PlanState) -> f64;
    fn delete_cost(&self, index: &Index, state: &PlanState) -> f64;
}

/// Default model for partitioned wide-column stores: a lookup pays one
/// seek per partition touched plus a per-row transfer; client-side
/// filtering is cheap, sorting is n log n, maintenance pays a write per
/// entry.
#[derive(Debug, Clone)]
pub struct WideColumnCost {
    pub partition_seek: f64,
    pub row_read: f64,
    pub row_filter: f64,
    pub row_sort: f64,
    pub row_write: f64,
}

impl Default for WideColumnCost {
    fn default() -> Self {
        Self {
            partition_seek: 1.0,
            row_read: 0.01,
            row_filter: 0.001,
            row_sort: 0.005,
            row_write: 1.0,
        }
    }
}

impl CostModel for WideColumnCost {
    fn name(&self) -> &'static str {
        "wide_column"
    }

    fn index_lookup_cost(&self, index: &Index, state: &PlanState) -> f64 {
        self.partition_seek * state.partitions
            + self.row_read * state.cardinality * index.entry_size() as f64
    }

    fn filter_cost(&self, _fields: &[FieldId], _range: bool, state: &PlanState) -> f64 {
        self.row_filter * state.cardinality
    }

    fn sort_cost(&self, _fields: &[FieldId], state: &PlanState) -> f64 {
        let n = state.cardinality.max(1.0);
        self.row_sort * n * n.log2().max(1.0)
    }

    fn limit_cost(&self, _count: u64, _state: &PlanState) -> f64 {
        0.0
    }

    fn insert_cost(&self, _index: &Index, state: &PlanState) -> f64 {
        self.row_write * state.cardinality
    }

    fn delete_cost(&self, _index: &Index, state: &PlanState) -> f64 {
        self.row_write * state.cardinality
    }
}

/// Diagnostic model: every step costs one unit, so plan cost equals plan
/// length. Useful for inspecting enumeration without cardinality noise.
#[derive(Debug, Clone, Default)]
pub struct StepCountCost;

impl CostModel for StepCountCost {
    fn name(&self) -> &'static str {
        "step_count"
    }

    fn index_lookup_cost(&self, _index: &Index, _state: &PlanState) -> f64 {
        1.0
    }

    fn filter_cost(&self, _fields: &[FieldId], _range: bool, _state: &PlanState) -> f64 {
        1.0
    }

    fn sort_cost(&self, _fields: &[FieldId], _state: &PlanState) -> f64 {
        1.0
    }

    fn limit_cost(&self, _count: u64, _state: &PlanState) -> f64 {
        1.0
    }

    fn insert_cost(&self, _index: &Index, _state: &PlanState) -> f64 {
        1.0
    }

    fn delete_cost(&self, _index: &Index, _state: &PlanState) -> f64 {
        1.0
    }
}

type CostModelCtor = Arc<dyn Fn() -> Box<dyn CostModel> + Send + Sync>;

/// Name → constructor registry. Unknown names fail fast at config time.
pub struct CostModelRegistry {
    inner: RwLock<HashMap<String, CostModelCtor>>,
}

impl CostModelRegistry {
    pub fn empty() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_builtins() -> Self {
        let registry = Self::empty();
        registry.register("wide_column", || Box::<WideColumnCost>::default());
        registry.register("step_count", || Box::new(StepCountCost));
        registry
    }

    pub fn register<F>(&self, name: &str, ctor: F)
    where
        F: Fn() -> Box<dyn CostModel> + Send + Sync + 'static,
    {
        self.inner
            .write()
            .insert(name.to_string(), Arc::new(ctor));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn CostModel>, ConfigError> {
        let ctor = self
            .inner
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownCostModel {
                name: name.to_string(),
            })?;
        Ok(ctor())
    }
}

impl Default for CostModelRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::CostModelRegistry;

    #[test]
    fn builtins_are_registered() {
        let registry = CostModelRegistry::with_builtins();
        assert_eq!(registry.create("wide_column").unwrap().name(), "wide_column");
        assert_eq!(registry.create("step_count").unwrap().name(), "step_count");
    }

    #[test]
    fn unknown_name_fails_fast() {
        let registry = CostModelRegistry::with_builtins();
        assert!(registry.create("oracle").is_err());
    }
}
