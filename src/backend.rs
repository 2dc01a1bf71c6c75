use crate::search::{ChosenIndex, SearchResult};

/// Consumer of a finished design. Implementations translate each chosen
/// index into backend DDL and each plan step into backend calls; none
/// ship in this crate.
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    /// DDL creating the materialized structure behind one chosen index.
    fn index_ddl(&self, index: &ChosenIndex) -> String;

    /// Backend invocation for one plan step.
    fn step_call(&self, step: &crate::plan::Step) -> String;

    /// Renders the whole design: DDL for every index, then the calls of
    /// every plan in statement order.
    fn render(&self, result: &SearchResult) -> Vec<String> {
        let mut out: Vec<String> = result
            .indexes
            .iter()
            .map(|index| self.index_ddl(index))
            .collect();
        for plan in &result.plans {
            for step in &plan.steps {
                out.push(self.step_call(step));
            }
        }
        out
    }
}
