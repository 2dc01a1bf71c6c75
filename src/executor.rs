use rayon::prelude::*;

/// Explicit parallelism handle threaded from the search driver into the
/// per-statement stages. Enumeration and cost-matrix fill are independent
/// per statement; ILP construction and solving stay serial regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Executor {
    #[default]
    Sequential,
    Parallel,
}

impl Executor {
    /// Maps `f` over `items`, fanning out on the rayon pool when parallel.
    /// Output order follows input order in both modes.
    pub fn map<T, U, F>(self, items: &[T], f: F) -> Vec<U>
    where
        T: Sync,
        U: Send,
        F: Fn(&T) -> U + Sync + Send,
    {
        match self {
            Executor::Sequential => items.iter().map(f).collect(),
            Executor::Parallel => items.par_iter().map(f).collect(),
        }
    }
}
