use crate::index::Index;
use crate::schema::{FieldId, KeyPath, Schema};
use crate::workload::{Statement, Workload};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Produces the finite candidate set `I*`: every index any valid plan over
/// the workload could use. Pure with respect to the workload; results are
/// memoized per (statement, sub-path).
pub struct IndexEnumerator<'a> {
    schema: &'a Schema,
    memo: HashMap<(String, KeyPath), Vec<Index>>,
}

/// Fields of one statement projected onto a sub-path.
struct SubpathFields {
    eq: Vec<FieldId>,
    range: Option<FieldId>,
    order: Vec<FieldId>,
    all: Vec<FieldId>,
}

impl<'a> IndexEnumerator<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self {
            schema,
            memo: HashMap::new(),
        }
    }

    /// Enumerates candidates for the whole workload, deduplicated by index
    /// key and sorted by it for deterministic downstream ordering.
    ///
    /// Runs to a fixpoint: writes need support queries against candidate
    /// indexes, and those support queries need candidates of their own.
    /// Each round only adds indexes, so the loop terminates once a round
    /// discovers nothing new.
    pub fn candidates(&mut self, workload: &Workload) -> Vec<Index> {
        let mut pool: BTreeMap<String, Index> = BTreeMap::new();

        for statement in workload.statements() {
            self.statement_candidates(statement, &mut pool);
        }

        loop {
            let round: Vec<Index> = pool.values().cloned().collect();
            let before = pool.len();
            for write in workload.writes() {
                for index in &round {
                    for support in write.support_queries(self.schema, index) {
                        self.statement_candidates(&Statement::Query(support), &mut pool);
                    }
                }
            }
            if pool.len() == before {
                break;
            }
        }

        pool.into_values().collect()
    }

    fn statement_candidates(&mut self, statement: &Statement, pool: &mut BTreeMap<String, Index>) {
        let path = statement.path().clone();
        for entity in path.entities(self.schema) {
            let simple = Index::simple(self.schema, entity);
            pool.entry(simple.key().to_string()).or_insert(simple);
        }
        if matches!(statement, Statement::Insert(_)) {
            return;
        }
        for start in 0..path.len() {
            for end in start + 1..=path.len() {
                let sub = path.subpath(self.schema, start, end);
                for index in self.subpath_candidates(statement, &sub) {
                    pool.entry(index.key().to_string()).or_insert(index);
                }
            }
        }
    }

    fn subpath_candidates(&mut self, statement: &Statement, sub: &KeyPath) -> Vec<Index> {
        let memo_key = (statement.label().to_string(), sub.clone());
        if let Some(cached) = self.memo.get(&memo_key) {
            return cached.clone();
        }

        let fields = self.project_fields(statement, sub);
        let anchor = self.schema.id_field(sub.first_entity(self.schema));
        let last_id = self.schema.id_field(sub.last_entity(self.schema));
        let first_entity = sub.first_entity(self.schema);

        // Hash candidates come from the statement's equality fields on the
        // sub-path, plus the anchor identity key so chained lookups can be
        // keyed by ids fetched upstream.
        let mut hash_pool = fields.eq.clone();
        if !hash_pool.contains(&anchor) {
            hash_pool.push(anchor);
        }

        let mut out = Vec::new();
        for mask in 1u32..(1 << hash_pool.len()) {
            let hash: Vec<FieldId> = hash_pool
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, &f)| f)
                .collect();
            if !hash
                .iter()
                .any(|&f| self.schema.field(f).parent == first_entity)
            {
                continue;
            }

            let remaining: Vec<FieldId> = fields
                .eq
                .iter()
                .copied()
                .filter(|f| !hash.contains(f))
                .collect();
            for perm in permutations(&remaining) {
                let mut order: Vec<FieldId> = Vec::new();
                let mut push_order = |f: FieldId, order: &mut Vec<FieldId>| {
                    if !hash.contains(&f) && !order.contains(&f) {
                        order.push(f);
                    }
                };
                for f in &perm {
                    push_order(*f, &mut order);
                }
                if let Some(range) = fields.range {
                    push_order(range, &mut order);
                }
                for f in &fields.order {
                    push_order(*f, &mut order);
                }
                push_order(last_id, &mut order);

                // Both the covering variant (all referenced fields stored)
                // and the key-only variant: the latter is what a plan
                // chains through before re-fetching payload elsewhere, and
                // is untouched by writes to non-key fields.
                let full: BTreeSet<FieldId> = fields
                    .all
                    .iter()
                    .copied()
                    .filter(|f| !hash.contains(f) && !order.contains(f))
                    .collect();
                for extra in [full, BTreeSet::new()] {
                    if let Ok(index) = Index::new(
                        self.schema,
                        hash.iter().copied(),
                        order.iter().copied(),
                        extra,
                        sub.clone(),
                    ) {
                        if !out.iter().any(|i: &Index| i.key() == index.key()) {
                            out.push(index);
                        }
                    }
                }
            }
        }

        self.memo.insert(memo_key, out.clone());
        out
    }

    fn project_fields(&self, statement: &Statement, sub: &KeyPath) -> SubpathFields {
        let on_sub = |f: FieldId| sub.find_field_parent(self.schema, f).is_some();
        SubpathFields {
            eq: statement
                .eq_fields()
                .iter()
                .copied()
                .filter(|&f| on_sub(f))
                .collect(),
            range: statement.range_field().filter(|&f| on_sub(f)),
            order: statement
                .order_fields()
                .iter()
                .copied()
                .filter(|&f| on_sub(f))
                .collect(),
            all: statement
                .all_fields(self.schema)
                .into_iter()
                .filter(|&f| on_sub(f))
                .collect(),
        }
    }
}

fn permutations(items: &[FieldId]) -> Vec<Vec<FieldId>> {
    if items.is_empty() {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for (i, &head) in items.iter().enumerate() {
        let mut rest: Vec<FieldId> = items.to_vec();
        rest.remove(i);
        for mut tail in permutations(&rest) {
            tail.insert(0, head);
            out.push(tail);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::IndexEnumerator;
    use crate::index::Index;
    use crate::schema::{Arity, EntitySpec, SchemaBuilder};
    use crate::workload::parser::parse_statement;
    use crate::workload::Workload;
    use proptest::prelude::*;

    fn schema() -> crate::schema::Schema {
        SchemaBuilder::new()
            .entity(
                EntitySpec::new("User", 10)
                    .id_key("id")
                    .string("name", 20)
                    .foreign_key("tweets", "Tweet", Arity::Many),
            )
            .entity(
                EntitySpec::new("Tweet", 100)
                    .id_key("id")
                    .string("body", 140)
                    .date("ts")
                    .foreign_key("author", "User", Arity::One),
            )
            .finish()
            .expect("schema")
    }

    fn candidates_for(schema: &crate::schema::Schema, texts: &[&str]) -> Vec<Index> {
        let statements = texts
            .iter()
            .enumerate()
            .map(|(i, text)| parse_statement(schema, format!("s{i}"), text).expect("parse"))
            .collect();
        IndexEnumerator::new(schema).candidates(&Workload::new(statements))
    }

    #[test]
    fn single_entity_read_yields_its_materialized_view() {
        let schema = schema();
        let user = schema.entity_by_name("User").unwrap();
        let name = schema.field_by_name(user, "name").unwrap();
        let found = candidates_for(&schema, &["SELECT name FROM User WHERE id = ?"]);
        // The view of the query itself: hash on id, name stored.
        assert!(found.iter().any(|i| {
            i.hash_fields() == [schema.id_field(user)]
                && i.order_fields().is_empty()
                && i.extra_fields().contains(&name)
        }));
    }

    #[test]
    fn join_query_yields_the_covering_index() {
        let schema = schema();
        let user = schema.entity_by_name("User").unwrap();
        let tweet = schema.entity_by_name("Tweet").unwrap();
        let name = schema.field_by_name(user, "name").unwrap();
        let ts = schema.field_by_name(tweet, "ts").unwrap();
        let body = schema.field_by_name(tweet, "body").unwrap();

        let found = candidates_for(
            &schema,
            &["SELECT Tweet.body FROM User.tweets WHERE User.name = ? ORDER BY Tweet.ts LIMIT 10"],
        );
        assert!(found.iter().any(|i| {
            i.hash_fields() == [name]
                && i.order_fields() == [ts, schema.id_field(tweet)]
                && i.extra_fields().contains(&body)
        }));
        // The chaining variant keyed by the anchor identity also exists.
        assert!(found
            .iter()
            .any(|i| i.path().len() == 2 && i.hash_fields() == [schema.id_field(user)]));
    }

    #[test]
    fn every_touched_entity_gets_its_simple_index() {
        let schema = schema();
        let user = schema.entity_by_name("User").unwrap();
        let tweet = schema.entity_by_name("Tweet").unwrap();
        let found = candidates_for(&schema, &["SELECT Tweet.body FROM User.tweets"]);
        let user_simple = Index::simple(&schema, user);
        let tweet_simple = Index::simple(&schema, tweet);
        assert!(found.iter().any(|i| i.key() == user_simple.key()));
        assert!(found.iter().any(|i| i.key() == tweet_simple.key()));
    }

    #[test]
    fn enumeration_is_deduplicated_and_sorted_by_key() {
        let schema = schema();
        let found = candidates_for(
            &schema,
            &[
                "SELECT name FROM User WHERE id = ?",
                "SELECT name FROM User WHERE id = ?",
            ],
        );
        let mut keys: Vec<&str> = found.iter().map(|i| i.key()).collect();
        let deduped = keys.clone();
        keys.sort();
        keys.dedup();
        assert_eq!(keys, deduped);
    }

    proptest! {
        // Enumerated indexes always satisfy the structural invariants:
        // disjoint roles, fields on path, keyed last entity.
        #[test]
        fn enumerated_indexes_are_well_formed(seed in 0usize..4) {
            let schema = schema();
            let texts = [
                "SELECT name FROM User WHERE id = ?",
                "SELECT Tweet.body FROM User.tweets WHERE User.name = ? ORDER BY Tweet.ts",
                "SELECT body FROM Tweet WHERE Tweet.ts > ?",
                "UPDATE Tweet SET body = ? WHERE Tweet.id = ?",
            ];
            let found = candidates_for(&schema, &texts[..=seed]);
            for index in &found {
                let in_key: std::collections::BTreeSet<_> = index
                    .hash_fields()
                    .iter()
                    .chain(index.order_fields().iter())
                    .collect();
                for f in index.extra_fields() {
                    prop_assert!(!in_key.contains(f));
                }
                for f in index.all_fields() {
                    prop_assert!(index.path().find_field_parent(&schema, f).is_some());
                }
                prop_assert!(!index.hash_fields().is_empty());
            }
        }
    }
}
