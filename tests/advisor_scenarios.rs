use keyplan::config::{KeyplanConfig, Objective};
use keyplan::error::KeyplanError;
use keyplan::ilp::solver::SolverError;
use keyplan::plan::StepKind;
use keyplan::schema::{Arity, EntitySpec, Schema, SchemaBuilder};
use keyplan::workload::parser::parse_statement;
use keyplan::workload::{Statement, Workload};
use keyplan::Advisor;
use std::collections::BTreeMap;

fn feed_schema() -> Schema {
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

fn statements(schema: &Schema, texts: &[(&str, &str)]) -> Vec<Statement> {
    texts
        .iter()
        .map(|(label, text)| parse_statement(schema, *label, text).expect("parse"))
        .collect()
}

#[test]
fn single_entity_read_materializes_the_query_view() {
    let schema = SchemaBuilder::new()
        .entity(
            EntitySpec::new("User", 1000)
                .id_key("id")
                .string("name", 20)
                .int("age"),
        )
        .finish()
        .expect("schema");
    let workload = Workload::new(statements(
        &schema,
        &[("lookup", "SELECT name FROM User WHERE id = ?")],
    ));

    let advisor = Advisor::new(KeyplanConfig::default()).expect("advisor");
    let result = advisor.search(&schema, &workload).expect("search");

    let user = schema.entity_by_name("User").unwrap();
    let name = schema.field_by_name(user, "name").unwrap();
    assert_eq!(result.indexes.len(), 1);
    let index = &result.indexes[0].index;
    assert_eq!(index.hash_fields(), &[schema.id_field(user)]);
    assert!(index.order_fields().is_empty());
    assert_eq!(
        index.extra_fields().iter().copied().collect::<Vec<_>>(),
        vec![name]
    );

    let plan = result.plan_for("lookup").expect("plan");
    assert_eq!(plan.steps.len(), 1);
    assert!(matches!(plan.steps[0].kind, StepKind::IndexLookup { .. }));
    // One partition seek plus one 28-byte row under the default model.
    assert!((result.total_cost - 1.28).abs() < 1e-9);
    assert!((result.objective_value - result.total_cost).abs() < 1e-6);
}

#[test]
fn join_with_order_and_limit_picks_the_covering_index() {
    let schema = feed_schema();
    let workload = Workload::new(statements(
        &schema,
        &[(
            "feed",
            "SELECT Tweet.body FROM User.tweets WHERE User.name = ? ORDER BY Tweet.ts LIMIT 10",
        )],
    ));

    let advisor = Advisor::new(KeyplanConfig::default()).expect("advisor");
    let result = advisor.search(&schema, &workload).expect("search");

    let user = schema.entity_by_name("User").unwrap();
    let tweet = schema.entity_by_name("Tweet").unwrap();
    let name = schema.field_by_name(user, "name").unwrap();
    let ts = schema.field_by_name(tweet, "ts").unwrap();
    let body = schema.field_by_name(tweet, "body").unwrap();

    assert_eq!(result.indexes.len(), 1);
    let index = &result.indexes[0].index;
    assert_eq!(index.hash_fields(), &[name]);
    assert_eq!(index.order_fields(), &[ts, schema.id_field(tweet)]);
    assert!(index.extra_fields().contains(&body));

    let plan = result.plan_for("feed").expect("plan");
    // Single covering lookup, then the limit cutoff; the sort order comes
    // free from the index.
    assert_eq!(
        plan.steps
            .iter()
            .filter(|s| matches!(s.kind, StepKind::IndexLookup { .. }))
            .count(),
        1
    );
    assert!(plan
        .steps
        .iter()
        .all(|s| !matches!(s.kind, StepKind::Sort { .. })));
    assert!(matches!(
        plan.steps.last().unwrap().kind,
        StepKind::Limit { count: 10 }
    ));
}

#[test]
fn binding_budget_surfaces_infeasibility_with_an_iis() {
    let schema = SchemaBuilder::new()
        .entity(
            EntitySpec::new("User", 1000)
                .id_key("id")
                .string("name", 20),
        )
        .entity(
            EntitySpec::new("Post", 100)
                .id_key("id")
                .string("body", 140),
        )
        .finish()
        .expect("schema");
    let stmts = statements(
        &schema,
        &[
            ("users", "SELECT name FROM User WHERE id = ?"),
            ("posts", "SELECT body FROM Post WHERE id = ?"),
        ],
    );

    // The two materialized views need 28000 + 14800 bytes; nothing is
    // shareable across entities.
    let tight = KeyplanConfig::default().with_budget(40_000.0);
    let advisor = Advisor::new(tight).expect("advisor");
    let err = advisor
        .search(&schema, &Workload::new(stmts.clone()))
        .expect_err("budget binds");
    assert_eq!(err.exit_code(), 2);
    let KeyplanError::Solver(SolverError::Infeasible { iis }) = err else {
        panic!("expected infeasibility, got {err}");
    };
    assert!(iis.iter().any(|name| name == "space"));

    // With headroom the search succeeds and respects the budget.
    let roomy = KeyplanConfig::default().with_budget(50_000.0);
    let advisor = Advisor::new(roomy).expect("advisor");
    let result = advisor
        .search(&schema, &Workload::new(stmts))
        .expect("feasible");
    assert!(result.total_size <= 50_000.0);
}

fn feed_workload_with_update(schema: &Schema, update_weight: f64) -> Workload {
    let stmts = statements(
        schema,
        &[
            (
                "feed",
                "SELECT Tweet.body FROM User.tweets WHERE User.name = ? ORDER BY Tweet.ts LIMIT 10",
            ),
            ("touch", "UPDATE Tweet SET body = ? WHERE Tweet.id = ?"),
        ],
    );
    let mixes = BTreeMap::from([(
        "default".to_string(),
        BTreeMap::from([
            ("feed".to_string(), 1.0),
            ("touch".to_string(), update_weight),
        ]),
    )]);
    Workload::with_mixes(stmts, mixes).expect("mixes")
}

#[test]
fn frequent_updates_drop_the_wide_covering_index() {
    let schema = feed_schema();
    let tweet = schema.entity_by_name("Tweet").unwrap();
    let body = schema.field_by_name(tweet, "body").unwrap();
    let advisor = Advisor::new(KeyplanConfig::default()).expect("advisor");

    // Read-heavy: the wide join index is worth its maintenance.
    let read_heavy = advisor
        .search(&schema, &feed_workload_with_update(&schema, 0.1))
        .expect("read heavy");
    assert!(read_heavy
        .indexes
        .iter()
        .any(|c| c.index.path().len() == 2 && c.index.contains_field(body)));

    // Write-heavy: the mutated payload moves out of the join index; the
    // plan chains a key-only join index into a per-entity fetch instead.
    let write_heavy = advisor
        .search(&schema, &feed_workload_with_update(&schema, 20.0))
        .expect("write heavy");
    assert!(write_heavy
        .indexes
        .iter()
        .all(|c| !(c.index.path().len() == 2 && c.index.contains_field(body))));
    let feed_plan = write_heavy.plan_for("feed").expect("feed plan");
    assert!(
        feed_plan
            .steps
            .iter()
            .filter(|s| matches!(s.kind, StepKind::IndexLookup { .. }))
            .count()
            > 1
    );
}

#[test]
fn read_only_workloads_keep_the_covering_index_regardless_of_update_cost() {
    let schema = feed_schema();
    let tweet = schema.entity_by_name("Tweet").unwrap();
    let body = schema.field_by_name(tweet, "body").unwrap();
    let workload = Workload::new(statements(
        &schema,
        &[(
            "feed",
            "SELECT Tweet.body FROM User.tweets WHERE User.name = ? ORDER BY Tweet.ts LIMIT 10",
        )],
    ));
    let advisor = Advisor::new(KeyplanConfig::default()).expect("advisor");
    let result = advisor.search(&schema, &workload).expect("search");
    assert!(result
        .indexes
        .iter()
        .any(|c| c.index.path().len() == 2 && c.index.contains_field(body)));
}

#[test]
fn index_count_objective_consolidates_onto_fewer_structures() {
    let schema = SchemaBuilder::new()
        .entity(
            EntitySpec::new("User", 1000)
                .id_key("id")
                .string("name", 20)
                .int("age"),
        )
        .finish()
        .expect("schema");
    let stmts = statements(
        &schema,
        &[
            ("names", "SELECT name FROM User WHERE id = ?"),
            ("ages", "SELECT age FROM User WHERE id = ?"),
        ],
    );

    // Cost-optimal: one narrow view per query.
    let by_cost = Advisor::new(KeyplanConfig::default())
        .expect("advisor")
        .search(&schema, &Workload::new(stmts.clone()))
        .expect("cost search");
    assert_eq!(by_cost.indexes.len(), 2);

    // Fewest-structures: the single simple index covers both reads, even
    // though each read now drags the unneeded column.
    let by_count = Advisor::new(
        KeyplanConfig::default().with_objective(Objective::Indexes),
    )
    .expect("advisor")
    .search(&schema, &Workload::new(stmts))
    .expect("count search");
    assert_eq!(by_count.indexes.len(), 1);
    assert_eq!(by_count.objective_value, 1.0);
    assert!(by_count.total_cost >= by_cost.total_cost);
}

#[test]
fn every_plan_references_only_chosen_indexes() {
    let schema = feed_schema();
    let workload = feed_workload_with_update(&schema, 2.0);
    let advisor = Advisor::new(KeyplanConfig::default()).expect("advisor");
    let result = advisor.search(&schema, &workload).expect("search");

    for plan in &result.plans {
        for key in plan.index_keys() {
            assert!(
                result.indexes.iter().any(|c| c.index.key() == key),
                "plan for '{}' references an unchosen index",
                plan.statement
            );
        }
    }
    // One plan per statement.
    assert_eq!(result.plans.len(), workload.statements().len());
}
