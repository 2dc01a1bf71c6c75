use criterion::{black_box, criterion_group, criterion_main, Criterion};
use keyplan::config::KeyplanConfig;
use keyplan::index::IndexEnumerator;
use keyplan::plan::{Planner, WideColumnCost};
use keyplan::schema::{Arity, EntitySpec, Schema, SchemaBuilder};
use keyplan::workload::parser::parse_statement;
use keyplan::workload::Workload;
use keyplan::{Advisor, Executor};

fn feed_schema() -> Schema {
    SchemaBuilder::new()
        .entity(
            EntitySpec::new("User", 10_000)
                .id_key("id")
                .string("name", 20)
                .string("city", 16)
                .foreign_key("tweets", "Tweet", Arity::Many),
        )
        .entity(
            EntitySpec::new("Tweet", 1_000_000)
                .id_key("id")
                .string("body", 140)
                .date("ts")
                .int("retweets")
                .foreign_key("author", "User", Arity::One),
        )
        .finish()
        .expect("schema")
}

fn feed_workload(schema: &Schema) -> Workload {
    let texts = [
        ("timeline", "SELECT Tweet.body FROM User.tweets WHERE User.name = ? ORDER BY Tweet.ts LIMIT 20"),
        ("by_city", "SELECT Tweet.body FROM User.tweets WHERE User.city = ? AND User.name = ?"),
        ("hot", "SELECT body FROM Tweet WHERE Tweet.retweets > ?"),
        ("touch", "UPDATE Tweet SET body = ? WHERE Tweet.id = ?"),
        ("prune", "DELETE Tweet FROM Tweet WHERE Tweet.ts < ?"),
    ];
    Workload::new(
        texts
            .iter()
            .map(|(label, text)| parse_statement(schema, *label, text).expect("parse"))
            .collect(),
    )
}

fn bench_enumeration(c: &mut Criterion) {
    let schema = feed_schema();
    let workload = feed_workload(&schema);
    c.bench_function("enumerate_candidates", |b| {
        b.iter(|| {
            let found = IndexEnumerator::new(&schema).candidates(black_box(&workload));
            black_box(found.len())
        })
    });
}

fn bench_cost_matrix(c: &mut Criterion) {
    let schema = feed_schema();
    let workload = feed_workload(&schema);
    let candidates = IndexEnumerator::new(&schema).candidates(&workload);
    let cost = WideColumnCost::default();
    let planner = Planner::new(&schema, &cost, &candidates);
    c.bench_function("cost_matrix_sequential", |b| {
        b.iter(|| {
            let matrix = planner
                .cost_matrix(black_box(&workload), Executor::Sequential)
                .expect("matrix");
            black_box(matrix.queries.len())
        })
    });
    c.bench_function("cost_matrix_parallel", |b| {
        b.iter(|| {
            let matrix = planner
                .cost_matrix(black_box(&workload), Executor::Parallel)
                .expect("matrix");
            black_box(matrix.queries.len())
        })
    });
}

fn bench_full_search(c: &mut Criterion) {
    let schema = feed_schema();
    let workload = feed_workload(&schema);
    let advisor = Advisor::new(KeyplanConfig::default()).expect("advisor");
    c.bench_function("full_search", |b| {
        b.iter(|| {
            let result = advisor
                .search(black_box(&schema), black_box(&workload))
                .expect("search");
            black_box(result.indexes.len())
        })
    });
}

criterion_group!(
    benches,
    bench_enumeration,
    bench_cost_matrix,
    bench_full_search
);
criterion_main!(benches);
