use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use duckdb::Connection;
use parking_lot::Mutex;
use std::sync::Arc;
use teal_analytics::ingest::normalizer::{metric, Metric};
use teal_analytics::storage::counters::CounterStore;
use teal_analytics::storage::schema;

fn make_store() -> CounterStore {
    let conn = Connection::open_in_memory().unwrap();
    schema::init_schema(&conn).unwrap();
    CounterStore::new(Arc::new(Mutex::new(conn)))
}

fn make_metrics(i: usize) -> Vec<Metric> {
    vec![
        Metric::scalar(metric::PAGEVIEWS),
        Metric::new(metric::PAGEVIEWS_HOURS, "12"),
        Metric::new(metric::PAGE, &format!("/page-{}", i % 100)),
    ]
}

/// Benchmark steady-state counter upserts on a warm connection.
///
/// Setup (DuckDB connection, schema) runs OUTSIDE `b.iter()` so only the
/// upsert cost is timed; after the first pass through the hot keys, every
/// upsert takes the increment branch, which is the production steady state.
fn bench_counter_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_throughput");

    for size in [100, 1_000] {
        let store = make_store();
        let date = chrono::NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();

        group.bench_with_input(BenchmarkId::new("apply", size), &size, |b, &size| {
            b.iter(|| {
                for i in 0..size {
                    store.apply(1, date, &make_metrics(i)).unwrap();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_counter_apply);
criterion_main!(benches);
