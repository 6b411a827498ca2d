use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use sqlmate::model::Row;
use sqlmate::query::run_sql;
use sqlmate::sql::{self, TableBinding};
use sqlmate::store::{SqliteStore, StorageEngine};

const JOIN_SQL: &str = "SELECT o.id, s.name FROM Orders o LEFT OUTER JOIN Sellers s ON o.seller_id = s.id ORDER BY o.id LIMIT 5000";

fn bindings() -> Vec<TableBinding> {
    vec![
        TableBinding::new("Orders", "dataset_orders_ab12cd34"),
        TableBinding::new("Sellers", "dataset_sellers_ef56ab78"),
    ]
}

fn seeded_store(rows: usize) -> SqliteStore {
    let store = SqliteStore::open_in_memory().expect("in-memory store");
    let columns = vec!["region".to_string(), "amount".to_string()];
    store
        .create_table("dataset_sales_00c0ffee", &columns)
        .expect("create table");
    let data = (0..rows)
        .map(|i| {
            Row::from_pairs([
                ("region", format!("region-{}", i % 7)),
                ("amount", (i * 13 % 1000).to_string()),
            ])
        })
        .collect::<Vec<_>>();
    store
        .insert_rows("dataset_sales_00c0ffee", &columns, &data)
        .expect("insert rows");
    store
}

fn bench_validate_and_rewrite(c: &mut Criterion) {
    let bindings = bindings();
    c.bench_function("validate_rewrite_join", |b| {
        b.iter(|| {
            let sanitized = sql::sanitize(JOIN_SQL).expect("safe");
            sql::rewrite(&sanitized, &bindings)
        })
    });
    c.bench_function("validate_rejects_forbidden", |b| {
        b.iter(|| sql::validate("SELECT * FROM t; DROP TABLE t"))
    });
}

fn bench_run_sql(c: &mut Criterion) {
    let binding = [TableBinding::new("Sales", "dataset_sales_00c0ffee")];
    c.bench_function("run_sql_capped_scan", |b| {
        b.iter_batched(
            || seeded_store(5_000),
            |store| {
                run_sql(&store, "SELECT region, amount FROM Sales LIMIT 1000", &binding)
                    .expect("run")
            },
            BatchSize::LargeInput,
        )
    });
}

criterion_group!(benches, bench_validate_and_rewrite, bench_run_sql);
criterion_main!(benches);
