//! Benchmarks for the per-statement and per-connection hot paths:
//! - statement filtering (runs before every statement)
//! - catalog query rendering
//! - connection parameter normalization
//! - text value decoding
//!
//! Run with: `cargo bench`

use std::collections::BTreeSet;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pgshim::catalog::TableName;
use pgshim::filter::SCHEMA_PURPOSE;
use pgshim::types::Decoder;
use pgshim::BackendProfile;
use serde_json::json;

const STATEMENTS: &[(&str, &str)] = &[
    ("suppressed", "SET time zone 'UTC'"),
    ("passthrough_set", "SET search_path TO app, public"),
    (
        "select",
        "SELECT u.name, o.total FROM users u JOIN orders o ON u.id = o.user_id WHERE o.total > 100",
    ),
    ("commented", "/* migration 42 */ SET client_min_messages TO 'warning'"),
];

fn bench_filter(c: &mut Criterion) {
    let filter = BackendProfile::redshift().statement_filter();
    let mut group = c.benchmark_group("filter");
    for (name, sql) in STATEMENTS {
        group.bench_with_input(BenchmarkId::from_parameter(name), sql, |b, sql| {
            b.iter(|| filter.filter(black_box(sql), Some(SCHEMA_PURPOSE)))
        });
    }
    group.finish();
}

fn bench_catalog(c: &mut Criterion) {
    let mut group = c.benchmark_group("catalog");
    for profile in [BackendProfile::postgresql(), BackendProfile::redshift()] {
        let catalog = profile.catalog();
        let table = TableName::parse("sales.orders");
        group.bench_function(BenchmarkId::new("columns", &profile.name), |b| {
            b.iter(|| catalog.build_column_query(black_box(&table)))
        });
        group.bench_function(BenchmarkId::new("primary_keys", &profile.name), |b| {
            b.iter(|| catalog.build_primary_key_query(black_box(&table)))
        });
        group.bench_function(BenchmarkId::new("types", &profile.name), |b| {
            b.iter(|| catalog.build_type_discovery_query(None))
        });
    }
    let oids: BTreeSet<u32> = (16384..16484).collect();
    let catalog = BackendProfile::postgresql().catalog();
    group.bench_function("types_targeted_100", |b| {
        b.iter(|| catalog.build_type_discovery_query(Some(black_box(&oids))))
    });
    group.finish();
}

fn bench_params(c: &mut Criterion) {
    let mapper = BackendProfile::redshift().parameter_mapper();
    let config = json!({
        "host": "warehouse.example.com",
        "port": 5439,
        "username": "analyst",
        "database": "dev",
        "password": "secret",
        "sslmode": "require",
        "pool": 5,
        "encoding": null,
    });
    let config = config.as_object().cloned().unwrap_or_default();
    c.bench_function("params/normalize", |b| {
        b.iter(|| mapper.normalize(black_box(&config)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    let int_array = Decoder::Array {
        element: Box::new(Decoder::Int4),
        delimiter: ',',
    };
    let text_array = Decoder::Array {
        element: Box::new(Decoder::Text),
        delimiter: ',',
    };
    let ints = format!(
        "{{{}}}",
        (0..100).map(|i| i.to_string()).collect::<Vec<_>>().join(",")
    );

    group.bench_function("int4", |b| b.iter(|| Decoder::Int4.decode(23, black_box("123456"))));
    group.bench_function("timestamptz", |b| {
        b.iter(|| Decoder::TimestampTz.decode(1184, black_box("2024-03-01 12:30:45.123456+02")))
    });
    group.bench_function("int4_array_100", |b| {
        b.iter(|| int_array.decode(1007, black_box(&ints)))
    });
    group.bench_function("text_array_quoted", |b| {
        b.iter(|| text_array.decode(1009, black_box(r#"{plain,"with \"quotes\"","a,b",NULL}"#)))
    });
    group.finish();
}

criterion_group!(benches, bench_filter, bench_catalog, bench_params, bench_decode);
criterion_main!(benches);
