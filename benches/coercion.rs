//! Benchmarks for the hot paths of a tool call
//!
//! Tests performance for:
//! - JSON coercion of scalar and array arguments to declared kinds
//! - Topic filter matching over a dashboard-sized topic set
//! - Cached reads through the full bridge against the loopback robot
//!
//! Platform: Cross-platform (in-memory robot, CI-safe)

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use ntbridge::test_utils::{BATTERY_VOLTAGE, connected_bridge};
use ntbridge::types::coerce;
use ntbridge::{BridgeConfig, TopicFilter, ValueKind};
use serde_json::json;
use std::hint::black_box;

fn bench_scalar_coercion(c: &mut Criterion) {
    let mut group = c.benchmark_group("scalar_coercion");

    let cases = [
        ("boolean", json!(true), ValueKind::Boolean),
        ("integer", json!(4), ValueKind::Integer),
        ("integer_to_double", json!(12), ValueKind::Double),
        ("string", json!("Center"), ValueKind::String),
    ];
    for (name, json, kind) in cases {
        group.bench_function(name, |b| {
            b.iter(|| black_box(coerce::coerce("/bench", black_box(&json), kind).unwrap()))
        });
    }

    group.bench_function("inferred_double", |b| {
        b.iter(|| black_box(coerce::from_json("/bench", black_box(&json!(3.5)), None).unwrap()))
    });

    group.finish();
}

fn bench_array_coercion(c: &mut Criterion) {
    let mut group = c.benchmark_group("array_coercion");

    for len in [4usize, 64, 1024] {
        let doubles = json!((0..len).map(|i| i as f64 * 0.5).collect::<Vec<_>>());
        group.bench_with_input(BenchmarkId::new("double_array", len), &doubles, |b, json| {
            b.iter(|| black_box(coerce::coerce("/bench", json, ValueKind::DoubleArray).unwrap()))
        });

        let strings = json!((0..len).map(|i| format!("mode-{i}")).collect::<Vec<_>>());
        group.bench_with_input(BenchmarkId::new("string_array", len), &strings, |b, json| {
            b.iter(|| black_box(coerce::coerce("/bench", json, ValueKind::StringArray).unwrap()))
        });
    }

    group.finish();
}

fn bench_filter_matching(c: &mut Criterion) {
    let topics: Vec<String> = (0..512)
        .map(|i| match i % 4 {
            0 => format!("/SmartDashboard/Module {i}/Speed"),
            1 => format!("/SmartDashboard/Module {i}/Angle"),
            2 => format!("/Shuffleboard/Tab {i}/Value"),
            _ => format!("/FMSInfo/Field {i}"),
        })
        .collect();

    let mut group = c.benchmark_group("filter_matching");
    for pattern in ["/SmartDashboard/", "/SmartDashboard/*/Speed", "/Shuffleboard/*"] {
        let filter = TopicFilter::new(pattern);
        group.bench_with_input(BenchmarkId::from_parameter(pattern), &filter, |b, filter| {
            b.iter(|| black_box(topics.iter().filter(|t| filter.matches(t)).count()))
        });
    }
    group.finish();
}

fn bench_cached_get(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("Failed to build runtime");
    let (bridge, _robot) = runtime
        .block_on(connected_bridge(BridgeConfig::default()))
        .expect("Failed to connect loopback bridge");

    let mut group = c.benchmark_group("bridge_get");
    group.bench_function("cached", |b| {
        b.iter(|| runtime.block_on(async { black_box(bridge.get(BATTERY_VOLTAGE, true).await.unwrap()) }))
    });
    group.bench_function("bypass_cache", |b| {
        b.iter(|| runtime.block_on(async { black_box(bridge.get(BATTERY_VOLTAGE, false).await.unwrap()) }))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_scalar_coercion,
    bench_array_coercion,
    bench_filter_matching,
    bench_cached_get
);
criterion_main!(benches);
