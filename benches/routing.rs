//! Routing and validation benchmarks
//!
//! Measures the non-I/O work on the request path and the supervisor tick
//! (excludes network calls).
//!
//! ## Expected Performance Characteristics
//!
//! - Routing decision: tens of nanoseconds (one watch borrow, one random draw)
//! - Outcome recording: sub-microsecond (one mutex, one ring buffer push)
//! - Gate evaluation over a full window: tens of microseconds (p95 sort)
//! - Config parsing: single-digit microseconds (one-time startup cost)
//!
//! Run with: `cargo bench`

use async_trait::async_trait;
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use phaseshift::{
    config::Config,
    coordinator::{MigrationCoordinator, MigrationPlan, MigrationPhase},
    metrics::Metrics,
    preflight::Preflight,
    recorder::MetricsRecorder,
    source::{
        DataSource, DataSourceManager, RequestContext, SeededRandom, SourceError, SourceKind,
        ThreadRandom,
    },
    validation::ValidationGate,
};
use serde_json::Value;
use std::hint::black_box;
use std::str::FromStr;
use std::sync::Arc;

struct NullSource(SourceKind);

#[async_trait]
impl DataSource for NullSource {
    fn kind(&self) -> SourceKind {
        self.0
    }

    async fn fetch(&self, _ctx: &RequestContext) -> Result<Value, SourceError> {
        Ok(Value::Null)
    }

    async fn ping(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

fn manager(random: Arc<dyn phaseshift::source::RandomSource>) -> DataSourceManager {
    let metrics = Arc::new(Metrics::new().expect("metrics"));
    let recorder = Arc::new(MetricsRecorder::default());
    let coordinator = MigrationCoordinator::new(
        MigrationPlan::default(),
        Arc::clone(&recorder),
        Arc::clone(&metrics),
        Preflight::empty(),
    );
    DataSourceManager::new(
        Arc::new(NullSource(SourceKind::Mock)),
        Arc::new(NullSource(SourceKind::Real)),
        recorder,
        metrics,
        coordinator.subscribe(),
        random,
    )
}

/// Benchmark the per-request routing decision
fn bench_decide_source(c: &mut Criterion) {
    let ctx = RequestContext::new("users/42");
    let mut group = c.benchmark_group("decide_source");

    let thread = manager(Arc::new(ThreadRandom));
    group.bench_function("thread_random", |b| {
        b.iter(|| black_box(thread.decide_source(black_box(&ctx))));
    });

    let seeded = manager(Arc::new(SeededRandom::new(42)));
    group.bench_function("seeded_random", |b| {
        b.iter(|| black_box(seeded.decide_source(black_box(&ctx))));
    });

    group.finish();
}

/// Benchmark recording one request outcome
fn bench_record(c: &mut Criterion) {
    let recorder = MetricsRecorder::default();
    c.bench_function("recorder_record", |b| {
        b.iter(|| recorder.record(black_box(12.5), black_box(true), SourceKind::Real));
    });
}

/// Benchmark gate evaluation over windows of increasing size
///
/// Runs once per supervisor tick, so even a millisecond would be acceptable.
fn bench_gate_evaluation(c: &mut Criterion) {
    let gate = ValidationGate::new();
    let plan = MigrationPlan::default();
    let spec = plan
        .spec(MigrationPhase::Canary25)
        .expect("canary phase has a spec");

    let mut group = c.benchmark_group("gate_evaluation");
    for window in [100usize, 1000, 10_000] {
        let recorder = MetricsRecorder::new(window);
        for i in 0..window {
            let source = if i % 4 == 0 {
                SourceKind::Real
            } else {
                SourceKind::Mock
            };
            recorder.record((i % 400) as f64, i % 200 != 0, source);
        }
        let snapshot = recorder.snapshot();

        group.bench_with_input(BenchmarkId::from_parameter(window), &snapshot, |b, s| {
            b.iter(|| black_box(gate.evaluate(s, spec)));
        });
    }
    group.finish();
}

/// Benchmark configuration parsing and validation
///
/// Called once during startup.
fn bench_config_parsing(c: &mut Criterion) {
    let toml_str = phaseshift::cli::generate_config_template();
    c.bench_function("config_parsing", |b| {
        b.iter(|| Config::from_str(black_box(toml_str)).expect("template parses"));
    });
}

criterion_group!(
    benches,
    bench_decide_source,
    bench_record,
    bench_gate_evaluation,
    bench_config_parsing
);
criterion_main!(benches);
