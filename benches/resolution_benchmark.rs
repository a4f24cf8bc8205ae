use criterion::{black_box, criterion_group, criterion_main, Criterion};
use depgraph_engine::exec::scheduler::CancelToken;
use depgraph_engine::exec::sink::NullSink;
use depgraph_engine::simulation::stress_test::{generate_universe, UniverseConfig};

fn config_for(target_count: usize) -> UniverseConfig {
    UniverseConfig {
        target_count,
        chain_depth: 3,
        fan_out: 2,
        ..UniverseConfig::default()
    }
}

fn bench_resolve_10_targets(c: &mut Criterion) {
    let universe = generate_universe(&config_for(10));
    let (resolver, _, _) = universe.engine();

    c.bench_function("resolve_10_targets", |b| {
        b.iter(|| resolver.resolve(black_box(&universe.requirements)).unwrap())
    });
}

fn bench_resolve_100_targets(c: &mut Criterion) {
    let universe = generate_universe(&config_for(100));
    let (resolver, _, _) = universe.engine();

    c.bench_function("resolve_100_targets", |b| {
        b.iter(|| resolver.resolve(black_box(&universe.requirements)).unwrap())
    });
}

fn bench_resolve_1000_targets_parallel(c: &mut Criterion) {
    let universe = generate_universe(&config_for(1000));
    let (resolver, _, _) = universe.engine();

    c.bench_function("resolve_1000_targets_parallel", |b| {
        b.iter(|| {
            resolver
                .resolve_parallel(black_box(&universe.requirements))
                .unwrap()
        })
    });
}

fn bench_seeded_rebuild_100_targets(c: &mut Criterion) {
    let universe = generate_universe(&config_for(100));
    let (resolver, _, _) = universe.engine();
    let previous = resolver.resolve(&universe.requirements).unwrap();

    c.bench_function("seeded_rebuild_100_targets", |b| {
        b.iter(|| {
            resolver
                .resolve_seeded(black_box(&universe.requirements), &previous)
                .unwrap()
        })
    });
}

fn bench_execute_100_targets(c: &mut Criterion) {
    let universe = generate_universe(&config_for(100));
    let (resolver, executor, _) = universe.engine();
    let graph = resolver.resolve(&universe.requirements).unwrap();
    let sink = NullSink;

    c.bench_function("execute_100_targets", |b| {
        b.iter(|| executor.execute_cycle(black_box(&graph), &sink, &CancelToken::new()))
    });
}

criterion_group!(
    benches,
    bench_resolve_10_targets,
    bench_resolve_100_targets,
    bench_resolve_1000_targets_parallel,
    bench_seeded_rebuild_100_targets,
    bench_execute_100_targets
);
criterion_main!(benches);
