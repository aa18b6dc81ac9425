use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::SeedableRng;
use rand::rngs::StdRng;

use meterlab_core::{ClientDescriptor, ClientId, Environment, SourceRegistry, UtilityType};
use meterlab_scheduler::{Balancer, ClassCounts, ClientSelector};

fn counts() -> ClassCounts {
    ClassCounts {
        cold_water: 5_800,
        hot_water: 900,
        electricity: 3_100,
        no_meter: 250,
        total_images: 10_050,
    }
}

fn bench_single_draw(c: &mut Criterion) {
    let balancer = Balancer::default();
    let fractions = counts().fractions();
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("balancer_draw", |b| {
        b.iter(|| black_box(balancer.choose(fractions.as_ref(), &mut rng)));
    });
}

/// Full simulated runs: recompute fractions and draw after every completion.
fn bench_simulated_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("balancer_simulated_run");
    let balancer = Balancer::default();

    for cycles in [100usize, 1_000, 10_000].iter() {
        group.throughput(Throughput::Elements(*cycles as u64));
        group.bench_with_input(BenchmarkId::new("cycles", cycles), cycles, |b, &n| {
            b.iter(|| {
                let mut rng = StdRng::seed_from_u64(7);
                let mut tally = ClassCounts::default();
                for _ in 0..n {
                    let t = balancer.choose(tally.fractions().as_ref(), &mut rng);
                    tally.add(t, 1);
                }
                black_box(tally)
            });
        });
    }

    group.finish();
}

fn bench_client_selection(c: &mut Criterion) {
    let clients = (0..12)
        .map(|i| ClientDescriptor {
            id: ClientId::new(format!("client-{i}")).unwrap(),
            environment: Environment::Prod,
            supports_hot_water: i % 3 == 0,
            database: format!("db_{i}"),
        })
        .collect();
    let registry = SourceRegistry::new(clients).unwrap();
    let mut rng = StdRng::seed_from_u64(3);

    c.bench_function("client_select_hot_water", |b| {
        b.iter(|| {
            black_box(ClientSelector::select(
                &registry,
                Environment::Prod,
                UtilityType::HotWater,
                &mut rng,
            ))
        });
    });
}

criterion_group!(
    benches,
    bench_single_draw,
    bench_simulated_run,
    bench_client_selection
);
criterion_main!(benches);
