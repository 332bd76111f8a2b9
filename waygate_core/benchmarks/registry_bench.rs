use std::sync::Arc;

use bevy::math::Vec3;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{rngs::SmallRng, Rng, SeedableRng};
use waygate_core::{
    build_headless_app, run_tick, PortalLifecycle, PortalPlaced, PortalRecord, PortalRegistry,
    TravelerBundle, WaygateConfig,
};
use waygate_proto::{Facing, PortalPos};

fn populated(count: i32) -> PortalRegistry {
    let registry = PortalRegistry::new();
    for x in 0..count {
        registry.upsert(PortalRecord::new(PortalPos::new(x, 64, 0), 5.0, Facing::North));
    }
    registry
}

fn bench_link_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_churn");

    for size in [16i32, 128, 1024] {
        group.bench_with_input(BenchmarkId::new("portals", size), &size, |b, &size| {
            b.iter_batched(
                || (populated(size), SmallRng::seed_from_u64(7)),
                |(registry, mut rng)| {
                    for _ in 0..256 {
                        let a = PortalPos::new(rng.gen_range(0..size), 64, 0);
                        let other = PortalPos::new(rng.gen_range(0..size), 64, 0);
                        if rng.gen_bool(0.8) {
                            registry.link(a, other);
                        } else {
                            registry.unlink(a);
                        }
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_transit_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("transit_tick");

    for pairs in [4i32, 32, 128] {
        group.bench_with_input(BenchmarkId::new("pairs", pairs), &pairs, |b, &pairs| {
            b.iter_batched(
                || {
                    let mut app = build_headless_app(Arc::new(WaygateConfig {
                        activation_seconds: 0.05,
                        ..WaygateConfig::default()
                    }));
                    for i in 0..pairs {
                        for x in [i * 20, i * 20 + 10] {
                            app.world.send_event(PortalLifecycle::Placed(PortalPlaced {
                                pos: PortalPos::new(x, 64, 0),
                                size: 4.0,
                                facing: Facing::East,
                                repaired: true,
                            }));
                        }
                    }
                    run_tick(&mut app);
                    let registry = app.world.resource::<PortalRegistry>().clone();
                    for i in 0..pairs {
                        registry.link(PortalPos::new(i * 20, 64, 0), PortalPos::new(i * 20 + 10, 64, 0));
                        app.world.spawn(TravelerBundle::at(Vec3::new(i as f32 * 20.0 + 0.5, 64.5, 0.5)));
                    }
                    for _ in 0..3 {
                        run_tick(&mut app);
                    }
                    app
                },
                |mut app| {
                    run_tick(&mut app);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(registry_benches, bench_link_churn, bench_transit_tick);
criterion_main!(registry_benches);
