use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use mixsim_core::config::{MixSimConfig, MixStrategyConfig};
use mixsim_sim::SimulationRun;
use mixsim_sim::deterministic::{EventKind, EventTarget, Scheduler};

fn bench_schedule_and_pop(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduler_schedule_pop");
    for events in [1_000u64, 10_000, 100_000] {
        group.bench_with_input(BenchmarkId::from_parameter(events), &events, |b, &events| {
            b.iter(|| {
                let mut scheduler = Scheduler::new();
                for i in 0..events {
                    let at = (i * 7919) % 10_000;
                    let _ = scheduler.schedule(at, EventTarget::Run, EventKind::Stop, None);
                }
                let mut popped = 0u64;
                while let Ok(Some(event)) = scheduler.pop_due(None) {
                    popped += black_box(event.time()) & 1;
                }
                popped
            });
        });
    }
    group.finish();
}

fn bench_cancellation(c: &mut Criterion) {
    c.bench_function("scheduler_cancel_half", |b| {
        b.iter(|| {
            let mut scheduler = Scheduler::new();
            let ids: Vec<_> = (0..10_000u64)
                .filter_map(|i| {
                    scheduler
                        .schedule(i, EventTarget::Run, EventKind::Stop, None)
                        .ok()
                })
                .collect();
            for id in ids.iter().step_by(2) {
                scheduler.cancel(*id);
            }
            while let Ok(Some(event)) = scheduler.pop_due(None) {
                black_box(event.id);
            }
        });
    });
}

fn bench_full_run(c: &mut Criterion) {
    let mut config = MixSimConfig::for_testing();
    config.topology.clients = 50;
    config.mix = MixStrategyConfig::Forward;

    c.bench_function("simulation_run_50_clients", |b| {
        b.iter(|| {
            SimulationRun::new(black_box(&config), 42)
                .and_then(SimulationRun::execute)
                .map(|report| report.events_processed)
        });
    });
}

criterion_group!(
    benches,
    bench_schedule_and_pop,
    bench_cancellation,
    bench_full_run
);
criterion_main!(benches);
