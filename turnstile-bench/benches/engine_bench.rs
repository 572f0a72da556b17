//! Machine and monitor engine benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use turnstile_core::{
    DetachedHost, Event, IdentityRegistry, Machine, MachineType, Monitor, MonitorType,
};
use turnstile_runtime::{Config, Driver, Runtime};

fn counter_type() -> MachineType<u64> {
    MachineType::<u64>::builder("Counter")
        .state("Base", |s| {
            s.start()
                .on_event_push("Busy", "Working")
                .on_event_do("Inc", |ctx| {
                    *ctx.data_mut() += 1;
                    Ok(())
                })
        })
        .state("Working", |s| s.defer(["Inc"]).on_event_do("Done", |ctx| ctx.pop()))
        .build()
        .unwrap()
}

fn spawn(catalog: &Arc<MachineType<u64>>, ids: &IdentityRegistry) -> Machine<u64> {
    let id = ids.new_identity("Counter", None).unwrap();
    Machine::new(id, Arc::clone(catalog), 0, None).unwrap()
}

fn bench_turn(c: &mut Criterion) {
    let mut group = c.benchmark_group("machine_turn");
    let catalog = Arc::new(counter_type());
    let ids = IdentityRegistry::new();

    for batch in [1usize, 16, 256] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("drain", batch), &batch, |b, &batch| {
            let machine = spawn(&catalog, &ids);
            machine.run_turn(&DetachedHost).unwrap();
            b.iter(|| {
                for _ in 0..batch {
                    machine.enqueue(Event::new("Inc")).unwrap();
                }
                black_box(machine.run_turn(&DetachedHost).unwrap())
            });
        });
    }

    group.finish();
}

fn bench_deferred_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("mailbox_scan");
    let catalog = Arc::new(counter_type());
    let ids = IdentityRegistry::new();

    // Each turn has to skip past the deferred backlog to reach "Done".
    for deferred in [8usize, 64, 512] {
        group.bench_with_input(
            BenchmarkId::new("skip_deferred", deferred),
            &deferred,
            |b, &deferred| {
                b.iter(|| {
                    let machine = spawn(&catalog, &ids);
                    machine.enqueue(Event::new("Busy")).unwrap();
                    for _ in 0..deferred {
                        machine.enqueue(Event::new("Inc")).unwrap();
                    }
                    machine.enqueue(Event::new("Done")).unwrap();
                    black_box(machine.run_turn(&DetachedHost).unwrap())
                });
            },
        );
    }

    group.finish();
}

fn bench_monitor_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("monitor_deliver");
    let catalog: Arc<MonitorType<()>> = Arc::new(
        MonitorType::<()>::builder("Toggle")
            .state("Cold", |s| s.start().cold().on_event_goto("Flip", "Hot"))
            .state("Hot", |s| s.hot().on_event_goto("Flip", "Cold"))
            .build()
            .unwrap(),
    );
    let id = IdentityRegistry::new().new_identity("Toggle", None).unwrap();
    let mut monitor = Monitor::new(id, catalog, (), 1_000).unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("goto", |b| {
        b.iter(|| {
            monitor.deliver(Event::new("Flip"), &DetachedHost).unwrap();
            black_box(monitor.check_liveness().unwrap())
        });
    });

    group.finish();
}

fn bench_driver(c: &mut Criterion) {
    let mut group = c.benchmark_group("driver");

    for machines in [2usize, 32] {
        group.bench_with_input(
            BenchmarkId::new("quiesce", machines),
            &machines,
            |b, &machines| {
                b.iter(|| {
                    let runtime = Runtime::new(Config::default());
                    runtime
                        .register_machine_type("Counter", || Ok(counter_type()), || 0u64)
                        .unwrap();
                    for _ in 0..machines {
                        let id = runtime.create_machine("Counter", None, None).unwrap();
                        for _ in 0..8 {
                            runtime.send(&id, Event::new("Inc")).unwrap();
                        }
                    }
                    black_box(Driver::new(&runtime).run())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_turn,
    bench_deferred_scan,
    bench_monitor_delivery,
    bench_driver
);
criterion_main!(benches);
