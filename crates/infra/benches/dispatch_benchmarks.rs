use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use jobmesh_core::{CapabilitySet, TenantId, WorkerId};
use jobmesh_infra::{Orchestrator, OrchestratorConfig, WorkerOrdering};
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn caps(tags: &[&str]) -> CapabilitySet {
    CapabilitySet::parse(tags.iter().copied()).unwrap()
}

/// An orchestrator with `jobs` pending jobs and `workers` idle workers. Every
/// other job needs a GPU; half the workers have one.
fn populated(rt: &Runtime, jobs: usize, workers: usize) -> Orchestrator {
    let orchestrator = Orchestrator::in_memory(OrchestratorConfig::default());
    let tenant = TenantId::new();
    rt.block_on(async {
        for i in 0..jobs {
            let requirement = if i % 2 == 0 { caps(&["cpu"]) } else { caps(&["gpu"]) };
            orchestrator
                .submit(tenant, vec![0; 64], requirement)
                .await
                .unwrap();
        }
        for i in 0..workers {
            let tags: &[&str] = if i % 2 == 0 { &["cpu"] } else { &["cpu", "gpu"] };
            orchestrator
                .heartbeat(WorkerId::new(), caps(tags), None)
                .await
                .unwrap();
        }
    });
    orchestrator
}

fn bench_dispatch_cycle(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("dispatch_cycle");

    for (jobs, workers) in [(100, 10), (1_000, 100), (10_000, 100)] {
        group.throughput(Throughput::Elements(workers as u64));
        group.bench_with_input(
            BenchmarkId::new("assign", format!("{jobs}j_{workers}w")),
            &(jobs, workers),
            |b, &(jobs, workers)| {
                b.iter_batched(
                    || populated(&rt, jobs, workers),
                    |orchestrator| {
                        let report = rt
                            .block_on(orchestrator.dispatcher().run_cycle(Utc::now()))
                            .unwrap();
                        black_box(report.assigned.len())
                    },
                    BatchSize::LargeInput,
                );
            },
        );
    }
    group.finish();
}

fn bench_idle_cycle(c: &mut Criterion) {
    // A cycle with a large backlog and no idle worker should cost almost nothing.
    let rt = runtime();
    let orchestrator = populated(&rt, 10_000, 0);
    let dispatcher = orchestrator.dispatcher();

    c.bench_function("dispatch_cycle_no_idle_workers", |b| {
        b.iter(|| rt.block_on(dispatcher.run_cycle(Utc::now())).unwrap())
    });
}

fn bench_worker_ordering(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_ordering");
    let rt = runtime();
    let orchestrator = populated(&rt, 0, 1_000);
    let workers = rt.block_on(orchestrator.workers()).unwrap();

    for ordering in [WorkerOrdering::MostRecentlyIdle, WorkerOrdering::LongestIdle] {
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{ordering:?}")),
            &ordering,
            |b, ordering| {
                b.iter_batched(
                    || workers.clone(),
                    |mut batch| {
                        ordering.sort(&mut batch);
                        black_box(batch)
                    },
                    BatchSize::SmallInput,
                );
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_cycle,
    bench_idle_cycle,
    bench_worker_ordering
);
criterion_main!(benches);
