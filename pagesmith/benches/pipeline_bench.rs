//! Benchmarks for orchestrator throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pagesmith::pipeline::PipelineOrchestrator;
use pagesmith::testing::{fast_config, png_request, standard_stub_builder, ScriptedPhase};
use std::sync::Arc;

fn scripted_orchestrator(phases: usize) -> PipelineOrchestrator {
    (0..phases)
        .fold(PipelineOrchestrator::builder(), |builder, i| {
            builder.phase(Arc::new(ScriptedPhase::new(format!("phase-{i}"))))
        })
        .config(fast_config(0))
        .build()
        .unwrap()
}

fn orchestrator_overhead(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("orchestrator_overhead");
    for phases in [1usize, 5, 20] {
        let orchestrator = scripted_orchestrator(phases);
        group.bench_with_input(BenchmarkId::from_parameter(phases), &phases, |b, _| {
            b.iter(|| {
                let result = rt.block_on(orchestrator.execute_pipeline(png_request("bench")));
                black_box(result.success)
            });
        });
    }
    group.finish();
}

fn standard_pipeline(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = standard_stub_builder(0.6, fast_config(0)).build().unwrap();
    c.bench_function("standard_pipeline_stub_services", |b| {
        b.iter(|| {
            let result = rt.block_on(orchestrator.execute_pipeline(png_request("bench")));
            black_box(result.phases.len())
        });
    });
}

fn concurrent_runs(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let orchestrator = Arc::new(scripted_orchestrator(5));
    c.bench_function("concurrent_runs_16", |b| {
        b.iter(|| {
            rt.block_on(async {
                let handles: Vec<_> = (0..16)
                    .map(|i| {
                        let orchestrator = Arc::clone(&orchestrator);
                        tokio::spawn(async move {
                            orchestrator.execute_pipeline(png_request(&format!("run-{i}"))).await
                        })
                    })
                    .collect();
                for handle in handles {
                    black_box(handle.await.unwrap().success);
                }
            });
        });
    });
}

criterion_group!(benches, orchestrator_overhead, standard_pipeline, concurrent_runs);
criterion_main!(benches);
