use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use kinc_core::kernel::{Criterion as ModelCriterion, GmmPearsonKernel, KernelConfig};

fn make_blob_pair(n: usize, seed: u64) -> (Vec<f32>, Vec<f32>) {
    let mut state = seed.wrapping_add(1);
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state as f64 / u64::MAX as f64) - 0.5
    };

    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    for i in 0..n {
        let center = if i < n / 2 { 0.0 } else { 5.0 };
        x.push((center + next()) as f32);
        y.push((center + next()) as f32);
    }
    (x, y)
}

fn kernel_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("gmm_pearson_kernel");

    for &sample_count in &[60usize, 200, 600] {
        let (x, y) = make_blob_pair(sample_count, 7);

        for criterion in [ModelCriterion::Bic, ModelCriterion::Icl] {
            let label = match criterion {
                ModelCriterion::Bic => "bic",
                ModelCriterion::Icl => "icl",
            };
            group.bench_with_input(
                BenchmarkId::new(label, sample_count),
                &(x.clone(), y.clone()),
                |b, (x, y)| {
                    let mut kernel = GmmPearsonKernel::new(KernelConfig {
                        min_samples: 10,
                        max_clusters: 4,
                        criterion,
                        ..KernelConfig::default()
                    });
                    b.iter(|| kernel.fit_pair(x, y))
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, kernel_benchmarks);
criterion_main!(benches);
