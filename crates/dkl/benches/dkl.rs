use criterion::{criterion_group, criterion_main, Criterion};
use egobox_dkl::feature_extractor::MlpExtractor;
use egobox_dkl::kernels::RbfKernel;
use egobox_dkl::{DeepKernelLearning, RngKey};
use ndarray::{Array, Array1};

fn criterion_dkl(c: &mut Criterion) {
    let nts = [20, 50, 100];

    let mut group = c.benchmark_group("dkl");
    group.sample_size(10);
    for nt in nts {
        let xt = Array::linspace(-3., 3., nt);
        let yt: Array1<f64> = xt.mapv(|v: f64| v.sin());

        group.bench_function(format!("dkl fit {nt}"), |b| {
            b.iter(|| {
                let mut dkl = DeepKernelLearning::new(DeepKernelLearning::params(
                    RbfKernel::default(),
                    MlpExtractor::new(1, 2).with_hidden_layers(&[64, 32]),
                ))
                .expect("DKL creation");
                dkl.fit(RngKey::new(0), &xt, &yt, 100, false)
                    .expect("DKL fit error");
                std::hint::black_box(dkl)
            });
        });

        let mut dkl = DeepKernelLearning::new(DeepKernelLearning::params(
            RbfKernel::default(),
            MlpExtractor::new(1, 2).with_hidden_layers(&[64, 32]),
        ))
        .expect("DKL creation");
        dkl.fit(RngKey::new(0), &xt, &yt, 100, false)
            .expect("DKL fit error");
        let xtest = Array::linspace(-3., 3., 200);
        group.bench_function(format!("dkl predict {nt}"), |b| {
            b.iter(|| {
                std::hint::black_box(
                    dkl.predict(RngKey::new(1), &xtest, None, 100)
                        .expect("DKL predict error"),
                )
            });
        });
    }
    group.finish();
}

criterion_group!(benches, criterion_dkl);
criterion_main!(benches);
