//! Elementwise primitive benchmarks.
//!
//! Algorithms: relu, gelu_tanh, logistic (fwd), relu/gelu_tanh (bwd)
//! Sizes: 1K, 4K, 16K, 64K, 256K
//! Compared: scalar reference vs generated routine, plus generation latency
//! Reported: memory throughput (bytes)

use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput,
};
use std::time::Duration;

#[path = "utils.rs"]
mod utils;

use eltwise_kernels::compiler::{EltwiseKernelGenerator, KernelDesc};
use eltwise_kernels::scalar_ops::{scalar_eltwise_bwd, scalar_eltwise_fwd};
use eltwise_kernels::{
    cpu_capabilities, AlgKind, BwdArgs, DataType, Direction, EltwiseBwd, EltwiseDesc, EltwiseFwd,
    Engine, IsaLevel, MemoryDesc, PrimitiveAttr,
};

const ELEM_SIZES: &[usize] = &[1024, 4096, 16384, 65536, 262144];
const FWD_ALGS: &[AlgKind] = &[AlgKind::Relu, AlgKind::GeluTanh, AlgKind::Logistic];
const BWD_ALGS: &[AlgKind] = &[AlgKind::Relu, AlgKind::GeluTanh];

fn size_label(n: usize) -> String {
    match n {
        1024 => "1K".into(),
        4096 => "4K".into(),
        16384 => "16K".into(),
        65536 => "64K".into(),
        262144 => "256K".into(),
        _ => format!("{n}"),
    }
}

fn bench_isa() -> IsaLevel {
    cpu_capabilities().best().unwrap_or(IsaLevel::Sse41)
}

fn fwd_primitive(alg: AlgKind, dt: DataType, n: usize, engine: &Engine) -> EltwiseFwd {
    let md = MemoryDesc::plain(&[n], dt);
    let desc = EltwiseDesc::forward(alg, 0.0, 0.0, md.clone(), md);
    EltwiseFwd::init(bench_isa(), dt, &desc, &PrimitiveAttr::default(), engine)
        .expect("forward primitive")
}

/// Scalar reference forward pass
fn bench_scalar_fwd(c: &mut Criterion) {
    let mut group = c.benchmark_group("elementwise/scalar_fwd");
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(3));

    for &alg in FWD_ALGS {
        for &n in ELEM_SIZES {
            group.throughput(Throughput::Bytes(utils::fwd_rw_bytes(n, 4)));
            let input = utils::random_f32_vec(n);
            let mut output = vec![0.0f32; n];

            group.bench_with_input(BenchmarkId::new(alg.name(), size_label(n)), &n, |bench, _| {
                bench.iter(|| {
                    scalar_eltwise_fwd(alg, 0.0, 0.0, black_box(&input), &mut output);
                    black_box(&output);
                });
            });
        }
    }
    group.finish();
}

/// Generated forward routine, f32 and bf16
fn bench_generated_fwd(c: &mut Criterion) {
    let mut group = c.benchmark_group("elementwise/generated_fwd");
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(3));
    let engine = Engine::new();

    for &alg in FWD_ALGS {
        for &n in ELEM_SIZES {
            group.throughput(Throughput::Bytes(utils::fwd_rw_bytes(n, 4)));
            let p = fwd_primitive(alg, DataType::F32, n, &engine);
            let input = utils::random_f32_vec(n);
            let mut output = vec![0.0f32; n];
            group.bench_with_input(
                BenchmarkId::new(format!("{}/f32", alg.name()), size_label(n)),
                &n,
                |bench, _| {
                    bench.iter(|| {
                        p.execute_typed(black_box(&input), &mut output).expect("execute");
                        black_box(&output);
                    });
                },
            );

            group.throughput(Throughput::Bytes(utils::fwd_rw_bytes(n, 2)));
            let p = fwd_primitive(alg, DataType::Bf16, n, &engine);
            let input = utils::random_bf16_vec(n);
            let mut output = vec![half::bf16::ZERO; n];
            group.bench_with_input(
                BenchmarkId::new(format!("{}/bf16", alg.name()), size_label(n)),
                &n,
                |bench, _| {
                    bench.iter(|| {
                        p.execute_typed(black_box(&input), &mut output).expect("execute");
                        black_box(&output);
                    });
                },
            );
        }
    }
    group.finish();
}

/// Scalar reference vs generated backward pass
fn bench_bwd(c: &mut Criterion) {
    let mut group = c.benchmark_group("elementwise/bwd");
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(3));
    let engine = Engine::new();

    for &alg in BWD_ALGS {
        for &n in ELEM_SIZES {
            group.throughput(Throughput::Bytes(utils::bwd_rw_bytes(n, 4)));
            let src = utils::random_f32_vec(n);
            let diff_dst = utils::random_f32_vec(n);
            let mut diff_src = vec![0.0f32; n];

            group.bench_with_input(
                BenchmarkId::new(format!("{}/scalar", alg.name()), size_label(n)),
                &n,
                |bench, _| {
                    bench.iter(|| {
                        scalar_eltwise_bwd(alg, 0.0, 0.0, black_box(&src), &diff_dst, &mut diff_src);
                        black_box(&diff_src);
                    });
                },
            );

            let md = MemoryDesc::plain(&[n], DataType::F32);
            let desc = EltwiseDesc::backward(alg, 0.0, 0.0, md.clone(), md.clone(), md);
            let p = EltwiseBwd::init(bench_isa(), DataType::F32, &desc, &PrimitiveAttr::default(), &engine)
                .expect("backward primitive");
            let args = BwdArgs::from_typed(Some(src.as_slice()), None, diff_dst.as_slice());
            group.bench_with_input(
                BenchmarkId::new(format!("{}/generated", alg.name()), size_label(n)),
                &n,
                |bench, _| {
                    bench.iter(|| {
                        p.execute_typed(black_box(&args), &mut diff_src).expect("execute");
                        black_box(&diff_src);
                    });
                },
            );
        }
    }
    group.finish();
}

/// Routine generation latency
fn bench_generate(c: &mut Criterion) {
    let mut group = c.benchmark_group("elementwise/generate");
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_secs(3));
    let caps = cpu_capabilities();
    let isa = bench_isa();

    for &alg in FWD_ALGS {
        for dir in [Direction::Forward, Direction::Backward] {
            let desc = KernelDesc::new(isa, DataType::Bf16, alg, 0.0, 0.0, dir);
            group.bench_function(format!("{}/{:?}", alg.name(), dir), |bench| {
                bench.iter(|| {
                    let k = EltwiseKernelGenerator::new(black_box(desc))
                        .generate(caps)
                        .expect("generate");
                    black_box(k);
                });
            });
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_scalar_fwd,
    bench_generated_fwd,
    bench_bwd,
    bench_generate,
);
criterion_main!(benches);
