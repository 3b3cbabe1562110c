use ark_bn254::{g1::Config as G1Config, Fr, G1Affine, G1Projective};
use ark_ec::VariableBaseMSM as ArkMSM;
use ark_std::UniformRand;
use criterion::Criterion;
use msm_core::msm::{
    batch_multiply_and_sum, multiply_and_sum, pippenger, MsmConfig, RuntimeArena,
};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

fn setup_bench(log_size: usize) -> (Vec<G1Affine>, Vec<Fr>) {
    let mut rng = ChaCha20Rng::seed_from_u64(log_size as u64);
    let bases: Vec<G1Affine> = std::iter::repeat_with(|| G1Affine::rand(&mut rng))
        .take(1 << log_size)
        .collect();
    let scalars: Vec<Fr> = std::iter::repeat_with(|| Fr::rand(&mut rng))
        .take(1 << log_size)
        .collect();
    (bases, scalars)
}

fn benchmark_msm(c: &mut Criterion, log_size: usize) {
    let (bases, scalars) = setup_bench(log_size);

    c.bench_function(&format!("multiply_and_sum (2^{log_size})"), |b| {
        b.iter(|| multiply_and_sum(&scalars, &bases, None).unwrap());
    });

    let mut arena = RuntimeArena::<G1Config>::default();
    let config = MsmConfig::default();
    c.bench_function(&format!("pippenger, owned arena (2^{log_size})"), |b| {
        b.iter(|| pippenger(&scalars, &bases, &mut arena, &config).unwrap());
    });

    c.bench_function(&format!("ark_ec::VariableBaseMSM::msm (2^{log_size})"), |b| {
        b.iter(|| <G1Projective as ArkMSM>::msm(&bases, &scalars).unwrap());
    });
}

fn benchmark_batch(c: &mut Criterion, log_size: usize, batch_size: usize) {
    let (bases, _) = setup_bench(log_size);
    let mut rng = ChaCha20Rng::seed_from_u64(batch_size as u64);
    let batches: Vec<Vec<Fr>> = (0..batch_size)
        .map(|_| (0..bases.len()).map(|_| Fr::rand(&mut rng)).collect())
        .collect();
    let batches_ref: Vec<&[Fr]> = batches.iter().map(|batch| batch.as_slice()).collect();

    c.bench_function(
        &format!("batch_multiply_and_sum ({batch_size} x 2^{log_size})"),
        |b| {
            b.iter(|| {
                let sums = batch_multiply_and_sum(&batches_ref, &bases).unwrap();
                assert_eq!(sums.len(), batch_size);
            });
        },
    );
}

fn main() {
    let mut criterion = Criterion::default()
        .configure_from_args()
        .sample_size(10)
        .warm_up_time(std::time::Duration::from_secs(5));
    for log_size in [10, 14, 18] {
        benchmark_msm(&mut criterion, log_size);
    }
    benchmark_batch(&mut criterion, 14, 8);
    criterion.final_summary();
}
