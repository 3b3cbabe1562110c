use ark_ec::short_weierstrass::{Affine, Projective, SWCurveConfig};
use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::PrimeField;
use rayon::prelude::*;

pub mod batch_add;
pub mod bucket_width;
pub mod config;
pub mod partition;
pub mod reduce;
pub mod reference;
pub mod runtime_state;
pub mod wnaf;

pub use config::{MsmConfig, MsmParameters};
pub use reference::PippengerReference;
pub use runtime_state::{ArenaLayout, RuntimeArena};

use crate::utils::errors::MsmError;
use partition::{merge_thread_buckets, runtime_states};
use reduce::{combine_rounds, reduce_round};

/// Multi-scalar multiplication over short Weierstrass curves, backed by the
/// cached [`RuntimeArena`].
pub trait VariableBaseMSM: CurveGroup {
    fn msm(bases: &[Self::Affine], scalars: &[Self::ScalarField]) -> Result<Self, MsmError> {
        Self::msm_with_config(bases, scalars, &MsmConfig::default())
    }

    fn msm_with_config(
        bases: &[Self::Affine],
        scalars: &[Self::ScalarField],
        config: &MsmConfig,
    ) -> Result<Self, MsmError>;

    /// One MSM per scalar vector, all against `bases`.
    fn batch_msm(
        bases: &[Self::Affine],
        scalars: &[&[Self::ScalarField]],
    ) -> Result<Vec<Self>, MsmError>;
}

impl<P: SWCurveConfig> VariableBaseMSM for Projective<P> {
    fn msm_with_config(
        bases: &[Affine<P>],
        scalars: &[P::ScalarField],
        config: &MsmConfig,
    ) -> Result<Self, MsmError> {
        cached_msm(scalars, bases, None, config)
    }

    fn batch_msm(
        bases: &[Affine<P>],
        scalars: &[&[P::ScalarField]],
    ) -> Result<Vec<Self>, MsmError> {
        batch_cached_msm(scalars, bases, &MsmConfig::default())
    }
}

/// `sum_i scalars[i] * points[i]`.
///
/// Runs through the process-wide cached arena, sized for at least
/// `arena_hint` points so that a sequence of calls of growing size allocates
/// once. Not meant to be called from two top-level computations at the same
/// time; such calls serialize on the cached arena.
pub fn multiply_and_sum<P: SWCurveConfig>(
    scalars: &[P::ScalarField],
    points: &[Affine<P>],
    arena_hint: Option<usize>,
) -> Result<Affine<P>, MsmError> {
    multiply_and_sum_with_config(scalars, points, arena_hint, &MsmConfig::default())
}

pub fn multiply_and_sum_with_config<P: SWCurveConfig>(
    scalars: &[P::ScalarField],
    points: &[Affine<P>],
    arena_hint: Option<usize>,
    config: &MsmConfig,
) -> Result<Affine<P>, MsmError> {
    cached_msm(scalars, points, arena_hint, config).map(|sum| sum.into_affine())
}

/// [`multiply_and_sum`] for several scalar vectors sharing one basis. The
/// batches run one after another on a single arena handle.
pub fn batch_multiply_and_sum<P: SWCurveConfig>(
    batches: &[&[P::ScalarField]],
    points: &[Affine<P>],
) -> Result<Vec<Affine<P>>, MsmError> {
    let sums = batch_cached_msm(batches, points, &MsmConfig::default())?;
    Ok(Projective::normalize_batch(&sums))
}

fn cached_msm<P: SWCurveConfig>(
    scalars: &[P::ScalarField],
    points: &[Affine<P>],
    arena_hint: Option<usize>,
    config: &MsmConfig,
) -> Result<Projective<P>, MsmError> {
    MsmError::check_input_size(scalars.len(), points.len())?;
    let params = config.resolve::<P::ScalarField>(points.len())?;
    if params.use_naive() {
        return Ok(naive_msm(scalars, points));
    }

    let mut layout = params.layout();
    layout.num_points = layout.num_points.max(arena_hint.unwrap_or(0));
    let reference = PippengerReference::<P>::acquire(&layout)?;
    let mut arena = reference.get();
    arena.reserve(&layout)?;
    pippenger_unchecked(scalars, points, &mut arena, &params)
}

#[tracing::instrument(skip_all, fields(batches = batches.len()))]
fn batch_cached_msm<P: SWCurveConfig>(
    batches: &[&[P::ScalarField]],
    points: &[Affine<P>],
    config: &MsmConfig,
) -> Result<Vec<Projective<P>>, MsmError> {
    for scalars in batches {
        MsmError::check_input_size(scalars.len(), points.len())?;
    }
    let params = config.resolve::<P::ScalarField>(points.len())?;
    if params.use_naive() {
        return Ok(batches
            .iter()
            .map(|scalars| naive_msm(scalars, points))
            .collect());
    }

    let reference = PippengerReference::<P>::acquire(&params.layout())?;
    let mut arena = reference.get();
    batches
        .iter()
        .map(|scalars| pippenger_unchecked(scalars, points, &mut arena, &params))
        .collect()
}

/// Bucket-method MSM on a caller-owned arena, grown first if it is too small.
#[tracing::instrument(skip_all, fields(num_points = points.len()))]
pub fn pippenger<P: SWCurveConfig>(
    scalars: &[P::ScalarField],
    points: &[Affine<P>],
    arena: &mut RuntimeArena<P>,
    config: &MsmConfig,
) -> Result<Projective<P>, MsmError> {
    MsmError::check_input_size(scalars.len(), points.len())?;
    let params = config.resolve::<P::ScalarField>(points.len())?;
    if params.use_naive() {
        return Ok(naive_msm(scalars, points));
    }
    arena.reserve(&params.layout())?;
    pippenger_unchecked(scalars, points, arena, &params)
}

/// Per-point scalar multiplication, summed. Used below the naive threshold.
#[tracing::instrument(skip_all)]
pub fn naive_msm<P: SWCurveConfig>(
    scalars: &[P::ScalarField],
    points: &[Affine<P>],
) -> Projective<P> {
    scalars
        .par_iter()
        .zip(points)
        .map(|(scalar, point)| point.mul_bigint(scalar.into_bigint()))
        .sum()
}

/// Inputs are validated and the arena covers `params.layout()`.
#[tracing::instrument(skip_all, name = "pippenger_unchecked", fields(
    num_points = params.num_points,
    num_threads = params.num_threads,
    bucket_width = params.bucket_width
))]
fn pippenger_unchecked<P: SWCurveConfig>(
    scalars: &[P::ScalarField],
    points: &[Affine<P>],
    arena: &mut RuntimeArena<P>,
    params: &MsmParameters,
) -> Result<Projective<P>, MsmError> {
    let views = runtime_states(
        params.num_points,
        params.num_threads,
        params.num_rounds,
        params.num_buckets,
    );
    let (mut buffers, shared) = arena.split_views(&views)?;

    let span = tracing::span!(tracing::Level::INFO, "compute_wnaf_schedules");
    let _guard = span.enter();
    let skew_sums = buffers
        .par_iter_mut()
        .map(|buffer| buffer.compute_wnaf_schedule(scalars, points, params.bucket_width))
        .collect::<Result<Vec<_>, MsmError>>()?;
    let skew_sum: Projective<P> = skew_sums.into_iter().sum();
    drop(_guard);
    drop(span);

    let span = tracing::span!(tracing::Level::INFO, "accumulate_rounds");
    let _guard = span.enter();
    for round in 0..params.num_rounds {
        let counts: Vec<usize> = buffers
            .par_iter_mut()
            .map(|buffer| buffer.accumulate_round(round, points))
            .collect();
        merge_thread_buckets(
            &buffers,
            &counts,
            shared.bucket_accumulators,
            shared.bucket_empty_status,
        );
        shared.round_sums[round] =
            reduce_round(&*shared.bucket_accumulators, &*shared.bucket_empty_status);
    }
    drop(_guard);
    drop(span);

    Ok(combine_rounds(&*shared.round_sums, params.bucket_width) - skew_sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::counters::arena_live_bytes;
    use ark_bn254::{g1::Config as G1Config, Fr, G1Affine, G1Projective};
    use ark_ff::{AdditiveGroup, BigInteger, Field};
    use ark_std::{UniformRand, Zero};
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;
    use serial_test::serial;

    /// Textbook double-and-add, one point at a time.
    fn double_and_add(scalars: &[Fr], points: &[G1Affine]) -> G1Projective {
        let mut total = G1Projective::zero();
        for (scalar, point) in scalars.iter().zip(points) {
            let mut acc = G1Projective::zero();
            for bit in scalar.into_bigint().to_bits_be() {
                acc.double_in_place();
                if bit {
                    acc += point;
                }
            }
            total += acc;
        }
        total
    }

    fn random_input(n: usize, seed: u64) -> (Vec<Fr>, Vec<G1Affine>) {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let scalars = (0..n).map(|_| Fr::rand(&mut rng)).collect();
        let points = (0..n).map(|_| G1Affine::rand(&mut rng)).collect();
        (scalars, points)
    }

    fn bucket_only() -> MsmConfig {
        MsmConfig::default().with_naive_threshold(0)
    }

    #[test]
    #[serial]
    fn matches_double_and_add() {
        for (n, seed) in [(1, 1), (2, 2), (100, 3), (1000, 4)] {
            let (scalars, points) = random_input(n, seed);
            let expected = double_and_add(&scalars, &points).into_affine();
            let result =
                multiply_and_sum_with_config(&scalars, &points, None, &bucket_only()).unwrap();
            assert_eq!(result, expected, "n = {n}");
            assert_eq!(multiply_and_sum(&scalars, &points, None).unwrap(), expected);
        }
    }

    #[test]
    #[serial]
    fn large_input_matches_arkworks() {
        let (scalars, points) = random_input(100_000, 5);
        let expected = <G1Projective as ark_ec::VariableBaseMSM>::msm(&points, &scalars).unwrap();
        let result = multiply_and_sum(&scalars, &points, None).unwrap();
        assert_eq!(result, expected.into_affine());
    }

    #[test]
    #[serial]
    fn every_bucket_width() {
        let (scalars, points) = random_input(300, 6);
        let expected = double_and_add(&scalars, &points);
        let mut arena = RuntimeArena::<G1Config>::default();
        for bucket_width in 1..=12 {
            let config = bucket_only()
                .with_bucket_width(bucket_width)
                .with_num_threads(3);
            let result = pippenger(&scalars, &points, &mut arena, &config).unwrap();
            assert_eq!(result, expected, "bucket width {bucket_width}");
        }
    }

    #[test]
    #[serial]
    fn sixteen_generators() {
        let generator = G1Affine::generator();
        let points = vec![generator; 16];
        let scalars: Vec<Fr> = (1..=16u64).map(Fr::from).collect();
        let expected = (generator * Fr::from(136u64)).into_affine();

        let result = multiply_and_sum_with_config(&scalars, &points, None, &bucket_only());
        assert_eq!(result.unwrap(), expected);
        assert_eq!(double_and_add(&scalars, &points).into_affine(), expected);
    }

    #[test]
    #[serial]
    fn zero_scalars_contribute_nothing() {
        let (mut scalars, points) = random_input(200, 7);
        for i in [0, 17, 100, 199] {
            scalars[i] = Fr::zero();
        }
        let kept: Vec<usize> = (0..200).filter(|i| ![0, 17, 100, 199].contains(i)).collect();
        let kept_scalars: Vec<Fr> = kept.iter().map(|&i| scalars[i]).collect();
        let kept_points: Vec<G1Affine> = kept.iter().map(|&i| points[i]).collect();

        let config = bucket_only();
        let with_zeros = multiply_and_sum_with_config(&scalars, &points, None, &config).unwrap();
        let without =
            multiply_and_sum_with_config(&kept_scalars, &kept_points, None, &config).unwrap();
        assert_eq!(with_zeros, without);

        let all_zero = vec![Fr::zero(); 50];
        let result = multiply_and_sum_with_config(&all_zero, &points[..50], None, &config);
        assert!(result.unwrap().infinity);
    }

    #[test]
    #[serial]
    fn edge_scalars() {
        let (mut scalars, points) = random_input(64, 8);
        scalars[0] = -Fr::ONE;
        scalars[1] = Fr::ONE;
        scalars[2] = Fr::from(2u64);
        scalars[3] = -Fr::from(2u64);
        scalars[4] = scalars[5];
        let expected = double_and_add(&scalars, &points).into_affine();
        let result = multiply_and_sum_with_config(&scalars, &points, None, &bucket_only());
        assert_eq!(result.unwrap(), expected);
    }

    #[test]
    #[serial]
    fn thread_count_invariance() {
        let (scalars, points) = random_input(5000, 9);
        let single = multiply_and_sum_with_config(
            &scalars,
            &points,
            None,
            &bucket_only().with_num_threads(1),
        )
        .unwrap();
        let eight = multiply_and_sum_with_config(
            &scalars,
            &points,
            None,
            &bucket_only().with_num_threads(8),
        )
        .unwrap();
        assert_eq!(single, eight);
    }

    #[test]
    #[serial]
    fn naive_fallback_agrees() {
        let (scalars, points) = random_input(40, 10);
        let naive = multiply_and_sum_with_config(
            &scalars,
            &points,
            None,
            &MsmConfig::default().with_naive_threshold(usize::MAX),
        )
        .unwrap();
        let bucket = multiply_and_sum_with_config(&scalars, &points, None, &bucket_only());
        assert_eq!(naive, bucket.unwrap());
    }

    #[test]
    #[serial]
    fn invalid_inputs_are_rejected() {
        let (scalars, points) = random_input(10, 11);
        assert_eq!(
            multiply_and_sum(&scalars[..9], &points, None),
            Err(MsmError::InvalidInputSize {
                scalars: 9,
                points: 10
            })
        );
        assert_eq!(
            multiply_and_sum::<G1Config>(&[], &[], None),
            Err(MsmError::InvalidInputSize {
                scalars: 0,
                points: 0
            })
        );
        assert!(matches!(
            multiply_and_sum_with_config(
                &scalars,
                &points,
                None,
                &MsmConfig::default().with_bucket_width(40)
            ),
            Err(MsmError::InvalidBucketWidth(40))
        ));

        // A scalar wider than the configured bit length.
        let config = bucket_only().with_scalar_bits(64).with_bucket_width(3);
        let mut arena = RuntimeArena::<G1Config>::default();
        assert!(matches!(
            pippenger(&scalars, &points, &mut arena, &config),
            Err(MsmError::ScalarOutOfRange { .. })
        ));
    }

    #[test]
    #[serial]
    fn short_scalars_with_matching_bit_length() {
        let (_, points) = random_input(128, 12);
        let mut rng = ChaCha20Rng::seed_from_u64(12);
        let scalars: Vec<Fr> = (0..128).map(|_| Fr::from(u64::rand(&mut rng))).collect();
        let config = bucket_only().with_scalar_bits(64);
        let mut arena = RuntimeArena::<G1Config>::default();
        let result = pippenger(&scalars, &points, &mut arena, &config).unwrap();
        assert_eq!(result, double_and_add(&scalars, &points));
    }

    #[test]
    #[serial]
    fn batches_share_one_arena() {
        let (first, points) = random_input(256, 13);
        let (second, _) = random_input(256, 14);
        let results = batch_multiply_and_sum(&[first.as_slice(), second.as_slice()], &points).unwrap();
        assert_eq!(
            results,
            vec![
                double_and_add(&first, &points).into_affine(),
                double_and_add(&second, &points).into_affine()
            ]
        );
        assert!(!PippengerReference::<G1Config>::is_live());

        let sums = <G1Projective as VariableBaseMSM>::batch_msm(&points, &[first.as_slice()]).unwrap();
        assert_eq!(sums[0].into_affine(), results[0]);
    }

    #[test]
    #[serial]
    fn arena_hint_and_growth() {
        let baseline = arena_live_bytes();
        let reference =
            PippengerReference::<G1Config>::acquire(&ArenaLayout::new(64, 1, 2, 127)).unwrap();
        let (scalars, points) = random_input(3000, 15);

        let result = multiply_and_sum_with_config(&scalars, &points, Some(5000), &bucket_only());
        assert_eq!(result.unwrap(), double_and_add(&scalars, &points).into_affine());
        assert!(reference.get().capacity() >= 5000);

        // One arena is live, however many times it grew.
        let bytes = reference.get().allocated_bytes();
        assert_eq!(arena_live_bytes(), baseline + bytes);
        reference.release();
        assert_eq!(arena_live_bytes(), baseline);
    }

    #[test]
    #[serial]
    fn bucket_pair_with_unit_x_difference() {
        use ark_bn254::Fq;

        // y^2 = x^3 + 3 solvable at both x and x + 1.
        let on_curve = |x: Fq| {
            (x.square() * x + G1Config::COEFF_B)
                .sqrt()
                .map(|y| G1Affine::new_unchecked(x, y))
        };
        let mut x = Fq::from(1u64);
        let (p, q) = loop {
            if let (Some(p), Some(q)) = (on_curve(x), on_curve(x + Fq::from(1u64))) {
                break (p, q);
            }
            x += Fq::from(1u64);
        };

        let scalars = [Fr::from(1u64), Fr::from(1u64)];
        let config = bucket_only().with_num_threads(1);
        let result = multiply_and_sum_with_config(&scalars, &[p, q], None, &config);
        assert_eq!(result.unwrap(), (p + q).into_affine());
    }

    #[test]
    #[serial]
    fn oversized_arena_hint_is_rejected() {
        let points = vec![G1Affine::generator(); 64];
        let scalars = vec![Fr::from(1u64); 64];
        let result = multiply_and_sum_with_config(&scalars, &points, Some(1 << 60), &bucket_only());
        assert!(matches!(result, Err(MsmError::CapacityExceeded { .. })));
        assert!(!PippengerReference::<G1Config>::is_live());

        // The failure leaves nothing behind; a sane call still works.
        let result = multiply_and_sum_with_config(&scalars, &points, None, &bucket_only());
        assert_eq!(result.unwrap(), (G1Affine::generator() * Fr::from(64u64)).into_affine());
    }

    #[test]
    #[serial]
    fn explicit_arena_is_reused() {
        let (scalars, points) = random_input(500, 16);
        let mut arena = RuntimeArena::<G1Config>::default();
        let config = bucket_only();
        let first = pippenger(&scalars, &points, &mut arena, &config).unwrap();
        let layout = arena.layout();
        let second = pippenger(&scalars[..400], &points[..400], &mut arena, &config).unwrap();
        assert_eq!(arena.layout(), layout);
        assert_eq!(first, double_and_add(&scalars, &points));
        assert_eq!(second, double_and_add(&scalars[..400], &points[..400]));
    }
}
