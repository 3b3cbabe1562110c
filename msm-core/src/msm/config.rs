use ark_ff::{BigInteger, PrimeField};

use crate::msm::bucket_width::{
    get_num_buckets, get_num_rounds, get_optimal_bucket_width, MAX_BUCKET_WIDTH,
};
use crate::msm::runtime_state::{ArenaLayout, MAX_NUM_ROUNDS};
use crate::utils::errors::MsmError;

/// Per-call tuning knobs. Every `None` falls back to a value derived from
/// the input size and the rayon pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsmConfig {
    pub num_threads: Option<usize>,
    pub bucket_width: Option<usize>,
    /// Inputs of at most this many points use per-point multiplication.
    /// `Some(0)` always runs the bucket method.
    pub naive_threshold: Option<usize>,
    pub scalar_bits: Option<usize>,
}

impl MsmConfig {
    /// Config with the bucket width pinned to the tuning table's choice for
    /// `num_points`.
    pub fn default_for_size(num_points: usize) -> Self {
        Self {
            bucket_width: Some(get_optimal_bucket_width(num_points)),
            ..Self::default()
        }
    }

    pub fn with_num_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = Some(num_threads);
        self
    }

    pub fn with_bucket_width(mut self, bucket_width: usize) -> Self {
        self.bucket_width = Some(bucket_width);
        self
    }

    pub fn with_naive_threshold(mut self, naive_threshold: usize) -> Self {
        self.naive_threshold = Some(naive_threshold);
        self
    }

    pub fn with_scalar_bits(mut self, scalar_bits: usize) -> Self {
        self.scalar_bits = Some(scalar_bits);
        self
    }

    /// Fills in every unset knob for an input of `num_points` points over the
    /// scalar field `F`, and checks the ones that were set.
    pub fn resolve<F: PrimeField>(&self, num_points: usize) -> Result<MsmParameters, MsmError> {
        let num_threads = self
            .num_threads
            .unwrap_or_else(rayon::current_num_threads)
            .clamp(1, num_points.max(1));

        let bucket_width = self
            .bucket_width
            .unwrap_or_else(|| get_optimal_bucket_width(num_points));
        if !(1..=MAX_BUCKET_WIDTH).contains(&bucket_width) {
            return Err(MsmError::InvalidBucketWidth(bucket_width));
        }

        let max_bits = F::BigInt::NUM_LIMBS * 64;
        let scalar_bits = self
            .scalar_bits
            .unwrap_or(F::MODULUS_BIT_SIZE as usize);
        let num_rounds = get_num_rounds(scalar_bits, bucket_width);
        if scalar_bits == 0 || scalar_bits > max_bits || num_rounds > MAX_NUM_ROUNDS {
            return Err(MsmError::InvalidScalarBits {
                bits: scalar_bits,
                max_bits,
            });
        }

        let naive_threshold = self
            .naive_threshold
            .unwrap_or(8 * num_threads.next_power_of_two());

        Ok(MsmParameters {
            num_points,
            num_threads,
            bucket_width,
            num_buckets: get_num_buckets(bucket_width),
            num_rounds,
            scalar_bits,
            naive_threshold,
        })
    }
}

/// A fully resolved [`MsmConfig`] for one input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MsmParameters {
    pub num_points: usize,
    pub num_threads: usize,
    pub bucket_width: usize,
    pub num_buckets: usize,
    pub num_rounds: usize,
    pub scalar_bits: usize,
    pub naive_threshold: usize,
}

impl MsmParameters {
    pub fn use_naive(&self) -> bool {
        self.num_points <= self.naive_threshold
    }

    pub fn layout(&self) -> ArenaLayout {
        ArenaLayout::new(
            self.num_points,
            self.num_threads,
            self.num_buckets,
            self.num_rounds,
        )
    }
}
