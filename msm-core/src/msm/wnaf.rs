//! Fixed-window non-adjacent form decoding of scalars into point schedules.
//!
//! A scalar is cut into `bucket_width + 1` bit windows. Every window up to
//! the scalar's highest non-zero window gets an odd digit in
//! `[-(2^(c+1) - 1), 2^(c+1) - 1]`: when the next window is even we borrow
//! `2^(c+1)` from the current digit and add one to the next. Windows above
//! the highest one stay zero. An even scalar is made odd by adding one
//! (the skew), which the caller removes by subtracting the base point.
//!
//! ```text
//! scalar = sum_i digit_i * 2^(i * (c + 1)) - skew
//! ```

use ark_ec::short_weierstrass::{Affine, Projective, SWCurveConfig};
use ark_ff::{BigInteger, PrimeField};
use ark_std::{One, Zero};

use crate::msm::runtime_state::ThreadBuffers;
use crate::utils::errors::MsmError;

/// Largest number of points a schedule can address. Pair partners in the
/// batched addition reserve the top bit of a `u32` index.
pub const MAX_NUM_POINTS: usize = (1 << 31) - 1;

const POINT_INDEX_BITS: u32 = 32;
const BUCKET_ID_BITS: u32 = 23;
const ROUND_BITS: u32 = 8;
const BUCKET_ID_SHIFT: u32 = POINT_INDEX_BITS;
const ROUND_SHIFT: u32 = BUCKET_ID_SHIFT + BUCKET_ID_BITS;
const SIGN_SHIFT: u32 = ROUND_SHIFT + ROUND_BITS;

/// `(point_index, bucket_id, round, sign)` packed into 64 bits.
///
/// Bucket id 0 marks a zero digit: the point is skipped in that round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ScheduleEntry(u64);

impl ScheduleEntry {
    pub const SKIP_BUCKET: usize = 0;

    #[inline]
    pub fn new(point_index: usize, bucket_id: usize, round: usize, negative: bool) -> Self {
        debug_assert!(point_index <= u32::MAX as usize);
        debug_assert!(bucket_id < 1 << BUCKET_ID_BITS);
        debug_assert!(round < 1 << ROUND_BITS);
        Self(
            point_index as u64
                | (bucket_id as u64) << BUCKET_ID_SHIFT
                | (round as u64) << ROUND_SHIFT
                | (negative as u64) << SIGN_SHIFT,
        )
    }

    /// Schedule entry for a signed digit.
    #[inline]
    pub fn from_digit(point_index: usize, digit: i64, round: usize) -> Self {
        Self::new(point_index, digit_to_bucket(digit), round, digit < 0)
    }

    #[inline]
    pub fn point_index(self) -> usize {
        (self.0 & ((1 << POINT_INDEX_BITS) - 1)) as usize
    }

    #[inline]
    pub fn bucket_id(self) -> usize {
        ((self.0 >> BUCKET_ID_SHIFT) & ((1 << BUCKET_ID_BITS) - 1)) as usize
    }

    #[inline]
    pub fn round(self) -> usize {
        ((self.0 >> ROUND_SHIFT) & ((1 << ROUND_BITS) - 1)) as usize
    }

    #[inline]
    pub fn is_negative(self) -> bool {
        self.0 >> SIGN_SHIFT == 1
    }

    #[inline]
    pub fn is_skip(self) -> bool {
        self.bucket_id() == Self::SKIP_BUCKET
    }
}

/// Odd digit `d` lives in bucket `(|d| + 1) / 2`, zero in bucket 0.
#[inline]
pub fn digit_to_bucket(digit: i64) -> usize {
    (digit.unsigned_abs() as usize).div_ceil(2)
}

/// Reads `count < 64` bits of a little-endian limb array starting at `offset`.
#[inline]
fn get_wnaf_bits(limbs: &[u64], offset: usize, count: usize) -> u64 {
    let limb = offset / 64;
    let shift = offset % 64;
    let Some(&lo) = limbs.get(limb) else {
        return 0;
    };
    let mut bits = lo >> shift;
    if shift + count > 64 {
        if let Some(&hi) = limbs.get(limb + 1) {
            bits |= hi << (64 - shift);
        }
    }
    bits & ((1u64 << count) - 1)
}

fn num_bits(limbs: &[u64]) -> usize {
    limbs
        .iter()
        .rposition(|&limb| limb != 0)
        .map_or(0, |i| i * 64 + 64 - limbs[i].leading_zeros() as usize)
}

/// Walks the digits of one scalar from the least significant round up,
/// handing `(round, digit)` to `emit` for every round. Returns the skew.
pub fn fixed_wnaf(
    limbs: &[u64],
    bucket_width: usize,
    num_rounds: usize,
    mut emit: impl FnMut(usize, i64),
) -> Result<bool, MsmError> {
    let window = bucket_width + 1;
    let bits = num_bits(limbs);
    if bits > window * num_rounds {
        return Err(MsmError::ScalarOutOfRange {
            bits,
            max_bits: window * num_rounds,
        });
    }
    if bits == 0 {
        (0..num_rounds).for_each(|round| emit(round, 0));
        return Ok(false);
    }

    let top_round = (bits - 1) / window;
    let skew = limbs[0] & 1 == 0;
    let mut previous = get_wnaf_bits(limbs, 0, window) + skew as u64;
    for round in 1..=top_round {
        let slice = get_wnaf_bits(limbs, round * window, window);
        let borrow = slice & 1 == 0;
        emit(round - 1, previous as i64 - ((borrow as i64) << window));
        previous = slice + borrow as u64;
    }
    emit(top_round, previous as i64);
    (top_round + 1..num_rounds).for_each(|round| emit(round, 0));
    Ok(skew)
}

/// Digits of one scalar, least significant round first, plus its skew.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WnafDecomposition {
    pub digits: Vec<i64>,
    pub skew: bool,
}

pub fn decompose<F: PrimeField>(
    scalar: &F,
    bucket_width: usize,
    num_rounds: usize,
) -> Result<WnafDecomposition, MsmError> {
    let bigint = scalar.into_bigint();
    let mut digits = vec![0i64; num_rounds];
    let skew = fixed_wnaf(bigint.as_ref(), bucket_width, num_rounds, |round, digit| {
        digits[round] = digit
    })?;
    Ok(WnafDecomposition { digits, skew })
}

/// Inverse of [`decompose`], evaluated in the scalar field.
pub fn recompose<F: PrimeField>(decomposition: &WnafDecomposition, bucket_width: usize) -> F {
    let radix = F::from(2u64).pow([(bucket_width + 1) as u64]);
    let sum = decomposition
        .digits
        .iter()
        .rev()
        .fold(F::zero(), |acc, &digit| {
            let magnitude = F::from(digit.unsigned_abs());
            acc * radix + if digit < 0 { -magnitude } else { magnitude }
        });
    if decomposition.skew {
        sum - F::one()
    } else {
        sum
    }
}

impl<P: SWCurveConfig> ThreadBuffers<'_, P> {
    /// Writes the schedule of every round for this thread's points and returns
    /// the sum of the base points whose scalars carry a skew.
    #[tracing::instrument(skip_all, level = "trace", fields(thread = self.view.thread_index))]
    pub fn compute_wnaf_schedule(
        &mut self,
        scalars: &[P::ScalarField],
        points: &[Affine<P>],
        bucket_width: usize,
    ) -> Result<Projective<P>, MsmError> {
        let view = self.view;
        let stride = view.num_points;
        let range = view.point_range();
        let mut skew_sum = Projective::<P>::zero();

        for (local, (scalar, point)) in scalars[range.clone()]
            .iter()
            .zip(&points[range.clone()])
            .enumerate()
        {
            let point_index = view.point_offset + local;
            let schedule = &mut *self.point_schedule;
            let skew = fixed_wnaf(
                scalar.into_bigint().as_ref(),
                bucket_width,
                view.num_rounds,
                |round, digit| {
                    schedule[round * stride + local] =
                        ScheduleEntry::from_digit(point_index, digit, round)
                },
            )?;
            self.skew_table[local] = skew;
            if skew {
                skew_sum += point;
            }
        }
        Ok(skew_sum)
    }
}
