//! Bucket accumulation with batched affine addition.
//!
//! A round's schedule is counting-sorted by bucket id into the first pair
//! buffer, so every bucket owns a contiguous run of slots. Each level of the
//! tournament then adds neighbouring slots of the same bucket, sharing one
//! field inversion across all additions of the level (Montgomery's trick),
//! and writes the results compacted into the other pair buffer. After
//! `ceil(log2(largest bucket))` levels every non-empty bucket is one point.

use ark_ec::short_weierstrass::{Affine, SWCurveConfig};
use ark_ff::{AdditiveGroup, Field};
use ark_std::{One, Zero};

use crate::msm::runtime_state::ThreadBuffers;
use crate::utils::math::Math;

/// Partner marker for slots that were copied rather than added.
const NO_PARTNER: u32 = u32::MAX;
/// Set on a partner index when both inputs are the same point.
const DOUBLING_FLAG: u32 = 1 << 31;

impl<P: SWCurveConfig> ThreadBuffers<'_, P> {
    /// Sums this thread's points for every bucket of `round`.
    ///
    /// Returns the number of non-empty buckets. Their sums are left in
    /// `point_pairs_1[..count]`, with matching bucket ids in ascending order
    /// in `slot_buckets_1[..count]`.
    #[tracing::instrument(skip_all, level = "trace", fields(thread = self.view.thread_index, round))]
    pub fn accumulate_round(&mut self, round: usize, points: &[Affine<P>]) -> usize {
        let stride = self.view.num_points;
        let num_buckets = self.view.num_buckets;
        let schedule = &self.point_schedule[round * stride..(round + 1) * stride];

        let counts = &mut self.bucket_counts[..=num_buckets];
        counts.fill(0);
        for entry in schedule {
            counts[entry.bucket_id()] += 1;
        }

        let offsets = &mut self.bucket_offsets[..=num_buckets];
        offsets[0] = 0;
        let mut total = 0u32;
        let mut largest = 0u32;
        for bucket in 1..=num_buckets {
            offsets[bucket] = total;
            total += counts[bucket];
            largest = largest.max(counts[bucket]);
        }

        for entry in schedule.iter().filter(|entry| !entry.is_skip()) {
            let bucket = entry.bucket_id();
            let slot = offsets[bucket] as usize;
            offsets[bucket] += 1;
            let point = points[entry.point_index()];
            self.point_pairs_1[slot] = if entry.is_negative() { -point } else { point };
            self.slot_buckets_1[slot] = bucket as u32;
        }

        let mut count = total as usize;
        let levels = (largest as usize).max(1).log_2();
        for _ in 0..levels {
            count = add_bucket_pairs(
                &self.point_pairs_1[..count],
                &self.slot_buckets_1[..count],
                self.point_pairs_2,
                self.slot_buckets_2,
                self.scratch_space,
                self.pair_partners,
            );
            std::mem::swap(&mut self.point_pairs_1, &mut self.point_pairs_2);
            std::mem::swap(&mut self.slot_buckets_1, &mut self.slot_buckets_2);
        }
        count
    }
}

/// One level of the tournament.
///
/// `input_buckets` must be sorted. Adjacent slots with the same bucket id
/// are added; a slot without a partner is copied through. Returns the number
/// of slots written to `output`.
pub fn add_bucket_pairs<P: SWCurveConfig>(
    input: &[Affine<P>],
    input_buckets: &[u32],
    output: &mut [Affine<P>],
    output_buckets: &mut [u32],
    scratch: &mut [P::BaseField],
    partners: &mut [u32],
) -> usize {
    debug_assert_eq!(input.len(), input_buckets.len());

    // Forward pass: classify each pair and accumulate the product of the
    // denominators, storing the prefix product before each one.
    let mut product = P::BaseField::one();
    let mut pending = 0;
    let mut written = 0;
    let mut i = 0;
    while i < input.len() {
        output_buckets[written] = input_buckets[i];
        partners[written] = NO_PARTNER;

        let paired = i + 1 < input.len() && input_buckets[i] == input_buckets[i + 1];
        if !paired {
            output[written] = input[i];
            i += 1;
            written += 1;
            continue;
        }

        let (p1, p2) = (&input[i], &input[i + 1]);
        let denominator = if p1.infinity {
            output[written] = *p2;
            None
        } else if p2.infinity {
            output[written] = *p1;
            None
        } else if p1.x != p2.x {
            partners[written] = i as u32;
            Some(p2.x - p1.x)
        } else if p1.y == p2.y && !p1.y.is_zero() {
            partners[written] = i as u32 | DOUBLING_FLAG;
            Some(p1.y.double())
        } else {
            // P + (-P)
            output[written] = Affine::identity();
            None
        };
        if let Some(denominator) = denominator {
            scratch[written] = product;
            product *= denominator;
            pending += 1;
        }
        i += 2;
        written += 1;
    }

    if pending == 0 {
        return written;
    }
    let mut inverse = product
        .inverse()
        .expect("product of non-zero denominators is invertible");

    // Backward pass: peel one denominator off the running inverse per pair.
    for slot in (0..written).rev() {
        let partner = partners[slot];
        if partner == NO_PARTNER {
            continue;
        }
        let doubling = partner & DOUBLING_FLAG != 0;
        let index = (partner & !DOUBLING_FLAG) as usize;
        let (p1, p2) = (&input[index], &input[index + 1]);

        let denominator_inverse = inverse * scratch[slot];
        let lambda = if doubling {
            inverse *= p1.y.double();
            let x_squared = p1.x.square();
            (x_squared.double() + x_squared + P::COEFF_A) * denominator_inverse
        } else {
            inverse *= p2.x - p1.x;
            (p2.y - p1.y) * denominator_inverse
        };

        let x3 = lambda.square() - p1.x - p2.x;
        let y3 = lambda * (p1.x - x3) - p1.y;
        output[slot] = Affine::new_unchecked(x3, y3);
    }
    written
}
