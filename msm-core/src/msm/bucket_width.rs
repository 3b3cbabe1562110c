//! Window (bucket width) selection for the bucket method.
//!
//! The bucket width `c` decides how many buckets a round has (`2^c`, since
//! signed odd digits of a `c + 1` bit window only need half of the values)
//! and how many rounds a scalar is split into (`ceil(bits / (c + 1))`).
//!
//! The breakpoints below were tuned for BN254 G1 with 254-bit scalars. They
//! are a tuning table, not part of the algorithm: a different curve or field
//! cost should re-derive them, e.g. with [`derive_breakpoints`].

use crate::utils::math::Math;

/// Largest width a `ScheduleEntry` can address (bucket ids use 23 bits).
pub const MAX_BUCKET_WIDTH: usize = 22;

/// `(min_num_points, bucket_width)`, sorted by descending point count.
pub const BUCKET_WIDTH_BREAKPOINTS: [(usize, usize); 14] = [
    (14_617_149, 21),
    (1_139_094, 18),
    (155_975, 15),
    (144_834, 14),
    (25_067, 12),
    (13_926, 11),
    (7_659, 10),
    (2_436, 9),
    (376, 7),
    (231, 6),
    (97, 5),
    (35, 4),
    (10, 3),
    (2, 2),
];

/// Bucket width for an MSM over `num_points` points.
pub const fn get_optimal_bucket_width(num_points: usize) -> usize {
    bucket_width_from_table(&BUCKET_WIDTH_BREAKPOINTS, num_points)
}

/// Looks `num_points` up in a breakpoint table sorted by descending threshold.
/// Inputs below every threshold (in particular `n < 2`) get width 1.
pub const fn bucket_width_from_table(table: &[(usize, usize)], num_points: usize) -> usize {
    let mut i = 0;
    while i < table.len() {
        if num_points >= table[i].0 {
            return table[i].1;
        }
        i += 1;
    }
    1
}

#[inline]
pub const fn get_num_buckets(bucket_width: usize) -> usize {
    1 << bucket_width
}

/// Rounds needed to cover `scalar_bits` bits with `bucket_width + 1` bit windows.
#[inline]
pub const fn get_num_rounds(scalar_bits: usize, bucket_width: usize) -> usize {
    scalar_bits.div_ceil(bucket_width + 1)
}

/// Group additions for one MSM under the cost model: every round adds each
/// point into a bucket, then spends `2 * 2^c + 2` additions on the
/// triangle-sum and the window combination.
pub fn estimated_cost(num_points: usize, bucket_width: usize, scalar_bits: usize) -> usize {
    let rounds = get_num_rounds(scalar_bits, bucket_width);
    rounds * (num_points + 2 * bucket_width.pow2() + 2)
}

/// Width minimizing [`estimated_cost`]; ties go to the smaller width.
pub fn model_optimal_bucket_width(
    num_points: usize,
    scalar_bits: usize,
    max_width: usize,
) -> usize {
    if num_points < 2 {
        return 1;
    }
    (1..=max_width)
        .min_by_key(|&c| (estimated_cost(num_points, c, scalar_bits), c))
        .unwrap_or(1)
}

/// Regenerates a breakpoint table (same shape as [`BUCKET_WIDTH_BREAKPOINTS`])
/// from the cost model for a given scalar bit length.
pub fn derive_breakpoints(scalar_bits: usize, max_width: usize) -> Vec<(usize, usize)> {
    const SEARCH_LIMIT: usize = 1 << 40;

    let mut table = Vec::new();
    let mut last_threshold = 1;
    for width in 2..=max_width {
        if model_optimal_bucket_width(SEARCH_LIMIT, scalar_bits, max_width) < width {
            break;
        }
        // Smallest n whose optimal width reaches `width`.
        let (mut lo, mut hi) = (last_threshold, SEARCH_LIMIT);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if model_optimal_bucket_width(mid, scalar_bits, max_width) >= width {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        if model_optimal_bucket_width(lo, scalar_bits, max_width) != width {
            // `width` is never strictly optimal; the next width takes over here.
            continue;
        }
        last_threshold = lo;
        table.push((lo, width));
    }
    table.reverse();
    table
}
