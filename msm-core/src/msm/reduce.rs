use ark_ec::CurveGroup;

/// Returns `(sum_b b * buckets[b], sum_b buckets[b])` over buckets `1..`,
/// skipping empty ones. Index 0 is the skip bucket and is ignored.
pub fn triangle_sum<G: CurveGroup>(buckets: &[G], empty: &[bool]) -> (G, G) {
    let mut running = G::zero();
    let mut weighted = G::zero();
    for (bucket, &is_empty) in buckets.iter().zip(empty).skip(1).rev() {
        if !is_empty {
            running += bucket;
        }
        weighted += running;
    }
    (weighted, running)
}

/// Sum of one round: bucket `b` collects the digits `±(2b - 1)`.
#[tracing::instrument(skip_all, level = "trace")]
pub fn reduce_round<G: CurveGroup>(buckets: &[G], empty: &[bool]) -> G {
    let (weighted, running) = triangle_sum(buckets, empty);
    weighted.double() - running
}

/// Horner evaluation of the round sums, most significant round first, with
/// `bucket_width + 1` doublings between rounds.
#[tracing::instrument(skip_all)]
pub fn combine_rounds<G: CurveGroup>(round_sums: &[G], bucket_width: usize) -> G {
    round_sums.iter().rev().fold(G::zero(), |mut total, round_sum| {
        for _ in 0..=bucket_width {
            total.double_in_place();
        }
        total + round_sum
    })
}
