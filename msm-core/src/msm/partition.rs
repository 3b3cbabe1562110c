use std::ops::Range;

use ark_ec::short_weierstrass::{Projective, SWCurveConfig};
use ark_std::Zero;
use rayon::prelude::*;

use crate::msm::runtime_state::{AffineProductRuntimeState, ThreadBuffers};

/// Splits `0..num_points` into at most `num_threads` contiguous ranges whose
/// lengths differ by at most one.
pub fn partition_points(num_points: usize, num_threads: usize) -> Vec<Range<usize>> {
    let num_threads = num_threads.clamp(1, num_points.max(1));
    let chunk = num_points / num_threads;
    let remainder = num_points % num_threads;

    let mut start = 0;
    (0..num_threads)
        .map(|thread| {
            let len = chunk + usize::from(thread < remainder);
            let range = start..start + len;
            start += len;
            range
        })
        .collect()
}

/// One view per partition range, all sharing the round and bucket counts.
pub fn runtime_states(
    num_points: usize,
    num_threads: usize,
    num_rounds: usize,
    num_buckets: usize,
) -> Vec<AffineProductRuntimeState> {
    partition_points(num_points, num_threads)
        .into_iter()
        .enumerate()
        .map(|(thread_index, range)| AffineProductRuntimeState {
            thread_index,
            point_offset: range.start,
            num_points: range.len(),
            num_rounds,
            num_buckets,
        })
        .collect()
}

/// Adds every thread's bucket sums for the current round into
/// `accumulators`, marking buckets nobody touched as empty.
///
/// `counts[t]` is the number of occupied slots left by
/// [`ThreadBuffers::accumulate_round`] on thread `t`.
#[tracing::instrument(skip_all)]
pub fn merge_thread_buckets<P: SWCurveConfig>(
    buffers: &[ThreadBuffers<'_, P>],
    counts: &[usize],
    accumulators: &mut [Projective<P>],
    empty: &mut [bool],
) {
    let chunk_size = accumulators
        .len()
        .div_ceil(rayon::current_num_threads())
        .max(1);
    accumulators
        .par_chunks_mut(chunk_size)
        .zip(empty.par_chunks_mut(chunk_size))
        .enumerate()
        .for_each(|(chunk_index, (accumulators, empty))| {
            accumulators.fill(Projective::zero());
            empty.fill(true);

            let first = chunk_index * chunk_size;
            let last = first + accumulators.len();
            for (buffer, &count) in buffers.iter().zip(counts) {
                let ids = &buffer.slot_buckets_1[..count];
                let start = ids.partition_point(|&id| (id as usize) < first);
                let end = ids.partition_point(|&id| (id as usize) < last);
                for slot in start..end {
                    let bucket = ids[slot] as usize - first;
                    accumulators[bucket] += buffer.point_pairs_1[slot];
                    empty[bucket] = false;
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_cover_input() {
        for (n, threads) in [(1, 8), (7, 3), (100, 8), (16, 16), (5, 1)] {
            let ranges = partition_points(n, threads);
            assert_eq!(ranges.len(), threads.min(n));
            assert_eq!(ranges[0].start, 0);
            assert_eq!(ranges.last().unwrap().end, n);
            for pair in ranges.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert!(pair[0].len().abs_diff(pair[1].len()) <= 1);
            }
        }
    }

    #[test]
    fn zero_threads_means_one() {
        assert_eq!(partition_points(10, 0), vec![0..10]);
    }

    #[test]
    fn views_follow_partitions() {
        let views = runtime_states(10, 3, 20, 16);
        let ranges: Vec<_> = views.iter().map(|view| view.point_range()).collect();
        assert_eq!(ranges, vec![0..4, 4..7, 7..10]);
        assert!(views.iter().enumerate().all(|(i, view)| view.thread_index == i));
        assert_eq!(views[1].schedule_range(), 80..140);
        assert_eq!(views[2].bucket_range(), 34..51);
    }
}
