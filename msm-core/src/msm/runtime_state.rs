//! Preallocated scratch memory for the bucket method.
//!
//! Every buffer the hot loop touches is allocated (and written once, so the
//! pages are faulted in) when the arena is built, then reused by every MSM
//! that fits its layout. Worker threads never see the arena itself: they get
//! an [`AffineProductRuntimeState`] (offsets into the arena) which
//! [`RuntimeArena::split_views`] turns into disjoint mutable slices.

use std::mem::size_of;
use std::ops::Range;

use ark_ec::short_weierstrass::{Affine, Projective, SWCurveConfig};
use ark_std::Zero;

use crate::msm::bucket_width::get_optimal_bucket_width;
use crate::msm::wnaf::ScheduleEntry;
use crate::utils::counters::{record_arena_allocation, record_arena_release};
use crate::utils::errors::MsmError;
use crate::utils::math::Math;

/// Rounds addressable by a `ScheduleEntry`.
pub const MAX_NUM_ROUNDS: usize = 256;

/// Point capacity multiplier applied when an arena is created or grown, so
/// that a following call with a somewhat larger input reuses it.
pub const ARENA_HEADROOM: usize = 2;

/// Dimensions an arena is sized for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaLayout {
    pub num_points: usize,
    pub num_threads: usize,
    pub num_buckets: usize,
    pub num_rounds: usize,
}

impl ArenaLayout {
    pub fn new(num_points: usize, num_threads: usize, num_buckets: usize, num_rounds: usize) -> Self {
        Self {
            num_points,
            num_threads,
            num_buckets,
            num_rounds,
        }
    }

    pub fn schedule_len(&self) -> Result<usize, MsmError> {
        self.num_points
            .checked_mul(self.num_rounds)
            .ok_or(MsmError::CapacityExceeded { requested: usize::MAX })
    }

    /// Per-thread bucket tables, each with a slot for the skip bucket.
    pub fn bucket_table_len(&self) -> Result<usize, MsmError> {
        self.num_buckets
            .checked_add(1)
            .and_then(|slots| slots.checked_mul(self.num_threads))
            .ok_or(MsmError::CapacityExceeded { requested: usize::MAX })
    }

    pub fn covers(&self, other: &ArenaLayout) -> bool {
        self.num_points >= other.num_points
            && self.num_threads >= other.num_threads
            && self.num_buckets >= other.num_buckets
            && self.num_rounds >= other.num_rounds
    }

    pub fn union(&self, other: &ArenaLayout) -> Self {
        Self {
            num_points: self.num_points.max(other.num_points),
            num_threads: self.num_threads.max(other.num_threads),
            num_buckets: self.num_buckets.max(other.num_buckets),
            num_rounds: self.num_rounds.max(other.num_rounds),
        }
    }

    /// Room for [`ARENA_HEADROOM`] times the points, with the bucket count
    /// the larger input would select.
    pub fn with_headroom(&self) -> Self {
        let num_points = self.num_points.saturating_mul(ARENA_HEADROOM);
        Self {
            num_points,
            num_buckets: self
                .num_buckets
                .max(get_optimal_bucket_width(num_points).pow2()),
            ..*self
        }
    }

    /// Bytes owned by an arena with this layout, or `CapacityExceeded` if
    /// that does not fit in a `usize`.
    pub fn byte_size<P: SWCurveConfig>(&self) -> Result<usize, MsmError> {
        let per_point = size_of::<bool>()
            + 2 * size_of::<Affine<P>>()
            + size_of::<P::BaseField>()
            + 3 * size_of::<u32>();
        let terms = [
            self.schedule_len()?.checked_mul(size_of::<ScheduleEntry>()),
            self.num_points.checked_mul(per_point),
            self.bucket_table_len()?.checked_mul(2 * size_of::<u32>()),
            self.num_buckets
                .checked_add(1)
                .and_then(|slots| slots.checked_mul(size_of::<Projective<P>>() + size_of::<bool>())),
            self.num_rounds.checked_mul(size_of::<Projective<P>>()),
        ];
        terms
            .into_iter()
            .try_fold(0usize, |total, term| total.checked_add(term?))
            .ok_or(MsmError::CapacityExceeded { requested: usize::MAX })
    }
}

fn try_allocate<T: Clone>(len: usize, value: T) -> Result<Vec<T>, MsmError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|_| MsmError::CapacityExceeded {
            requested: len.saturating_mul(size_of::<T>()),
        })?;
    buffer.resize(len, value);
    Ok(buffer)
}

/// Scratch memory for [`crate::msm::pippenger`].
///
/// Not `Clone`: an arena can hold gigabytes and is only ever moved.
pub struct RuntimeArena<P: SWCurveConfig> {
    layout: ArenaLayout,
    allocated_bytes: usize,
    point_schedule: Vec<ScheduleEntry>,
    skew_table: Vec<bool>,
    point_pairs_1: Vec<Affine<P>>,
    point_pairs_2: Vec<Affine<P>>,
    scratch_space: Vec<P::BaseField>,
    slot_buckets_1: Vec<u32>,
    slot_buckets_2: Vec<u32>,
    pair_partners: Vec<u32>,
    bucket_counts: Vec<u32>,
    bucket_offsets: Vec<u32>,
    bucket_accumulators: Vec<Projective<P>>,
    bucket_empty_status: Vec<bool>,
    round_sums: Vec<Projective<P>>,
}

impl<P: SWCurveConfig> Default for RuntimeArena<P> {
    /// An arena that owns nothing.
    fn default() -> Self {
        Self {
            layout: ArenaLayout::default(),
            allocated_bytes: 0,
            point_schedule: Vec::new(),
            skew_table: Vec::new(),
            point_pairs_1: Vec::new(),
            point_pairs_2: Vec::new(),
            scratch_space: Vec::new(),
            slot_buckets_1: Vec::new(),
            slot_buckets_2: Vec::new(),
            pair_partners: Vec::new(),
            bucket_counts: Vec::new(),
            bucket_offsets: Vec::new(),
            bucket_accumulators: Vec::new(),
            bucket_empty_status: Vec::new(),
            round_sums: Vec::new(),
        }
    }
}

impl<P: SWCurveConfig> RuntimeArena<P> {
    #[tracing::instrument(skip_all, name = "RuntimeArena::new", fields(num_points = layout.num_points))]
    pub fn new(layout: ArenaLayout) -> Result<Self, MsmError> {
        // Sizes are checked before anything is allocated.
        let allocated_bytes = layout.byte_size::<P>()?;
        let bucket_table_len = layout.bucket_table_len()?;
        let points = layout.num_points;
        let bucket_slots = layout.num_buckets + 1;
        let arena = Self {
            layout,
            allocated_bytes,
            point_schedule: try_allocate(layout.schedule_len()?, ScheduleEntry::default())?,
            skew_table: try_allocate(points, false)?,
            point_pairs_1: try_allocate(points, Affine::<P>::identity())?,
            point_pairs_2: try_allocate(points, Affine::<P>::identity())?,
            scratch_space: try_allocate(points, P::BaseField::zero())?,
            slot_buckets_1: try_allocate(points, 0u32)?,
            slot_buckets_2: try_allocate(points, 0u32)?,
            pair_partners: try_allocate(points, 0u32)?,
            bucket_counts: try_allocate(bucket_table_len, 0u32)?,
            bucket_offsets: try_allocate(bucket_table_len, 0u32)?,
            bucket_accumulators: try_allocate(bucket_slots, Projective::<P>::zero())?,
            bucket_empty_status: try_allocate(bucket_slots, true)?,
            round_sums: try_allocate(layout.num_rounds, Projective::<P>::zero())?,
        };
        if arena.allocated_bytes > 0 {
            record_arena_allocation(arena.allocated_bytes);
        }
        tracing::debug!(bytes = arena.allocated_bytes, ?layout, "allocated runtime arena");
        Ok(arena)
    }

    pub fn layout(&self) -> ArenaLayout {
        self.layout
    }

    /// Number of points the arena can schedule.
    pub fn capacity(&self) -> usize {
        self.layout.num_points
    }

    pub fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }

    /// Makes sure the arena covers `required`, growing it if it does not.
    /// Returns whether it grew.
    ///
    /// The old buffers are released before the new ones are allocated, so
    /// peak memory is the larger arena rather than both. Capacity never
    /// shrinks. If the allocation fails the arena is left empty.
    pub fn reserve(&mut self, required: &ArenaLayout) -> Result<bool, MsmError> {
        if self.layout.covers(required) {
            return Ok(false);
        }
        let target = self.layout.union(&required.with_headroom());
        tracing::debug!(from = ?self.layout, to = ?target, "growing runtime arena");
        drop(std::mem::take(self));
        *self = RuntimeArena::new(target)?;
        Ok(true)
    }

    /// Carves the arena into one set of buffers per view plus the buffers
    /// shared by the merge and reduction phases.
    ///
    /// Views must be ordered by point offset and thread index, must not
    /// overlap, and must fit the layout.
    pub fn split_views(
        &mut self,
        views: &[AffineProductRuntimeState],
    ) -> Result<(Vec<ThreadBuffers<'_, P>>, SharedBuffers<'_, P>), MsmError> {
        validate_views(views, &self.layout)?;

        let point_ranges = || views.iter().map(|view| view.point_range());
        let bucket_ranges = || views.iter().map(|view| view.bucket_range());
        let mut schedules = carve(&mut self.point_schedule, views.iter().map(|v| v.schedule_range()));
        let mut skews = carve(&mut self.skew_table, point_ranges());
        let mut pairs_1 = carve(&mut self.point_pairs_1, point_ranges());
        let mut pairs_2 = carve(&mut self.point_pairs_2, point_ranges());
        let mut scratch = carve(&mut self.scratch_space, point_ranges());
        let mut slots_1 = carve(&mut self.slot_buckets_1, point_ranges());
        let mut slots_2 = carve(&mut self.slot_buckets_2, point_ranges());
        let mut partners = carve(&mut self.pair_partners, point_ranges());
        let mut counts = carve(&mut self.bucket_counts, bucket_ranges());
        let mut offsets = carve(&mut self.bucket_offsets, bucket_ranges());

        // `carve` yields exactly one slice per view.
        let buffers = views
            .iter()
            .map(|view| ThreadBuffers {
                view: *view,
                point_schedule: schedules.next().unwrap_or_default(),
                skew_table: skews.next().unwrap_or_default(),
                point_pairs_1: pairs_1.next().unwrap_or_default(),
                point_pairs_2: pairs_2.next().unwrap_or_default(),
                scratch_space: scratch.next().unwrap_or_default(),
                slot_buckets_1: slots_1.next().unwrap_or_default(),
                slot_buckets_2: slots_2.next().unwrap_or_default(),
                pair_partners: partners.next().unwrap_or_default(),
                bucket_counts: counts.next().unwrap_or_default(),
                bucket_offsets: offsets.next().unwrap_or_default(),
            })
            .collect();

        let bucket_slots = views.first().map_or(0, |view| view.num_buckets + 1);
        let num_rounds = views.first().map_or(0, |view| view.num_rounds);
        let shared = SharedBuffers {
            bucket_accumulators: &mut self.bucket_accumulators[..bucket_slots],
            bucket_empty_status: &mut self.bucket_empty_status[..bucket_slots],
            round_sums: &mut self.round_sums[..num_rounds],
        };
        Ok((buffers, shared))
    }
}

impl<P: SWCurveConfig> Drop for RuntimeArena<P> {
    fn drop(&mut self) {
        if self.allocated_bytes > 0 {
            record_arena_release(self.allocated_bytes);
        }
    }
}

/// One worker's share of an invocation: offsets and lengths into the arena,
/// never the memory itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AffineProductRuntimeState {
    pub thread_index: usize,
    pub point_offset: usize,
    pub num_points: usize,
    pub num_rounds: usize,
    pub num_buckets: usize,
}

impl AffineProductRuntimeState {
    pub fn point_range(&self) -> Range<usize> {
        self.point_offset..self.point_offset + self.num_points
    }

    /// The schedule is laid out thread-major, then round-major within a thread.
    pub fn schedule_range(&self) -> Range<usize> {
        let start = self.point_offset * self.num_rounds;
        start..start + self.num_points * self.num_rounds
    }

    pub fn bucket_range(&self) -> Range<usize> {
        let start = self.thread_index * (self.num_buckets + 1);
        start..start + self.num_buckets + 1
    }
}

fn validate_views(views: &[AffineProductRuntimeState], layout: &ArenaLayout) -> Result<(), MsmError> {
    let schedule_len = layout.schedule_len()?;
    let mut next_point = 0;
    let mut next_thread = 0;
    for (index, view) in views.iter().enumerate() {
        let points = view.point_range();
        let overlap = MsmError::OverlappingViews {
            index,
            offset: points.start,
            end: points.end,
            limit: layout.num_points,
        };
        let shape_matches = view.num_rounds == views[0].num_rounds
            && view.num_buckets == views[0].num_buckets;
        if points.start < next_point
            || points.end > layout.num_points
            || view.thread_index < next_thread
            || view.thread_index >= layout.num_threads
            || view.num_buckets > layout.num_buckets
            || view.num_rounds > layout.num_rounds
            || view.schedule_range().end > schedule_len
            || !shape_matches
        {
            return Err(overlap);
        }
        next_point = points.end;
        next_thread = view.thread_index + 1;
    }
    Ok(())
}

/// Splits `buffer` into the given ascending, non-overlapping ranges.
fn carve<'a, T>(
    buffer: &'a mut [T],
    ranges: impl Iterator<Item = Range<usize>>,
) -> std::vec::IntoIter<&'a mut [T]> {
    let mut rest = buffer;
    let mut consumed = 0;
    let mut slices = Vec::new();
    for range in ranges {
        let tail = std::mem::take(&mut rest);
        let (_, tail) = tail.split_at_mut(range.start - consumed);
        let (slice, tail) = tail.split_at_mut(range.len());
        slices.push(slice);
        rest = tail;
        consumed = range.end;
    }
    slices.into_iter()
}

/// Mutable buffers owned by one worker for the duration of one MSM.
pub struct ThreadBuffers<'a, P: SWCurveConfig> {
    pub view: AffineProductRuntimeState,
    pub point_schedule: &'a mut [ScheduleEntry],
    pub skew_table: &'a mut [bool],
    pub point_pairs_1: &'a mut [Affine<P>],
    pub point_pairs_2: &'a mut [Affine<P>],
    pub scratch_space: &'a mut [P::BaseField],
    pub slot_buckets_1: &'a mut [u32],
    pub slot_buckets_2: &'a mut [u32],
    pub pair_partners: &'a mut [u32],
    pub bucket_counts: &'a mut [u32],
    pub bucket_offsets: &'a mut [u32],
}

/// Buffers written only between parallel phases.
pub struct SharedBuffers<'a, P: SWCurveConfig> {
    pub bucket_accumulators: &'a mut [Projective<P>],
    pub bucket_empty_status: &'a mut [bool],
    pub round_sums: &'a mut [Projective<P>],
}
