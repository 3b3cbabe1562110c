pub trait Math {
    fn pow2(self) -> usize;
    fn log_2(self) -> usize;
}

impl Math for usize {
    #[inline]
    fn pow2(self) -> usize {
        1 << self
    }

    /// `ceil(log2(self))`, so the number of pairwise levels that reduce
    /// `self` items to one.
    #[inline]
    fn log_2(self) -> usize {
        assert_ne!(self, 0);
        (usize::BITS - (self - 1).leading_zeros()) as usize
    }
}
