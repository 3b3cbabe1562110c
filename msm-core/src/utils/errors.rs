use core::fmt::Debug;
use thiserror::Error;

use crate::msm::bucket_width::MAX_BUCKET_WIDTH;
use crate::msm::wnaf::MAX_NUM_POINTS;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MsmError {
    #[error("Invalid input size: {scalars} scalars, {points} points")]
    InvalidInputSize { scalars: usize, points: usize },
    #[error("Input too large: {0} points, at most {max} supported", max = MAX_NUM_POINTS)]
    InputTooLarge(usize),
    #[error("Invalid bucket width {0}, expected 1..={max}", max = MAX_BUCKET_WIDTH)]
    InvalidBucketWidth(usize),
    #[error("Invalid scalar bit length {bits}, expected 1..={max_bits}")]
    InvalidScalarBits { bits: usize, max_bits: usize },
    #[error("Scalar has {bits} bits but the schedule covers {max_bits}")]
    ScalarOutOfRange { bits: usize, max_bits: usize },
    #[error("Arena allocation of {requested} bytes failed")]
    CapacityExceeded { requested: usize },
    #[error("Thread view {index} ({offset}..{end}) overlaps a previous view or exceeds {limit}")]
    OverlappingViews {
        index: usize,
        offset: usize,
        end: usize,
        limit: usize,
    },
}

impl MsmError {
    /// Checks operand lengths before anything is allocated.
    pub fn check_input_size(scalars: usize, points: usize) -> Result<(), MsmError> {
        if scalars != points || scalars == 0 {
            return Err(MsmError::InvalidInputSize { scalars, points });
        }
        if scalars > MAX_NUM_POINTS {
            return Err(MsmError::InputTooLarge(scalars));
        }
        Ok(())
    }
}
