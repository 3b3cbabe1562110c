pub mod counters;
pub mod errors;
pub mod math;
#[cfg(not(target_arch = "wasm32"))]
pub mod profiling;
