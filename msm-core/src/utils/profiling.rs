use memory_stats::memory_stats;

use crate::utils::counters::get_arena_counts;

pub fn print_memory_usage(label: &str) {
    if let Some(usage) = memory_stats() {
        tracing::info!(
            "<{}> current memory usage: {} GB",
            label,
            usage.physical_mem as f64 / 1_000_000_000.0
        );
    } else {
        tracing::info!("Couldn't get the current memory usage :(");
    }
}

pub fn print_arena_usage(label: &str) {
    let counts = get_arena_counts();
    tracing::info!(
        "<{}> arena memory: live {} MB, peak {} MB, {} allocations",
        label,
        counts.live_bytes as f64 / 1_000_000.0,
        counts.peak_bytes as f64 / 1_000_000.0,
        counts.allocations
    );
}
