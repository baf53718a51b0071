// ============================================================================
// SECTION 11: DOWNSAMPLER
// ============================================================================
// Display-density reduction for long chart spans. Pure index-stride
// decimation: no averaging, and the first reading of the run always survives.
// ============================================================================

/// `(span threshold in minutes, stride)`, checked in order; first match wins.
/// Thresholds are strict: a span must exceed the threshold.
pub const STRIDE_TIERS: [(u64, usize); 3] = [
    (60 * 24 * 7, 20), // beyond a week
    (60 * 24, 10),     // beyond a day
    (60 * 6, 5),       // beyond six hours
];

/// Stride applied to a duration query spanning `span_minutes`.
#[inline]
pub fn stride_for_span(span_minutes: u64) -> usize {
    STRIDE_TIERS
        .iter()
        .find(|(threshold, _)| span_minutes > *threshold)
        .map_or(1, |&(_, stride)| stride)
}

/// Keep `readings[0], readings[k], readings[2k], ...` for the stride `k` of
/// the span. Applied exactly once per query.
pub fn reduce<T>(readings: Vec<T>, span_minutes: u64) -> Vec<T> {
    let stride = stride_for_span(span_minutes);
    if stride == 1 {
        return readings;
    }
    readings.into_iter().step_by(stride).collect()
}
