//! Retry utilities: backoff builders for outbound joins.
//!
//! Uses `backon`. Joins retry on a fixed delay; the budget is one or two
//! attempts on a LAN.

use std::time::Duration;

use backon::ConstantBuilder;

/// Fixed-delay backoff for join attempts.
///
/// - Delay: `delay` between attempts
/// - Max retries: `retries` (total attempts = `retries + 1`)
/// - No jitter
pub fn join_backoff(delay: Duration, retries: u32) -> ConstantBuilder {
    ConstantBuilder::default()
        .with_delay(delay)
        .with_max_times(retries as usize)
}
