//! Exponential backoff schedule for lock acquisition.

use std::time::Duration;

/// Sleep durations between lock acquisition attempts: `initial` doubled on
/// each retry, capped at `max`. `retries` sleeps means `retries + 1` reads
/// of the lock flag in total.
pub fn schedule(retries: u32, initial: Duration, max: Duration) -> Vec<Duration> {
    let mut delays = Vec::with_capacity(retries as usize);
    let mut delay = initial.min(max);
    for _ in 0..retries {
        delays.push(delay);
        delay = (delay * 2).min(max);
    }
    delays
}
