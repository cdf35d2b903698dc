//! Time utilities for roamlink
//!
//! Codecs are driven with millisecond timestamps. These come from a
//! monotonic clock anchored at first use, so wall-clock jumps after sleep or
//! NTP corrections never make time run backwards for a codec. Wall-clock
//! time is only used for display, e.g. session creation times.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;

static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Milliseconds on the process-local monotonic clock.
pub fn monotonic_millis() -> u64 {
    EPOCH.elapsed().as_millis() as u64
}

/// Current Unix timestamp in seconds.
///
/// A clock set before 1970 reads as 0.
pub fn current_time_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_monotonic_never_decreases() {
        let a = monotonic_millis();
        std::thread::sleep(Duration::from_millis(5));
        let b = monotonic_millis();
        assert!(b >= a + 5);
    }

    #[test]
    fn test_current_time_secs() {
        // 2020-01-01
        assert!(current_time_secs() > 1_577_836_800);
    }
}
