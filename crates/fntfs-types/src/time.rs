//! NT timestamps: 100-nanosecond intervals since 1601-01-01 UTC.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Seconds between 1601-01-01 and 1970-01-01.
const EPOCH_DIFFERENCE_SECS: u64 = 11_644_473_600;
const TICKS_PER_SEC: u64 = 10_000_000;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NtTime(pub u64);

impl NtTime {
    /// Current wall-clock time. Falls back to the Unix epoch if the clock is
    /// set before 1970.
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        let since_unix = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
        let ticks = (since_unix.as_secs() + EPOCH_DIFFERENCE_SECS)
            .saturating_mul(TICKS_PER_SEC)
            .saturating_add(u64::from(since_unix.subsec_nanos() / 100));
        Self(ticks)
    }

    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        let secs = self.0 / TICKS_PER_SEC;
        let nanos = (self.0 % TICKS_PER_SEC) * 100;
        let unix_secs = secs.saturating_sub(EPOCH_DIFFERENCE_SECS);
        UNIX_EPOCH + Duration::new(unix_secs, nanos as u32)
    }
}
