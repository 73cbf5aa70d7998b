//! Deterministic `Clock` implementation for tests.

use chrono::{DateTime, TimeZone, Utc};
use unitwork_core::clock::Clock;

/// A clock that always returns a fixed point in time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// The clock every test in the workspace uses: 2026-01-15T10:00:00Z.
///
/// # Panics
///
/// Never; the timestamp is a valid constant.
#[must_use]
pub fn fixed_clock() -> FixedClock {
    FixedClock(
        Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0)
            .single()
            .expect("constant timestamp is valid"),
    )
}
