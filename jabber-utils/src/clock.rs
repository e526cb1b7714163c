//! Monotonic timestamp source
//!
//! Inbox timestamps are monotonic seconds since a process-wide anchor, so
//! ordering survives wall-clock adjustments. Wall-clock rendering for humans
//! is a separate field on the inbox record.

use std::sync::LazyLock;
use std::time::Instant;

static ANCHOR: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Seconds elapsed since the process-wide anchor.
///
/// The first call fixes the anchor; all later calls are relative to it.
pub fn monotonic_ts() -> f64 {
    ANCHOR.elapsed().as_secs_f64()
}
