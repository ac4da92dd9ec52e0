//! Deterministic time provider.
//!
//! All timestamps in the run flow through this module. The clock is either
//! real (wall time) or pinned to a fixed instant via `VERAX_TEST_TIME`, and
//! is frozen at run start; nothing re-reads the environment afterwards.

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::cell::RefCell;

static PROCESS_CLOCK: OnceCell<Clock> = OnceCell::new();

// Thread-local override used only in tests to avoid process-global env races.
thread_local! {
    static THREAD_CLOCK: RefCell<Option<Clock>> = const { RefCell::new(None) };
}

/// Process-wide clock, pinned or real.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pinned: Option<DateTime<Utc>>,
}

impl Clock {
    /// Build a clock from `VERAX_TEST_TIME` (RFC 3339) if set, real otherwise.
    pub fn from_env() -> Result<Self, String> {
        match std::env::var("VERAX_TEST_TIME") {
            Ok(raw) => {
                let pinned = DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| format!("VERAX_TEST_TIME is not RFC 3339: {e}"))?
                    .with_timezone(&Utc);
                Ok(Self {
                    pinned: Some(pinned),
                })
            }
            Err(_) => Ok(Self { pinned: None }),
        }
    }

    #[must_use]
    pub const fn pinned_at(at: DateTime<Utc>) -> Self {
        Self { pinned: Some(at) }
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.pinned.unwrap_or_else(Utc::now)
    }

    #[must_use]
    pub const fn is_pinned(&self) -> bool {
        self.pinned.is_some()
    }
}

/// Initialize the process clock from the environment. Idempotent; the first
/// initialization wins and later calls return the frozen instance.
pub fn init() -> Result<&'static Clock, String> {
    if let Some(clock) = PROCESS_CLOCK.get() {
        return Ok(clock);
    }
    let clock = Clock::from_env()?;
    let _ = PROCESS_CLOCK.set(clock);
    Ok(PROCESS_CLOCK.get().expect("clock initialized"))
}

/// Current time from the frozen clock.
///
/// Resolution order: thread-local test override, then the process clock,
/// then (if `init` was never called) a direct environment read.
#[must_use]
pub fn now() -> DateTime<Utc> {
    if let Some(clock) = THREAD_CLOCK.with(|tl| *tl.borrow()) {
        return clock.now();
    }
    if let Some(clock) = PROCESS_CLOCK.get() {
        return clock.now();
    }
    Clock::from_env().unwrap_or(Clock { pinned: None }).now()
}

/// Test seam: pin the clock for the current thread only.
#[cfg(test)]
pub fn with_thread_pin(at: DateTime<Utc>) -> ThreadPinGuard {
    THREAD_CLOCK.with(|tl| *tl.borrow_mut() = Some(Clock::pinned_at(at)));
    ThreadPinGuard
}

/// Clears the thread-local pin on drop.
#[cfg(test)]
pub struct ThreadPinGuard;

#[cfg(test)]
impl Drop for ThreadPinGuard {
    fn drop(&mut self) {
        THREAD_CLOCK.with(|tl| *tl.borrow_mut() = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pinned_clock_returns_fixed_instant() {
        let at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let clock = Clock::pinned_at(at);
        assert!(clock.is_pinned());
        assert_eq!(clock.now(), at);
        assert_eq!(clock.now(), at);
    }

    #[test]
    fn real_clock_advances_monotonically_enough() {
        let clock = Clock { pinned: None };
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn thread_pin_overrides_now() {
        let at = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        let _guard = with_thread_pin(at);
        assert_eq!(now(), at);
    }
}
