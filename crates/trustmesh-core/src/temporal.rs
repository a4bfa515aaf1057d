//! # Time: Timestamps and Injected Clocks
//!
//! Defines `Timestamp`, a UTC-only instant truncated to whole seconds, and
//! the [`Clock`] abstraction through which the escrow engine learns the
//! current time.
//!
//! ## Security Invariant
//!
//! Deadlines are compared against [`Clock::now`], never against a direct
//! wall-clock read. The engine receives its clock at construction, so tests
//! advance time with [`ManualClock`] instead of sleeping.
//!
//! Non-UTC string inputs are **rejected at construction**: there is no
//! silent conversion that could shift a deadline.

use std::sync::Arc;

use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A UTC instant with whole-second precision.
///
/// Escrow deadlines and transition times are `Timestamp`s. Every
/// constructor drops sub-second components, so two instants in the same
/// second compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Current wall-clock time. The engine never calls this directly; see
    /// [`SystemClock`].
    pub fn now() -> Self {
        Self(truncate_to_seconds(Utc::now()))
    }

    /// Wrap a chrono instant.
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(truncate_to_seconds(dt))
    }

    /// Parse a timestamp from an RFC 3339 string with a `Z` suffix.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTimestamp`] if the string is not
    /// RFC 3339 or uses any offset other than `Z` (including `+00:00`).
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        if !s.ends_with('Z') {
            return Err(ValidationError::InvalidTimestamp {
                value: s.to_string(),
                reason: "must use Z suffix (UTC only)".to_string(),
            });
        }
        match DateTime::parse_from_rfc3339(s) {
            Ok(dt) => Ok(Self(truncate_to_seconds(dt.with_timezone(&Utc)))),
            Err(e) => Err(ValidationError::InvalidTimestamp {
                value: s.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// From Unix seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTimestamp`] if the value is outside
    /// chrono's representable range.
    pub fn from_epoch_secs(secs: i64) -> Result<Self, ValidationError> {
        DateTime::from_timestamp(secs, 0)
            .map(Self)
            .ok_or_else(|| ValidationError::InvalidTimestamp {
                value: secs.to_string(),
                reason: "outside representable range".to_string(),
            })
    }

    /// The underlying chrono value.
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    /// Unix seconds.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// This instant shifted forward by `secs` seconds, or `None` if the
    /// result is not representable.
    pub fn checked_add_secs(&self, secs: u64) -> Option<Self> {
        let secs = i64::try_from(secs).ok()?;
        let delta = chrono::Duration::try_seconds(secs)?;
        self.0.checked_add_signed(delta).map(Self)
    }

    /// Whole seconds from `earlier` to `self`; negative if `earlier` is later.
    pub fn secs_since(&self, earlier: &Timestamp) -> i64 {
        self.epoch_secs() - earlier.epoch_secs()
    }

    /// `YYYY-MM-DDTHH:MM:SSZ`, e.g. an escrow due `2026-03-05T00:00:00Z`.
    pub fn to_iso8601(&self) -> String {
        self.0.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_iso8601())
    }
}

fn truncate_to_seconds(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.with_nanosecond(0).unwrap_or(dt)
}

// ---------------------------------------------------------------------------
// Clocks
// ---------------------------------------------------------------------------

/// Source of "now" for deadline checks.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// The current instant.
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall clock backed by [`Timestamp::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to.
///
/// Cloning shares the underlying instant, so a test can hand one clone to
/// the engine and keep another to advance time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Create a clock frozen at the given Unix time.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTimestamp`] if `secs` is out of range.
    pub fn at_epoch_secs(secs: i64) -> Result<Self, ValidationError> {
        Timestamp::from_epoch_secs(secs).map(Self::new)
    }

    /// Move the clock forward by `secs` seconds.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidTimestamp`] if the result would
    /// leave the representable range; the clock is unchanged in that case.
    pub fn advance_secs(&self, secs: u64) -> Result<Timestamp, ValidationError> {
        let mut now = self.now.lock();
        let Some(next) = now.checked_add_secs(secs) else {
            return Err(ValidationError::InvalidTimestamp {
                value: format!("{} + {secs}s", *now),
                reason: "outside representable range".to_string(),
            });
        };
        *now = next;
        Ok(next)
    }

    /// Set the clock to an absolute instant. Moving backwards is permitted;
    /// the engine makes no monotonicity assumption about its clock.
    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn now_has_no_subseconds() {
        assert_eq!(Timestamp::now().as_datetime().nanosecond(), 0);
    }

    #[test]
    fn from_utc_truncates() {
        let dt = Utc.with_ymd_and_hms(2026, 1, 15, 12, 30, 45).unwrap();
        let ts = Timestamp::from_utc(dt.with_nanosecond(123_456_789).unwrap());
        assert_eq!(ts.to_iso8601(), "2026-01-15T12:30:45Z");
    }

    #[test]
    fn parse_requires_z_suffix() {
        assert!(Timestamp::parse("2026-01-15T12:00:00Z").is_ok());
        assert!(Timestamp::parse("2026-01-15T12:00:00+00:00").is_err());
        assert!(Timestamp::parse("2026-01-15T17:00:00+05:00").is_err());
        assert!(Timestamp::parse("not-a-date").is_err());
        assert!(Timestamp::parse("").is_err());
    }

    #[test]
    fn epoch_roundtrip() {
        let ts = Timestamp::parse("2026-01-15T12:00:00Z").unwrap();
        assert_eq!(Timestamp::from_epoch_secs(ts.epoch_secs()).unwrap(), ts);
    }

    #[test]
    fn checked_add_secs_and_secs_since() {
        let ts = Timestamp::parse("2026-01-15T12:00:00Z").unwrap();
        let later = ts.checked_add_secs(3 * 24 * 3600).unwrap();
        assert_eq!(later.to_iso8601(), "2026-01-18T12:00:00Z");
        assert_eq!(later.secs_since(&ts), 259_200);
        assert_eq!(ts.secs_since(&later), -259_200);
        assert!(ts.checked_add_secs(u64::MAX).is_none());
    }

    #[test]
    fn manual_clock_advances_shared_state() {
        let clock = ManualClock::at_epoch_secs(1_700_000_000).unwrap();
        let handle = clock.clone();
        handle.advance_secs(60).unwrap();
        assert_eq!(clock.now().epoch_secs(), 1_700_000_060);
    }

    #[test]
    fn manual_clock_overflow_leaves_clock_unchanged() {
        let clock = ManualClock::at_epoch_secs(0).unwrap();
        assert!(clock.advance_secs(u64::MAX).is_err());
        assert_eq!(clock.now().epoch_secs(), 0);
    }

    #[test]
    fn manual_clock_set() {
        let clock = ManualClock::at_epoch_secs(100).unwrap();
        clock.set(Timestamp::from_epoch_secs(50).unwrap());
        assert_eq!(clock.now().epoch_secs(), 50);
    }

    #[test]
    fn arc_clock_delegates() {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_epoch_secs(7).unwrap());
        assert_eq!(clock.now().epoch_secs(), 7);
    }

    #[test]
    fn serde_roundtrip() {
        let ts = Timestamp::parse("2026-01-15T12:00:00Z").unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        let parsed: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(ts, parsed);
    }
}
