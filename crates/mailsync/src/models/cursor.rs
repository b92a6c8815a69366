//! Sync cursor: the watermark of already-synced time

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp of the last fully successful sync
///
/// Only one cursor exists per store. It starts at the Unix epoch and never
/// moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cursor {
    pub last_run: DateTime<Utc>,
}

impl Cursor {
    pub fn new(last_run: DateTime<Utc>) -> Self {
        Self { last_run }
    }

    /// Cursor for a store that has never completed a run
    pub fn epoch() -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Whether no run has ever been committed
    pub fn is_initial(&self) -> bool {
        self.last_run == DateTime::<Utc>::UNIX_EPOCH
    }

    /// Earliest receipt time still inside the sync window
    ///
    /// `tolerance` widens the window backwards to absorb clock skew between
    /// this host and the mailbox provider.
    pub fn window_start(&self, tolerance: Duration) -> DateTime<Utc> {
        self.last_run
            .checked_sub_signed(tolerance)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Whether a message received at `received_at` falls inside the window
    pub fn admits(&self, received_at: DateTime<Utc>, tolerance: Duration) -> bool {
        received_at >= self.window_start(tolerance)
    }

    /// Cursor after a successful run that finished at `now`
    ///
    /// Never moves backwards, even if the local clock did.
    pub fn advanced(self, now: DateTime<Utc>) -> Self {
        Self::new(self.last_run.max(now))
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::epoch()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_epoch_cursor() {
        let cursor = Cursor::epoch();
        assert!(cursor.is_initial());
        assert!(cursor.admits(at(1999, 1, 1, 0), Duration::zero()));
    }

    #[test]
    fn test_window_excludes_older_messages() {
        let cursor = Cursor::new(at(2025, 1, 10, 0));
        assert!(!cursor.admits(at(2025, 1, 9, 12), Duration::minutes(5)));
        assert!(cursor.admits(at(2025, 1, 11, 0), Duration::minutes(5)));
    }

    #[test]
    fn test_tolerance_widens_window() {
        let cursor = Cursor::new(at(2025, 1, 10, 12));
        let skewed = at(2025, 1, 10, 12) - Duration::minutes(3);
        assert!(!cursor.admits(skewed, Duration::zero()));
        assert!(cursor.admits(skewed, Duration::minutes(5)));
    }

    #[test]
    fn test_advanced_is_monotonic() {
        let cursor = Cursor::new(at(2025, 1, 10, 0));
        assert_eq!(cursor.advanced(at(2025, 1, 11, 0)).last_run, at(2025, 1, 11, 0));
        assert_eq!(cursor.advanced(at(2025, 1, 9, 0)).last_run, at(2025, 1, 10, 0));
    }

    #[test]
    fn test_huge_tolerance_does_not_overflow() {
        let cursor = Cursor::epoch();
        let start = cursor.window_start(Duration::MAX);
        assert_eq!(start, DateTime::<Utc>::MIN_UTC);
    }
}
