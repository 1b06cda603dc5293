use chrono::DateTime;

use crate::id::Suid;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All possible errors that `suid` can produce.
///
/// Every variant is fatal from the generator's perspective: there is no
/// internal retry. Each carries the offending values, not just a message,
/// so callers can log structured diagnostics before giving up or
/// reconstructing the generator with corrected parameters.
#[derive(Clone, thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The landmark year lies in the future. Periods would count from an
    /// instant that has not happened yet, producing negative elapsed time.
    #[error("landmark year {landmark_year} is later than the current year {current_year}")]
    FutureLandmark {
        landmark_year: i32,
        current_year: i32,
    },

    /// The landmark year cannot be expressed as a calendar date.
    #[error("landmark year {landmark_year} is outside the supported calendar range")]
    LandmarkOutOfRange { landmark_year: i32 },

    /// The instance id does not fit the 16-bit field.
    #[error("instance id {instance_id} is not in the valid range (0..={})", Suid::MAX_INSTANCE_ID)]
    InstanceIdOutOfRange { instance_id: i64 },

    /// The 39-bit period space is exhausted under the current landmark.
    /// The generator cannot mint further ids until it is redeployed with a
    /// newer landmark year.
    #[error("over the time limit, the last representable instant is {}", fmt_instant(*last_millis))]
    TimeLimit {
        /// Unix millis of the last instant the period field can represent.
        last_millis: i64,
    },

    /// While waiting for sequence space to renew, the wall clock was found
    /// implausibly far behind the next period, indicating a clock rollback
    /// or stall.
    #[error(
        "clock outlier: instance id {instance_id}, next elapsed time {target_millis} [{}], \
         current time {observed_millis} [{}], divergence {outlier_ms}ms",
        fmt_instant(*target_millis),
        fmt_instant(*observed_millis)
    )]
    ClockOutlier {
        instance_id: u64,
        /// Unix millis of the start of the period being waited for.
        target_millis: i64,
        /// Unix millis observed when the wait was abandoned.
        observed_millis: i64,
        /// How far the clock lags the target, in milliseconds.
        outlier_ms: i64,
    },

    /// Another thread panicked while holding the generator lock.
    #[error("generator lock poisoned by a panicked thread")]
    LockPoisoned,
}

fn fmt_instant(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| format!("{millis}ms"))
}

use std::sync::{MutexGuard, PoisonError};
// Convert all poisoned lock errors to a simplified `LockPoisoned`
impl<T> From<PoisonError<MutexGuard<'_, T>>> for Error {
    fn from(_: PoisonError<MutexGuard<'_, T>>) -> Self {
        Self::LockPoisoned
    }
}
