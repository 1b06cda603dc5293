use chrono::{Datelike, Local};
#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    error::{Error, Result},
    id::Suid,
    mutex::Mutex,
    time::{TIME_STEP_MS, TimeSource, WallClock, derive_period, landmark_millis},
};

/// Upper bound on how far the wall clock may lag behind the next period
/// before the wait in [`SuidGenerator::next_id`] is treated as a clock
/// rollback or stall.
pub const CLOCK_OUTLIER_THRESHOLD_MS: i64 = 2_000;

/// The mutable counters, guarded by a single mutex.
#[derive(Debug)]
struct State {
    period: i64,
    sequence: u64,
}

/// A thread-safe Sonyflake-style id generator.
///
/// Holds a fixed landmark and instance id for its whole lifetime, and
/// mutates its period/sequence counters only inside [`Self::next_id`],
/// under one mutex. Multiple generators are fully independent; giving two
/// of them the same instance id produces colliding ids, and guarding
/// against that is the caller's responsibility (for example by deriving
/// the instance id from the host's private IPv4 address, or any other
/// allocation scheme yielding a value in `0..=65535`).
///
/// # Example
/// ```
/// use suid::SuidGenerator;
///
/// let generator = SuidGenerator::new(2022, 42, 0)?;
///
/// let id = generator.next_id()?;
/// assert_eq!(id.instance_id(), 42);
/// # Ok::<(), suid::Error>(())
/// ```
#[derive(Debug)]
pub struct SuidGenerator<T = WallClock>
where
    T: TimeSource,
{
    landmark: i64,
    instance_id: u64,
    state: Mutex<State>,
    time: T,
}

impl SuidGenerator<WallClock> {
    /// Creates a generator driven by the system wall clock.
    ///
    /// # Parameters
    ///
    /// - `landmark_year`: the year periods are counted from (midnight,
    ///   January 1st, local time). Must not exceed the current year.
    /// - `instance_id`: a value in `0..=65535` identifying this process
    ///   among all concurrently running generators.
    /// - `last_timestamp`: Unix millis of the last instant the instance is
    ///   known to have run, to partially defend against clock rollback
    ///   across restarts. Pass `0` if unknown.
    ///
    /// # Errors
    ///
    /// - [`Error::FutureLandmark`] if `landmark_year` exceeds the current
    ///   year.
    /// - [`Error::LandmarkOutOfRange`] if `landmark_year` is not a
    ///   representable calendar year.
    /// - [`Error::InstanceIdOutOfRange`] if `instance_id` does not fit 16
    ///   bits.
    /// - [`Error::TimeLimit`] if `last_timestamp` already lies past the
    ///   39-bit period space.
    pub fn new(landmark_year: i32, instance_id: i64, last_timestamp: i64) -> Result<Self> {
        Self::with_time_source(landmark_year, instance_id, last_timestamp, WallClock)
    }
}

impl<T> SuidGenerator<T>
where
    T: TimeSource,
{
    /// Creates a generator driven by an explicit [`TimeSource`].
    ///
    /// Accepts the same parameters as [`SuidGenerator::new`] plus the
    /// clock to read; tests use this to script period transitions.
    pub fn with_time_source(
        landmark_year: i32,
        instance_id: i64,
        last_timestamp: i64,
        time: T,
    ) -> Result<Self> {
        let current_year = Local::now().year();
        if landmark_year > current_year {
            return Err(Error::FutureLandmark {
                landmark_year,
                current_year,
            });
        }
        let landmark =
            landmark_millis(landmark_year).ok_or(Error::LandmarkOutOfRange { landmark_year })?;
        if instance_id < 0 || instance_id > Suid::MAX_INSTANCE_ID as i64 {
            return Err(Error::InstanceIdOutOfRange { instance_id });
        }
        let period = derive_period(landmark, last_timestamp)?;

        Ok(Self {
            landmark,
            instance_id: instance_id as u64,
            state: Mutex::new(State {
                period,
                sequence: 0,
            }),
            time,
        })
    }

    /// The instance id every produced id carries.
    pub const fn instance_id(&self) -> u64 {
        self.instance_id
    }

    /// Generates the next id.
    ///
    /// The whole operation is serialized under the generator's mutex,
    /// including the busy-wait below: correctness outranks throughput
    /// during the rare sequence-exhaustion case.
    ///
    /// If 256 ids have already been minted in the current 10 ms step, the
    /// call claims the next period and spins until the wall clock reaches
    /// it. Spinning keeps the 10 ms timing tight; a sleep could overshoot
    /// the step or undershoot on imprecise timers.
    ///
    /// # Errors
    ///
    /// - [`Error::TimeLimit`] once the period space is exhausted. Fatal
    ///   for the generator's remaining lifetime under this landmark.
    /// - [`Error::ClockOutlier`] if, while waiting for sequence space to
    ///   renew, the wall clock is found more than
    ///   [`CLOCK_OUTLIER_THRESHOLD_MS`] behind the claimed period. This
    ///   aborts the wait instead of stalling forever after an operator or
    ///   hypervisor resets the clock backward.
    /// - [`Error::LockPoisoned`] if another thread panicked inside
    ///   `next_id` (std-mutex builds only).
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self)))]
    pub fn next_id(&self) -> Result<Suid> {
        let mut state = {
            #[cfg(feature = "parking-lot")]
            {
                self.state.lock()
            }
            #[cfg(not(feature = "parking-lot"))]
            {
                self.state.lock()?
            }
        };

        let current_period = derive_period(self.landmark, self.time.current_millis())?;
        if current_period > state.period {
            state.period = current_period;
            // Alternate the first sequence value of a period between 0 and
            // 1: under rapid clock polling, the first id of a new period
            // then never reuses the literal value the previous period
            // started with.
            state.sequence = if state.sequence % 2 != 0 { 0 } else { 1 };
        } else {
            state.sequence = (state.sequence + 1) & Suid::MAX_SEQUENCE;
            if state.sequence == 0 {
                // Sequence space for this step is spent. Claim the next
                // period (without re-reading the clock) and spin until the
                // wall clock reaches it.
                state.period += 1;
                let target = self.landmark + state.period * TIME_STEP_MS;
                loop {
                    let now = self.time.current_millis();
                    if now >= target {
                        break;
                    }
                    if target - now > CLOCK_OUTLIER_THRESHOLD_MS {
                        return Err(self.clock_outlier(target, now));
                    }
                    core::hint::spin_loop();
                }
            }
        }

        Ok(Suid::from_components(
            state.period as u64,
            self.instance_id,
            state.sequence,
        ))
    }

    #[cold]
    #[inline(never)]
    fn clock_outlier(&self, target_millis: i64, observed_millis: i64) -> Error {
        Error::ClockOutlier {
            instance_id: self.instance_id,
            target_millis,
            observed_millis,
            outlier_ms: target_millis - observed_millis,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::thread::scope;

    struct FixedTime {
        millis: i64,
    }

    impl TimeSource for FixedTime {
        fn current_millis(&self) -> i64 {
            self.millis
        }
    }

    /// Returns one scripted reading per sample, repeating the last entry
    /// once the script runs out.
    struct ScriptedTime {
        values: Vec<i64>,
        index: Cell<usize>,
    }

    impl ScriptedTime {
        fn new(values: Vec<i64>) -> Self {
            Self {
                values,
                index: Cell::new(0),
            }
        }
    }

    impl TimeSource for ScriptedTime {
        fn current_millis(&self) -> i64 {
            let index = self.index.get();
            self.index.set(index + 1);
            self.values[index.min(self.values.len() - 1)]
        }
    }

    fn landmark_2022() -> i64 {
        landmark_millis(2022).unwrap()
    }

    #[test]
    fn construction_rejects_a_future_landmark_year() {
        let next_year = Local::now().year() + 1;
        let err = SuidGenerator::new(next_year, 0, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::FutureLandmark { landmark_year, .. } if landmark_year == next_year
        ));
    }

    #[test]
    fn construction_rejects_out_of_range_instance_ids() {
        let err = SuidGenerator::new(2022, 65_536, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::InstanceIdOutOfRange { instance_id: 65_536 }
        ));

        let err = SuidGenerator::new(2022, -1, 0).unwrap_err();
        assert!(matches!(
            err,
            Error::InstanceIdOutOfRange { instance_id: -1 }
        ));
    }

    #[test]
    fn construction_accepts_the_id_range_bounds() {
        assert!(SuidGenerator::new(2022, 0, 0).is_ok());
        assert!(SuidGenerator::new(2022, Suid::MAX_INSTANCE_ID as i64, 0).is_ok());
    }

    #[test]
    fn construction_fails_once_the_period_space_is_spent() {
        let last_timestamp = landmark_2022() + (Suid::MAX_PERIOD as i64 + 1) * TIME_STEP_MS;
        let err = SuidGenerator::new(2022, 0, last_timestamp).unwrap_err();
        assert!(matches!(err, Error::TimeLimit { .. }));
    }

    #[test]
    fn next_id_fails_once_the_clock_passes_the_time_limit() {
        let over_the_limit = landmark_2022() + (Suid::MAX_PERIOD as i64 + 1) * TIME_STEP_MS;
        let clock = FixedTime {
            millis: over_the_limit,
        };
        let generator = SuidGenerator::with_time_source(2022, 0, 0, clock).unwrap();

        let err = generator.next_id().unwrap_err();
        assert!(matches!(err, Error::TimeLimit { .. }));
    }

    #[test]
    fn sequence_increments_within_a_period() {
        let clock = FixedTime {
            millis: landmark_2022() + 5,
        };
        let generator = SuidGenerator::with_time_source(2022, 42, 0, clock).unwrap();

        let a = generator.next_id().unwrap();
        let b = generator.next_id().unwrap();
        let c = generator.next_id().unwrap();

        assert_eq!(a.period(), 0);
        assert_eq!(b.period(), 0);
        assert_eq!(c.period(), 0);
        assert_eq!(a.sequence(), 1);
        assert_eq!(b.sequence(), 2);
        assert_eq!(c.sequence(), 3);
        assert_eq!(a.instance_id(), 42);
        assert!(a < b && b < c);
    }

    #[test]
    fn period_advance_resets_the_sequence_by_parity() {
        let lm = landmark_2022();
        let clock = ScriptedTime::new(vec![
            lm + 5,
            lm + 5,
            lm + 15,
            lm + 15,
            lm + 15,
            lm + 25,
            lm + 35,
        ]);
        let generator = SuidGenerator::with_time_source(2022, 1, 0, clock).unwrap();

        let decoded: Vec<(u64, u64)> = (0..7)
            .map(|_| {
                let id = generator.next_id().unwrap();
                (id.period(), id.sequence())
            })
            .collect();

        // A new period starts at 1 when the previous sequence was even,
        // and at 0 when it was odd.
        assert_eq!(
            decoded,
            vec![(0, 1), (0, 2), (1, 1), (1, 2), (1, 3), (2, 0), (3, 1)]
        );
    }

    #[test]
    fn sequence_exhaustion_claims_the_next_period() {
        let lm = landmark_2022();
        // 256 reads inside the first period, then three spin samples: two
        // short of the claimed period, one past it.
        let mut values = vec![lm + 5; 256];
        values.extend([lm + 6, lm + 8, lm + 12]);
        let generator =
            SuidGenerator::with_time_source(2022, 1, lm + 5, ScriptedTime::new(values)).unwrap();

        let mut seen = HashSet::new();
        let mut last = None;
        for _ in 0..255 {
            let id = generator.next_id().unwrap();
            assert_eq!(id.period(), 0);
            assert!(seen.insert((id.period(), id.sequence())));
            last = Some(id);
        }
        assert_eq!(last.unwrap().sequence(), Suid::MAX_SEQUENCE);

        // The 256th id of the period waits out the clock and lands in the
        // next period with the wrapped sequence.
        let id = generator.next_id().unwrap();
        assert_eq!(id.period(), 1);
        assert_eq!(id.sequence(), 0);
        assert!(seen.insert((id.period(), id.sequence())));
        assert!(id > last.unwrap());
    }

    #[test]
    fn a_rolled_back_clock_aborts_the_wait() {
        let lm = landmark_2022();
        // Restored state claims period 10_000, but the clock now reads 95
        // seconds earlier.
        let clock = FixedTime {
            millis: lm + 5_000,
        };
        let generator =
            SuidGenerator::with_time_source(2022, 7, lm + 100_000, clock).unwrap();

        for _ in 0..255 {
            generator.next_id().unwrap();
        }

        let err = generator.next_id().unwrap_err();
        match err {
            Error::ClockOutlier {
                instance_id,
                target_millis,
                observed_millis,
                outlier_ms,
            } => {
                assert_eq!(instance_id, 7);
                assert_eq!(target_millis, lm + 100_010);
                assert_eq!(observed_millis, lm + 5_000);
                assert_eq!(outlier_ms, 95_010);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ids_strictly_increase_under_the_wall_clock() {
        let generator = SuidGenerator::new(2022, 42, 0).unwrap();

        let ids: Vec<Suid> = (0..10).map(|_| generator.next_id().unwrap()).collect();

        for pair in ids.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].period() <= pair[1].period());
        }
        for id in &ids {
            assert_eq!(id.instance_id(), 42);
            assert!(id.sequence() <= Suid::MAX_SEQUENCE);
        }
    }

    #[test]
    fn periods_never_decrease_across_exhaustion() {
        let generator = SuidGenerator::new(2022, 1, 0).unwrap();

        let mut last_period = 0;
        for _ in 0..4096 {
            let id = generator.next_id().unwrap();
            assert!(id.period() >= last_period);
            last_period = id.period();
        }
    }

    #[test]
    fn distinct_instance_ids_never_collide() {
        let lm = landmark_2022();
        let a = SuidGenerator::with_time_source(2022, 1, lm + 5, FixedTime { millis: lm + 5 })
            .unwrap();
        let b = SuidGenerator::with_time_source(2022, 2, lm + 5, FixedTime { millis: lm + 5 })
            .unwrap();

        let id_a = a.next_id().unwrap();
        let id_b = b.next_id().unwrap();

        // Equal (period, sequence), yet the ids differ.
        assert_eq!(id_a.period(), id_b.period());
        assert_eq!(id_a.sequence(), id_b.sequence());
        assert_ne!(id_a, id_b);
        assert_eq!(id_a.instance_id(), 1);
        assert_eq!(id_b.instance_id(), 2);
    }

    #[test]
    fn threaded_generation_yields_unique_ids() {
        const THREADS: usize = 8;
        const IDS_PER_THREAD: usize = 1024;

        let generator = SuidGenerator::new(2022, 3, 0).unwrap();
        let seen_ids = Mutex::new(HashSet::with_capacity(THREADS * IDS_PER_THREAD));

        scope(|s| {
            for _ in 0..THREADS {
                s.spawn(|| {
                    for _ in 0..IDS_PER_THREAD {
                        let id = generator.next_id().unwrap();
                        assert!(seen_ids.lock().unwrap().insert(id.to_raw()));
                    }
                });
            }
        });

        let final_count = seen_ids.lock().unwrap().len();
        assert_eq!(final_count, THREADS * IDS_PER_THREAD);
    }
}
