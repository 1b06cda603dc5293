use core::fmt;

use chrono::{DateTime, Local, Utc};

use crate::time::{TIME_STEP_MS, landmark_millis};

/// A packed 63-bit unique identifier.
///
/// ```text
///  Bit Index:  63 62          24 23              8 7            0
///              +--+-------------+-----------------+-------------+
///  Field:      |0 | period (39) | instance id (16)| sequence (8)|
///              +--+-------------+-----------------+-------------+
///              |<----- MSB ------ 64 bits ------ LSB ---------->|
/// ```
///
/// The sign bit is always zero, so every id is non-negative when viewed as
/// an `i64`. Decoding does not validate provenance: any `u64` decodes to
/// whatever bit pattern results.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[repr(transparent)]
pub struct Suid {
    id: u64,
}

impl Suid {
    /// The sign bit is reserved and always zero.
    pub const SIGN_BITS: u32 = 1;

    /// Declared field maxima. Every width, shift, and mask below is
    /// derived from these two values; changing a maximum re-derives the
    /// whole layout.
    pub const MAX_INSTANCE_ID: u64 = u16::MAX as u64;
    pub const MAX_SEQUENCE: u64 = u8::MAX as u64;

    pub const INSTANCE_ID_BITS: u32 = u64::BITS - Self::MAX_INSTANCE_ID.leading_zeros();
    pub const SEQUENCE_BITS: u32 = u64::BITS - Self::MAX_SEQUENCE.leading_zeros();
    pub const PERIOD_BITS: u32 =
        u64::BITS - Self::SIGN_BITS - Self::INSTANCE_ID_BITS - Self::SEQUENCE_BITS;

    pub const MAX_PERIOD: u64 = (1 << Self::PERIOD_BITS) - 1;

    pub const INSTANCE_ID_SHIFT: u32 = Self::SEQUENCE_BITS;
    pub const PERIOD_SHIFT: u32 = Self::INSTANCE_ID_BITS + Self::SEQUENCE_BITS;

    /// Packs the three components into an id.
    pub(crate) const fn from_components(period: u64, instance_id: u64, sequence: u64) -> Self {
        debug_assert!(period <= Self::MAX_PERIOD, "period overflow");
        debug_assert!(instance_id <= Self::MAX_INSTANCE_ID, "instance id overflow");
        debug_assert!(sequence <= Self::MAX_SEQUENCE, "sequence overflow");

        let p = (period & Self::MAX_PERIOD) << Self::PERIOD_SHIFT;
        let i = (instance_id & Self::MAX_INSTANCE_ID) << Self::INSTANCE_ID_SHIFT;
        Self {
            id: p | i | (sequence & Self::MAX_SEQUENCE),
        }
    }

    /// Extracts the period: the count of 10 ms steps since the landmark.
    pub const fn period(&self) -> u64 {
        (self.id >> Self::PERIOD_SHIFT) & Self::MAX_PERIOD
    }

    /// Extracts the instance id of the generating process.
    pub const fn instance_id(&self) -> u64 {
        (self.id >> Self::INSTANCE_ID_SHIFT) & Self::MAX_INSTANCE_ID
    }

    /// Extracts the intra-period sequence counter.
    pub const fn sequence(&self) -> u64 {
        self.id & Self::MAX_SEQUENCE
    }

    /// Resolves the instant this id's period began, given the landmark
    /// year the generator was constructed with.
    ///
    /// Returns `None` if the landmark year is not representable.
    pub fn instant(&self, landmark_year: i32) -> Option<DateTime<Utc>> {
        let landmark = landmark_millis(landmark_year)?;
        DateTime::from_timestamp_millis(landmark + self.period() as i64 * TIME_STEP_MS)
    }

    /// Like [`Suid::instant`], rendered in the local timezone.
    pub fn local_date_time(&self, landmark_year: i32) -> Option<DateTime<Local>> {
        self.instant(landmark_year)
            .map(|instant| instant.with_timezone(&Local))
    }

    /// Converts this id into its raw `u64` representation.
    pub const fn to_raw(&self) -> u64 {
        self.id
    }

    /// Converts a raw `u64` into an id.
    pub const fn from_raw(raw: u64) -> Self {
        Self { id: raw }
    }
}

const _: () = {
    // The fields plus the sign bit must cover the backing integer exactly.
    assert!(
        Suid::SIGN_BITS + Suid::PERIOD_BITS + Suid::INSTANCE_ID_BITS + Suid::SEQUENCE_BITS
            == u64::BITS,
        "Suid layout does not cover the underlying integer type"
    );
};

impl From<Suid> for u64 {
    fn from(id: Suid) -> u64 {
        id.to_raw()
    }
}

impl From<u64> for Suid {
    fn from(raw: u64) -> Suid {
        Suid::from_raw(raw)
    }
}

impl fmt::Display for Suid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl fmt::Debug for Suid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suid")
            .field("id", &format_args!("{} (0x{:x})", self.id, self.id))
            .field("period", &self.period())
            .field("instance_id", &self.instance_id())
            .field("sequence", &self.sequence())
            .finish()
    }
}
