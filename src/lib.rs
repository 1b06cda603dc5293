//! # suid
//!
//! Sonyflake-style 63-bit unique IDs: a monotonically increasing time
//! period, a fixed instance identifier, and an intra-period sequence
//! counter packed into a single non-negative `u64`.
//!
//! ```text
//!  Bit Index:  63 62          24 23              8 7            0
//!              +--+-------------+-----------------+-------------+
//!  Field:      |0 | period (39) | instance id (16)| sequence (8)|
//!              +--+-------------+-----------------+-------------+
//!              |<----- MSB ------ 64 bits ------ LSB ---------->|
//! ```
//!
//! The period counts 10 ms steps since a landmark instant (midnight,
//! January 1st of a configured year, local time), which keeps ids roughly
//! sortable by creation time for about 174 years. Each instance id yields
//! an independent id space, so concurrently running generators never
//! collide as long as their instance ids differ.
//!
//! ```
//! use suid::SuidGenerator;
//!
//! let generator = SuidGenerator::new(2022, 42, 0)?;
//! let id = generator.next_id()?;
//!
//! assert_eq!(id.instance_id(), 42);
//! # Ok::<(), suid::Error>(())
//! ```

mod error;
mod generator;
mod id;
mod mutex;
mod time;

pub use crate::error::*;
pub use crate::generator::*;
pub use crate::id::*;
pub use crate::time::*;
