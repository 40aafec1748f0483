//! fairq-persist — durable record of the last decay tick.
//!
//! The decay loop must know how much real time elapsed while the
//! controller was down so a restart can catch up with a single
//! `decay_factor^elapsed` multiplication instead of losing history. This
//! crate owns that one scalar: an epoch-seconds timestamp written after
//! every tick.
//!
//! The file is rewritten via an atomic swap (`.new` sibling, fsync, then
//! rename over the target, with the previous generation promoted to
//! `.old`), so a crash mid-write leaves either the old file intact or a
//! discardable `.new`.

pub mod clock;
pub mod error;

pub use clock::{DECAY_CLOCK_FILE, DecayClock};
pub use error::{PersistError, PersistResult};
