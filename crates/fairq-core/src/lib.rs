//! fairq-core — shared foundation for the fairq priority controller.
//!
//! Holds the typed configuration model (`FairqConfig`), duration-string
//! parsing, and the handful of constants the rest of the workspace agrees
//! on (nice offset, held-priority values, share sentinel).

pub mod config;
pub mod duration;

pub use config::{AccountingStorage, BackendKind, ConfigError, FairqConfig};
pub use duration::parse_duration_secs;

/// Bias applied to job nice values: `nice == NICE_OFFSET` means no
/// adjustment, lower is a boost, higher is a penalty.
pub const NICE_OFFSET: u32 = 10_000;

/// Job priority value meaning "held by the user".
pub const PRIO_HELD_USER: u32 = 0;

/// Job priority value meaning "held by the system".
pub const PRIO_HELD_SYSTEM: u32 = 1;

/// Sentinel share allotment: the association inherits its parent's
/// share computation instead of counting toward `level_shares`.
pub const SHARES_USE_PARENT: u32 = u32::MAX;
