//! fairq-engine — job priority computation.
//!
//! A pure function from (current time, job record, share tree,
//! partition/QOS records, tuning) to an unsigned 32-bit priority, plus
//! the per-factor breakdown the reporting CLI displays.
//!
//! Five normalized factors, each in [0, 1], are combined as a weighted
//! sum and offset by the job's nice value:
//!
//! ```text
//! priority = age*W_age + fairshare*W_fs + job_size*W_js
//!          + partition*W_part + qos*W_qos - (nice - NICE_OFFSET)
//! ```
//!
//! The result is clamped to at least 1. Values 0 and 1 otherwise carry
//! hold semantics: 0 marks a user hold, 1 a system hold (including jobs
//! whose begin time is still in the future).

pub mod engine;
pub mod factors;

pub use engine::{EngineConfig, PriorityEngine};
pub use factors::{FactorWeights, FactorsReport, JobFactorsEntry, PriorityFactors};
