//! fairq-facade — the stable operation surface over the priority backends.
//!
//! Callers (the submission path, the reconfig path, the factors RPC)
//! talk to a single `PriorityPlugin`, which dispatches to one of the
//! compiled-in backends selected by `priority.type`:
//!
//! - `multifactor` — the five-factor engine plus the decay loop;
//! - `decrement` — each submission gets the previous priority minus one,
//!   adjusted by nice, with no accounting at all;
//! - `basic` — a one-shot multifactor assignment with no decay loop.
//!
//! The operations are `set`, `reconfig`, `set_max_cluster_usage`,
//! `set_assoc_usage`, and `get_priority_factors_list`. `set` never
//! surfaces internal errors: it returns the best priority it can
//! compute, falling back to the hold values.

pub mod error;
pub mod plugin;

pub use error::{FacadeError, FacadeResult};
pub use plugin::{PluginContext, PriorityPlugin};
