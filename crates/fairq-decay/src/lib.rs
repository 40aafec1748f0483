//! fairq-decay — the background loop that keeps priorities honest.
//!
//! Every `calc_period` the loop, in strict order: picks up a pending
//! reconfig, applies a scheduled usage reset, decays all accounted usage
//! by `decay_factor^elapsed`, charges every running job's usage up its
//! association chain, reprices every live pending job, rebuilds the
//! effective-usage tree, and persists the decay clock plus the usage
//! snapshot.
//!
//! Repricing deliberately observes post-accumulation, pre-refresh state:
//! pending jobs are priced against the usage their predecessors just
//! charged, and the tree is rebuilt for the next cycle afterwards.
//!
//! A decay failure is fatal to the loop — existing priorities stay and
//! new submissions still get one-shot values, but usage stops decaying.
//! Persistence failures only cost the tick's durability.

pub mod ticker;

pub use ticker::{DecayLoop, DecayState, per_second_decay};
