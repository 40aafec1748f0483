//! fairq-state — embedded state store for the fairq controller.
//!
//! Backed by [redb](https://docs.rs/redb), holds the job table, the
//! account/user association records (including their decayed usage, so a
//! restart keeps accumulated history), partition definitions, and the QOS
//! table.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Numeric ids are zero-padded into `&str` keys so iteration order matches
//! id order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks; redb transactions stand in for a
//! dedicated job-table lock.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use store::StateStore;
pub use types::*;
