//! fairq-assoc — the in-memory account/user share hierarchy.
//!
//! The controller mirrors the persisted association records into an
//! arena-backed tree. Each node carries its raw share allotment, the
//! decayed usage charged to it, and two derived values the priority
//! engine consumes:
//!
//! - `shares_norm` — the product of `shares_raw / level_shares` along the
//!   path from the root, i.e. the fraction of the cluster this node is
//!   entitled to.
//! - `usage_efctv` — the node's normalized usage blended with its
//!   parent's effective usage in proportion to its level share, i.e. how
//!   much of the cluster this node (and the accounts above it) has
//!   actually consumed.
//!
//! The QOS list lives here too: QOS usage decays and accumulates under
//! the same lock as the tree.
//!
//! # Concurrency
//!
//! `AssocStore` is plain data; callers share it as
//! `Arc<tokio::sync::RwLock<AssocStore>>`. The decay loop takes the write
//! lock for decay, accumulation, and refresh; priority computation takes
//! it only long enough to read (and demand-compute) one leaf's effective
//! usage.

pub mod error;
pub mod tree;

pub use error::{AssocError, AssocResult};
pub use tree::{AssocNode, AssocStore};
