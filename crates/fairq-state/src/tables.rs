//! redb table definitions for the fairq state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Numeric ids are zero-padded to ten digits so lexicographic key
//! order matches numeric order.

use redb::TableDefinition;

/// Job records keyed by zero-padded `job_id`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Association records keyed by zero-padded association id.
pub const ASSOCS: TableDefinition<&str, &[u8]> = TableDefinition::new("associations");

/// Partition records keyed by partition name.
pub const PARTITIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("partitions");

/// QOS records keyed by zero-padded QOS id.
pub const QOS: TableDefinition<&str, &[u8]> = TableDefinition::new("qos");
