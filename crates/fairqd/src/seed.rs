//! Cluster seed file: bootstrap associations, partitions, and QOS.
//!
//! ```toml
//! [[association]]
//! id = 2
//! account = "physics"
//! shares = 3
//!
//! [[association]]
//! id = 3
//! account = "physics"
//! user = "ada"
//! parent = 2
//! shares = 1
//!
//! [[partition]]
//! name = "batch"
//! priority = 10
//!
//! [[qos]]
//! id = 1
//! name = "normal"
//! priority = 20
//! usage_factor = 1.0
//! ```
//!
//! Existing association records keep their accumulated usage; seeding
//! only fills in what is missing.

use std::path::Path;

use serde::Deserialize;

use fairq_state::{AssocRecord, PartitionRecord, QosRecord, StateStore};

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default, rename = "association")]
    associations: Vec<AssocSeed>,
    #[serde(default, rename = "partition")]
    partitions: Vec<PartitionSeed>,
    #[serde(default, rename = "qos")]
    qos: Vec<QosSeed>,
}

#[derive(Debug, Deserialize)]
struct AssocSeed {
    id: u32,
    account: String,
    user: Option<String>,
    #[serde(default)]
    parent: u32,
    #[serde(default = "default_shares")]
    shares: u32,
}

fn default_shares() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct PartitionSeed {
    name: String,
    #[serde(default)]
    priority: u32,
}

#[derive(Debug, Deserialize)]
struct QosSeed {
    id: u32,
    name: String,
    #[serde(default)]
    priority: u32,
    #[serde(default = "default_usage_factor")]
    usage_factor: f64,
}

fn default_usage_factor() -> f64 {
    1.0
}

/// Counts of records written by [`load_seed`].
pub struct SeedSummary {
    pub associations: usize,
    pub partitions: usize,
    pub qos: usize,
}

/// Parse a seed file and upsert its records into the store.
pub fn load_seed(store: &StateStore, path: &Path) -> anyhow::Result<SeedSummary> {
    let content = std::fs::read_to_string(path)?;
    let seed: SeedFile = toml::from_str(&content)?;

    let mut summary = SeedSummary {
        associations: 0,
        partitions: 0,
        qos: 0,
    };

    for a in &seed.associations {
        // Never clobber accumulated usage on an existing association.
        if store.get_assoc(a.id)?.is_none() {
            store.put_assoc(&AssocRecord {
                id: a.id,
                account: a.account.clone(),
                user: a.user.clone(),
                parent_id: a.parent,
                shares_raw: a.shares,
                usage_raw: 0.0,
                grp_used_wall: 0.0,
            })?;
            summary.associations += 1;
        }
    }

    for p in &seed.partitions {
        store.put_partition(&PartitionRecord {
            name: p.name.clone(),
            priority: p.priority,
            norm_priority: 0.0,
        })?;
        summary.partitions += 1;
    }

    for q in &seed.qos {
        let existing = store.get_qos(q.id)?;
        let (usage_raw, grp_used_wall) = existing
            .map(|e| (e.usage_raw, e.grp_used_wall))
            .unwrap_or((0.0, 0.0));
        store.put_qos(&QosRecord {
            id: q.id,
            name: q.name.clone(),
            priority: q.priority,
            norm_priority: 0.0,
            usage_factor: q.usage_factor,
            usage_raw,
            grp_used_wall,
        })?;
        summary.qos += 1;
    }

    Ok(summary)
}
