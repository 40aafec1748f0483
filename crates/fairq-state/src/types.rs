//! Domain types for the fairq state store.
//!
//! These types represent the persisted state of jobs, associations,
//! partitions, and QOS classes. All types are serializable to/from JSON
//! for storage in redb tables.

use serde::{Deserialize, Serialize};

use fairq_core::{PRIO_HELD_SYSTEM, PRIO_HELD_USER};

/// Unique identifier for a job.
pub type JobId = u32;

/// Unique identifier for an association (account or user node).
pub type AssocId = u32;

/// Unique identifier for a QOS class.
pub type QosId = u32;

// ── Jobs ──────────────────────────────────────────────────────────

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Suspended,
    Complete,
    Cancelled,
    Failed,
}

/// Submission-time details. Absent details mean the job cannot be priced
/// and is treated as system-held.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JobDetails {
    /// Earliest time the job may start (unix seconds). 0 means unset.
    pub begin_time: u64,
    /// Minimum node count the job requests.
    pub min_nodes: u32,
}

/// A job as tracked by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub user_id: u32,
    pub name: String,
    /// Partition the job was submitted to, if any.
    pub partition: Option<String>,
    /// Processors allocated (or requested) by the job.
    pub total_procs: u32,
    /// Biased nice value; `NICE_OFFSET` means unbiased.
    pub nice: u32,
    pub details: Option<JobDetails>,
    /// Unix timestamp of submission; explicit tiebreaker for equal
    /// priorities.
    pub submit_time: u64,
    /// Unix timestamp the job started running. 0 means not started.
    pub start_time: u64,
    /// Unix timestamp the job finished. 0 means still running.
    pub end_time: u64,
    pub state: JobState,
    /// 0 = user hold, 1 = system hold, >= 2 live.
    pub priority: u32,
    /// Admin override: the stored priority must not be recomputed.
    pub direct_set_prio: bool,
    pub assoc_id: Option<AssocId>,
    pub qos_id: Option<QosId>,
}

impl JobRecord {
    /// Build the key for the jobs table.
    pub fn table_key(&self) -> String {
        job_key(self.job_id)
    }

    pub fn is_pending(&self) -> bool {
        self.state == JobState::Pending
    }

    /// Held jobs (user or system) are excluded from repricing.
    pub fn is_held(&self) -> bool {
        self.priority == PRIO_HELD_USER || self.priority == PRIO_HELD_SYSTEM
    }
}

/// Zero-padded jobs-table key for a job id.
pub fn job_key(job_id: JobId) -> String {
    format!("{job_id:010}")
}

// ── Associations ──────────────────────────────────────────────────

/// Parent id marking a direct child of the (implicit) root.
pub const PARENT_ROOT: AssocId = 0;

/// A node of the account/user share hierarchy, as persisted.
///
/// The root is implicit and never stored; `parent_id == PARENT_ROOT`
/// marks a top-level account. Usage fields are written back by the decay
/// loop so accumulated history survives a controller restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssocRecord {
    /// Stable non-zero id.
    pub id: AssocId,
    pub account: String,
    /// Set for leaf user associations, absent for account nodes.
    pub user: Option<String>,
    pub parent_id: AssocId,
    /// Allotment at this level; `SHARES_USE_PARENT` inherits the parent.
    pub shares_raw: u32,
    /// Decayed cpu-seconds charged to this node and its subtree.
    pub usage_raw: f64,
    /// Decayed wall-seconds, kept for group limit checks.
    pub grp_used_wall: f64,
}

impl AssocRecord {
    /// Build the key for the associations table.
    pub fn table_key(&self) -> String {
        assoc_key(self.id)
    }

    pub fn is_user(&self) -> bool {
        self.user.is_some()
    }
}

/// Zero-padded associations-table key for an association id.
pub fn assoc_key(id: AssocId) -> String {
    format!("{id:010}")
}

// ── Partitions ────────────────────────────────────────────────────

/// A partition as seen by the priority engine: only its priority matters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub name: String,
    pub priority: u32,
    /// `priority` divided by the highest partition priority in the
    /// cluster; stamped by [`normalize_partitions`].
    pub norm_priority: f64,
}

/// Recompute `norm_priority` across a partition set.
pub fn normalize_partitions(partitions: &mut [PartitionRecord]) {
    let max = partitions.iter().map(|p| p.priority).max().unwrap_or(0);
    for p in partitions.iter_mut() {
        p.norm_priority = if max == 0 {
            0.0
        } else {
            f64::from(p.priority) / f64::from(max)
        };
    }
}

// ── QOS ───────────────────────────────────────────────────────────

/// A quality-of-service class: an orthogonal priority lane with its own
/// usage accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QosRecord {
    pub id: QosId,
    pub name: String,
    pub priority: u32,
    /// `priority` divided by the highest QOS priority in the cluster;
    /// stamped by [`normalize_qos`].
    pub norm_priority: f64,
    /// Multiplier applied to usage charged under this QOS. Values <= 0
    /// are ignored.
    pub usage_factor: f64,
    pub usage_raw: f64,
    pub grp_used_wall: f64,
}

impl QosRecord {
    /// Build the key for the QOS table.
    pub fn table_key(&self) -> String {
        qos_key(self.id)
    }
}

/// Zero-padded QOS-table key for a QOS id.
pub fn qos_key(id: QosId) -> String {
    format!("{id:010}")
}

/// Recompute `norm_priority` across a QOS set.
pub fn normalize_qos(qos: &mut [QosRecord]) {
    let max = qos.iter().map(|q| q.priority).max().unwrap_or(0);
    for q in qos.iter_mut() {
        q.norm_priority = if max == 0 {
            0.0
        } else {
            f64::from(q.priority) / f64::from(max)
        };
    }
}
