//! The association tree: arena storage, share math, usage accounting.

use std::collections::HashMap;

use tracing::{debug, warn};

use fairq_core::SHARES_USE_PARENT;
use fairq_state::{AssocId, AssocRecord, PARENT_ROOT, QosId, QosRecord};

use crate::error::{AssocError, AssocResult};

/// Arena index of the implicit root node.
const ROOT: usize = 0;

/// A node of the share hierarchy.
///
/// Parent and children are arena indices, never pointers; removal leaves
/// a tombstone so outstanding indices stay valid.
#[derive(Debug)]
pub struct AssocNode {
    pub id: AssocId,
    pub account: String,
    /// Set for leaf user associations.
    pub user: Option<String>,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Raw allotment at this level; `SHARES_USE_PARENT` inherits.
    pub shares_raw: u32,
    /// Sum of non-sentinel `shares_raw` across this node's siblings.
    pub level_shares: u64,
    /// Product of `shares_raw / level_shares` along the root path.
    pub shares_norm: f64,
    /// Decayed cpu-seconds charged to this node.
    pub usage_raw: f64,
    /// `usage_raw / root.usage_raw`, clamped into [0, 1].
    pub usage_norm: f64,
    /// Blended effective usage; `None` until computed for this cycle.
    pub usage_efctv: Option<f64>,
    /// Decayed wall-seconds, kept for group limit checks.
    pub grp_used_wall: f64,
    alive: bool,
}

impl AssocNode {
    pub fn is_user(&self) -> bool {
        self.user.is_some()
    }

    /// This node's fraction of its level: `shares_raw / level_shares`.
    /// Sentinel shares count as the full level; an empty level counts as
    /// nothing.
    fn level_ratio(&self) -> f64 {
        if self.shares_raw == SHARES_USE_PARENT {
            1.0
        } else if self.level_shares == 0 {
            0.0
        } else {
            f64::from(self.shares_raw) / self.level_shares as f64
        }
    }
}

/// The in-memory share hierarchy plus the QOS usage list.
pub struct AssocStore {
    nodes: Vec<AssocNode>,
    by_id: HashMap<AssocId, usize>,
    qos: HashMap<QosId, QosRecord>,
    fairshare_enabled: bool,
    /// Arguments of the last successful ceiling update, for idempotence.
    max_usage: Option<(u32, u64)>,
}

impl AssocStore {
    /// Create a store holding only the implicit root.
    pub fn new(fairshare_enabled: bool) -> Self {
        let root = AssocNode {
            id: PARENT_ROOT,
            account: "root".to_string(),
            user: None,
            parent: None,
            children: Vec::new(),
            shares_raw: 1,
            level_shares: 1,
            shares_norm: 1.0,
            usage_raw: 0.0,
            usage_norm: 1.0,
            usage_efctv: Some(1.0),
            grp_used_wall: 0.0,
            alive: true,
        };
        Self {
            nodes: vec![root],
            by_id: HashMap::new(),
            qos: HashMap::new(),
            fairshare_enabled,
            max_usage: None,
        }
    }

    /// Build the tree from persisted records (any order) and a QOS list.
    pub fn load(
        records: &[AssocRecord],
        qos: Vec<QosRecord>,
        fairshare_enabled: bool,
    ) -> AssocResult<Self> {
        let mut store = Self::new(fairshare_enabled);
        for q in qos {
            store.qos.insert(q.id, q);
        }

        // Records may arrive child-before-parent; insert until fixpoint.
        let mut remaining: Vec<&AssocRecord> = records.iter().collect();
        while !remaining.is_empty() {
            let before = remaining.len();
            remaining.retain(|record| match store.insert(*record) {
                Ok(()) => false,
                Err(AssocError::MissingParent { .. }) => true,
                Err(e) => {
                    warn!(assoc_id = record.id, error = %e, "skipping association record");
                    false
                }
            });
            if remaining.len() == before {
                let orphan = remaining[0];
                return Err(AssocError::MissingParent {
                    id: orphan.id,
                    parent_id: orphan.parent_id,
                });
            }
        }
        debug!(
            associations = store.by_id.len(),
            qos = store.qos.len(),
            "association tree loaded"
        );
        Ok(store)
    }

    // ── Membership ────────────────────────────────────────────────

    /// Insert one association under its parent.
    pub fn insert(&mut self, record: &AssocRecord) -> AssocResult<()> {
        if record.id == PARENT_ROOT || self.by_id.contains_key(&record.id) {
            return Err(AssocError::Duplicate(record.id));
        }
        let parent_idx = self.resolve_parent(record.id, record.parent_id)?;

        let idx = self.nodes.len();
        self.nodes.push(AssocNode {
            id: record.id,
            account: record.account.clone(),
            user: record.user.clone(),
            parent: Some(parent_idx),
            children: Vec::new(),
            shares_raw: record.shares_raw,
            level_shares: 0,
            shares_norm: 0.0,
            usage_raw: record.usage_raw,
            usage_norm: 0.0,
            usage_efctv: None,
            grp_used_wall: record.grp_used_wall,
            alive: true,
        });
        self.nodes[parent_idx].children.push(idx);
        self.by_id.insert(record.id, idx);

        self.rebuild_level(parent_idx);
        self.recalc_shares_below(parent_idx);
        Ok(())
    }

    /// Remove a childless association, leaving a tombstone in the arena.
    pub fn remove(&mut self, id: AssocId) -> AssocResult<()> {
        let idx = self.index_of(id)?;
        if self.nodes[idx].children.iter().any(|&c| self.nodes[c].alive) {
            return Err(AssocError::HasChildren(id));
        }
        let parent_idx = self.nodes[idx].parent.unwrap_or(ROOT);
        self.nodes[idx].alive = false;
        self.nodes[parent_idx].children.retain(|&c| c != idx);
        self.by_id.remove(&id);

        self.rebuild_level(parent_idx);
        self.recalc_shares_below(parent_idx);
        debug!(assoc_id = id, "association removed");
        Ok(())
    }

    /// Change an association's raw share allotment.
    pub fn update_shares(&mut self, id: AssocId, shares_raw: u32) -> AssocResult<()> {
        let idx = self.index_of(id)?;
        self.nodes[idx].shares_raw = shares_raw;
        let parent_idx = self.nodes[idx].parent.unwrap_or(ROOT);
        self.rebuild_level(parent_idx);
        self.recalc_shares_below(parent_idx);
        Ok(())
    }

    // ── Cluster ceiling ───────────────────────────────────────────

    /// Seed the root's usage with the cluster's steady-state maximum:
    /// `procs * half_life * 2`. Idempotent for unchanged arguments.
    pub fn set_max_cluster_usage(&mut self, procs: u32, half_life: u64) {
        if self.max_usage == Some((procs, half_life)) {
            return;
        }
        let ceiling = f64::from(procs) * half_life as f64 * 2.0;
        self.nodes[ROOT].usage_raw = ceiling;
        self.nodes[ROOT].usage_norm = 1.0;
        self.max_usage = Some((procs, half_life));
        debug!(procs, half_life, ceiling, "cluster usage ceiling set");
    }

    /// Whether the ceiling has been seeded with a usable value. Fairshare
    /// yields 0 until it has.
    pub fn max_usage_set(&self) -> bool {
        self.max_usage.is_some() && self.nodes[ROOT].usage_raw > 0.0
    }

    // ── Usage accounting ──────────────────────────────────────────

    /// Multiply every non-root association's usage, and every QOS
    /// record's usage, by `factor`.
    pub fn apply_decay(&mut self, factor: f64) -> AssocResult<()> {
        if !self.fairshare_enabled {
            return Err(AssocError::FairshareDisabled);
        }
        if factor == 0.0 {
            return Err(AssocError::ZeroDecayFactor);
        }
        for node in self.nodes.iter_mut().skip(1).filter(|n| n.alive) {
            node.usage_raw *= factor;
            node.grp_used_wall *= factor;
        }
        for qos in self.qos.values_mut() {
            qos.usage_raw *= factor;
            qos.grp_used_wall *= factor;
        }
        Ok(())
    }

    /// Charge usage to an association and every ancestor below the root,
    /// and to the job's QOS if one is given. A positive QOS
    /// `usage_factor` scales the raw charge.
    pub fn accumulate(
        &mut self,
        id: AssocId,
        charge_raw: f64,
        charge_wall: f64,
        qos_id: Option<QosId>,
    ) -> AssocResult<()> {
        let start = self.index_of(id)?;

        let mut charge = charge_raw;
        if let Some(qid) = qos_id {
            let qos = self.qos.get(&qid).ok_or(AssocError::UnknownQos(qid))?;
            if qos.usage_factor > 0.0 {
                charge *= qos.usage_factor;
            }
        }

        let mut idx = start;
        while idx != ROOT {
            let node = &mut self.nodes[idx];
            node.usage_raw += charge;
            node.grp_used_wall += charge_wall;
            idx = node.parent.unwrap_or(ROOT);
        }

        if let Some(qid) = qos_id
            && let Some(qos) = self.qos.get_mut(&qid)
        {
            qos.usage_raw += charge;
            qos.grp_used_wall += charge_wall;
        }
        Ok(())
    }

    /// Zero all usage history: every non-root association and every QOS
    /// record. The root ceiling is left in place.
    pub fn reset_usage(&mut self) {
        for node in self.nodes.iter_mut().skip(1).filter(|n| n.alive) {
            node.usage_raw = 0.0;
            node.grp_used_wall = 0.0;
            node.usage_norm = 0.0;
            node.usage_efctv = None;
        }
        for qos in self.qos.values_mut() {
            qos.usage_raw = 0.0;
            qos.grp_used_wall = 0.0;
        }
    }

    // ── Effective usage ───────────────────────────────────────────

    /// Recompute one association's normalized and effective usage from
    /// its parent's current effective usage.
    pub fn set_effective_usage(&mut self, id: AssocId) -> AssocResult<()> {
        let idx = self.index_of(id)?;
        self.compute_effective(idx);
        Ok(())
    }

    /// Effective usage of one association, computing (and caching) it and
    /// any stale ancestors on demand.
    pub fn effective_usage(&mut self, id: AssocId) -> AssocResult<f64> {
        let idx = self.index_of(id)?;

        // Walk up to the nearest ancestor with a cached value, then
        // compute back down.
        let mut chain = Vec::new();
        let mut cursor = idx;
        while cursor != ROOT && self.nodes[cursor].usage_efctv.is_none() {
            chain.push(cursor);
            cursor = self.nodes[cursor].parent.unwrap_or(ROOT);
        }
        for &node_idx in chain.iter().rev() {
            self.compute_effective(node_idx);
        }

        Ok(self.nodes[idx]
            .usage_efctv
            .unwrap_or(self.nodes[idx].usage_norm))
    }

    /// Top-down refresh: recompute effective usage for every internal
    /// node; clear leaf users so their value is demand-computed on the
    /// next fairshare query. This keeps the per-tick cost proportional to
    /// the number of accounts, not the number of users.
    pub fn refresh_effective_usage(&mut self) {
        let order = self.top_down_order();
        for idx in order {
            if self.nodes[idx].is_user() {
                self.nodes[idx].usage_efctv = None;
            } else {
                self.compute_effective(idx);
            }
        }
    }

    fn compute_effective(&mut self, idx: usize) {
        let root_usage = self.nodes[ROOT].usage_raw;
        let usage_norm = if root_usage > 0.0 {
            (self.nodes[idx].usage_raw / root_usage).min(1.0)
        } else {
            0.0
        };

        let parent_idx = self.nodes[idx].parent.unwrap_or(ROOT);
        let efctv = if parent_idx == ROOT {
            usage_norm
        } else {
            let parent_efctv = self.nodes[parent_idx]
                .usage_efctv
                .unwrap_or(self.nodes[parent_idx].usage_norm);
            usage_norm + (parent_efctv - usage_norm) * self.nodes[idx].level_ratio()
        };

        let node = &mut self.nodes[idx];
        node.usage_norm = usage_norm;
        node.usage_efctv = Some(efctv);
    }

    // ── Queries ───────────────────────────────────────────────────

    /// Look up a node by association id.
    pub fn node(&self, id: AssocId) -> Option<&AssocNode> {
        self.by_id.get(&id).map(|&idx| &self.nodes[idx])
    }

    /// Normalized shares for one association.
    pub fn shares_norm(&self, id: AssocId) -> Option<f64> {
        self.node(id).map(|n| n.shares_norm)
    }

    /// Number of live associations (root excluded).
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn qos(&self, id: QosId) -> Option<&QosRecord> {
        self.qos.get(&id)
    }

    /// Usage of every live non-root association, for persistence.
    pub fn usage_snapshot(&self) -> Vec<(AssocId, f64, f64)> {
        self.nodes
            .iter()
            .skip(1)
            .filter(|n| n.alive)
            .map(|n| (n.id, n.usage_raw, n.grp_used_wall))
            .collect()
    }

    /// Current QOS records, for persistence.
    pub fn qos_snapshot(&self) -> Vec<QosRecord> {
        let mut records: Vec<QosRecord> = self.qos.values().cloned().collect();
        records.sort_by_key(|q| q.id);
        records
    }

    /// Live non-root nodes in top-down order.
    pub fn iter_nodes(&self) -> impl Iterator<Item = &AssocNode> {
        self.top_down_order().into_iter().map(|idx| &self.nodes[idx])
    }

    // ── Internal helpers ──────────────────────────────────────────

    fn index_of(&self, id: AssocId) -> AssocResult<usize> {
        self.by_id
            .get(&id)
            .copied()
            .ok_or(AssocError::Unknown(id))
    }

    fn resolve_parent(&self, id: AssocId, parent_id: AssocId) -> AssocResult<usize> {
        if parent_id == PARENT_ROOT {
            Ok(ROOT)
        } else {
            self.by_id
                .get(&parent_id)
                .copied()
                .ok_or(AssocError::MissingParent { id, parent_id })
        }
    }

    /// Recompute `level_shares` across one parent's children.
    fn rebuild_level(&mut self, parent_idx: usize) {
        let children = self.nodes[parent_idx].children.clone();
        let level: u64 = children
            .iter()
            .map(|&c| &self.nodes[c])
            .filter(|n| n.alive && n.shares_raw != SHARES_USE_PARENT)
            .map(|n| u64::from(n.shares_raw))
            .sum();
        for &c in &children {
            self.nodes[c].level_shares = level;
        }
    }

    /// Recompute `shares_norm` for every live node below `from`.
    fn recalc_shares_below(&mut self, from: usize) {
        let mut stack = vec![from];
        while let Some(idx) = stack.pop() {
            let parent_norm = self.nodes[idx].shares_norm;
            let children = self.nodes[idx].children.clone();
            for c in children {
                if !self.nodes[c].alive {
                    continue;
                }
                let child = &mut self.nodes[c];
                child.shares_norm = if child.shares_raw == SHARES_USE_PARENT {
                    parent_norm
                } else if child.level_shares == 0 {
                    0.0
                } else {
                    parent_norm * f64::from(child.shares_raw) / child.level_shares as f64
                };
                stack.push(c);
            }
        }
    }

    /// Pre-order walk of the live tree, root excluded.
    fn top_down_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.by_id.len());
        let mut stack: Vec<usize> = self.nodes[ROOT]
            .children
            .iter()
            .rev()
            .copied()
            .collect();
        while let Some(idx) = stack.pop() {
            if !self.nodes[idx].alive {
                continue;
            }
            order.push(idx);
            stack.extend(self.nodes[idx].children.iter().rev().copied());
        }
        order
    }
}
