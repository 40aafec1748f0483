//! The priority computation itself.

use std::collections::HashMap;

use tracing::{debug, warn};

use fairq_assoc::AssocStore;
use fairq_core::{FairqConfig, NICE_OFFSET, PRIO_HELD_SYSTEM, PRIO_HELD_USER};
use fairq_state::{JobRecord, PartitionRecord};

use crate::factors::{FactorWeights, JobFactorsEntry, PriorityFactors};

/// Tuning snapshot the engine computes against. Rebuilt on reconfig.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_age_secs: u64,
    pub favor_small: bool,
    pub total_nodes: u32,
    pub fairshare_enabled: bool,
    pub weights: FactorWeights,
}

impl EngineConfig {
    /// Snapshot the priority tuning out of the controller config. The
    /// fairshare weight is forced to 0 when no accounting backend is
    /// available.
    pub fn from_config(config: &FairqConfig) -> Self {
        Self {
            max_age_secs: config.max_age_secs(),
            favor_small: config.priority.favor_small,
            total_nodes: config.cluster.nodes,
            fairshare_enabled: config.fairshare_enabled(),
            weights: FactorWeights {
                age: config.priority.weight_age,
                fairshare: config.effective_weight_fairshare(),
                job_size: config.priority.weight_job_size,
                partition: config.priority.weight_partition,
                qos: config.priority.weight_qos,
            },
        }
    }
}

/// Computes job priorities from the share tree and the tuning snapshot.
pub struct PriorityEngine {
    config: EngineConfig,
}

impl PriorityEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn weights(&self) -> &FactorWeights {
        &self.config.weights
    }

    /// Compute the priority for one job.
    ///
    /// Admin-overridden jobs keep their stored value bit-for-bit. A job
    /// without details cannot be priced and is user-held (0); a job whose
    /// begin time is unset or in the future is system-held (1) until it
    /// becomes eligible. Everything else gets the weighted factor sum,
    /// clamped to at least 1.
    pub fn compute(
        &self,
        now: u64,
        job: &JobRecord,
        assoc: &mut AssocStore,
        partition: Option<&PartitionRecord>,
    ) -> u32 {
        if job.direct_set_prio {
            return job.priority;
        }

        let Some(details) = job.details else {
            warn!(job_id = job.job_id, "job has no details, holding");
            return PRIO_HELD_USER;
        };

        if details.begin_time == 0 || details.begin_time > now {
            return PRIO_HELD_SYSTEM;
        }

        let factors = self.factors(now, job, assoc, partition);
        let weighted = factors.weighted_total(&self.config.weights);
        let nice_adjust = f64::from(job.nice) - f64::from(NICE_OFFSET);
        let raw = weighted - nice_adjust;

        let priority = if raw < 1.0 {
            1
        } else if raw >= f64::from(u32::MAX) {
            u32::MAX
        } else {
            raw as u32
        };
        debug!(
            job_id = job.job_id,
            priority,
            age = factors.age,
            fairshare = factors.fairshare,
            job_size = factors.job_size,
            partition = factors.partition,
            qos = factors.qos,
            "priority computed"
        );
        priority
    }

    /// Compute the normalized factor breakdown for one job. Factors whose
    /// weight is 0 are skipped; skipping never changes the final
    /// priority, only the work done.
    pub fn factors(
        &self,
        now: u64,
        job: &JobRecord,
        assoc: &mut AssocStore,
        partition: Option<&PartitionRecord>,
    ) -> PriorityFactors {
        let weights = &self.config.weights;
        let mut factors = PriorityFactors::default();

        if weights.age > 0 {
            factors.age = self.age_factor(now, job);
        }
        if weights.fairshare > 0 {
            factors.fairshare = self.fairshare_factor(job, assoc);
        }
        if weights.job_size > 0 {
            factors.job_size = self.job_size_factor(job);
        }
        if weights.partition > 0 {
            factors.partition = partition
                .filter(|p| p.priority > 0)
                .map(|p| p.norm_priority)
                .unwrap_or(0.0);
        }
        if weights.qos > 0 {
            factors.qos = job
                .qos_id
                .and_then(|id| assoc.qos(id))
                .filter(|q| q.priority > 0)
                .map(|q| q.norm_priority)
                .unwrap_or(0.0);
        }
        factors
    }

    /// Build the factors report for every pending job matching the
    /// filters (empty filter = match all). Entries are ordered by their
    /// weighted total, ties broken by submit time then job id.
    pub fn factors_list(
        &self,
        now: u64,
        jobs: &[JobRecord],
        assoc: &mut AssocStore,
        partitions: &HashMap<String, PartitionRecord>,
        job_filter: &[u32],
        user_filter: &[u32],
    ) -> Vec<JobFactorsEntry> {
        let mut scored: Vec<(f64, u64, JobFactorsEntry)> = jobs
            .iter()
            .filter(|j| j.is_pending())
            .filter(|j| job_filter.is_empty() || job_filter.contains(&j.job_id))
            .filter(|j| user_filter.is_empty() || user_filter.contains(&j.user_id))
            .map(|job| {
                let partition = job
                    .partition
                    .as_deref()
                    .and_then(|name| partitions.get(name));
                let factors = self.factors(now, job, assoc, partition);
                let total = factors.weighted_total(&self.config.weights);
                (
                    total,
                    job.submit_time,
                    JobFactorsEntry {
                        job_id: job.job_id,
                        user_id: job.user_id,
                        priority: job.priority,
                        nice: job.nice,
                        factors,
                    },
                )
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.total_cmp(&a.0)
                .then(a.1.cmp(&b.1))
                .then(a.2.job_id.cmp(&b.2.job_id))
        });
        scored.into_iter().map(|(_, _, entry)| entry).collect()
    }

    // ── Individual factors ────────────────────────────────────────

    /// Time spent eligible, capped by `max_age` and normalized into
    /// [0, 1]. A zero `max_age` makes the factor inert.
    fn age_factor(&self, now: u64, job: &JobRecord) -> f64 {
        if self.config.max_age_secs == 0 {
            return 0.0;
        }
        let Some(details) = job.details else {
            return 0.0;
        };
        if details.begin_time == 0 || details.begin_time >= now {
            return 0.0;
        }
        let age = (now - details.begin_time).min(self.config.max_age_secs);
        age as f64 / self.config.max_age_secs as f64
    }

    /// `(shares_norm - usage_efctv + 1) / 2` at the job's association:
    /// 1.0 for a fully under-served association, 0.0 for one that used
    /// the whole cluster while holding no shares. 0 when fairshare is
    /// unavailable for any reason.
    fn fairshare_factor(&self, job: &JobRecord, assoc: &mut AssocStore) -> f64 {
        if !self.config.fairshare_enabled {
            return 0.0;
        }
        let Some(assoc_id) = job.assoc_id else {
            return 0.0;
        };
        if !assoc.max_usage_set() {
            return 0.0;
        }
        let Some(shares_norm) = assoc.shares_norm(assoc_id) else {
            warn!(job_id = job.job_id, assoc_id, "job references unknown association");
            return 0.0;
        };
        let usage_efctv = match assoc.effective_usage(assoc_id) {
            Ok(v) => v,
            Err(e) => {
                warn!(job_id = job.job_id, error = %e, "effective usage unavailable");
                return 0.0;
            }
        };
        (shares_norm - usage_efctv + 1.0) / 2.0
    }

    /// Requested node count against cluster size; `favor_small` flips
    /// the reward toward small jobs.
    fn job_size_factor(&self, job: &JobRecord) -> f64 {
        let total = self.config.total_nodes;
        if total == 0 {
            return 0.0;
        }
        let min_nodes = job.details.map(|d| d.min_nodes).unwrap_or(0).min(total);
        let factor = if self.config.favor_small {
            f64::from(total - min_nodes) / f64::from(total)
        } else {
            f64::from(min_nodes) / f64::from(total)
        };
        factor.clamp(0.0, 1.0)
    }
}
