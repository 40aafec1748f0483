//! The `PriorityPlugin` dispatcher.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use fairq_assoc::AssocStore;
use fairq_core::{BackendKind, FairqConfig, NICE_OFFSET};
use fairq_decay::DecayState;
use fairq_engine::{EngineConfig, FactorsReport, PriorityEngine};
use fairq_state::{JobRecord, PartitionRecord, StateStore};

use crate::error::{FacadeError, FacadeResult};

/// Shared controller state every backend operates on.
#[derive(Clone)]
pub struct PluginContext {
    pub config: Arc<RwLock<FairqConfig>>,
    pub assoc: Arc<RwLock<AssocStore>>,
    pub store: StateStore,
    pub decay_state: Arc<Mutex<DecayState>>,
}

/// The dispatch surface over the compiled-in priority backends.
pub struct PriorityPlugin {
    backend: BackendKind,
    ctx: PluginContext,
    initialized: Mutex<bool>,
}

impl PriorityPlugin {
    pub fn new(backend: BackendKind, ctx: PluginContext) -> Self {
        Self {
            backend,
            ctx,
            initialized: Mutex::new(false),
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Initialize the backend. Idempotent; every dispatching operation
    /// calls this lazily. Must not be invoked while holding the decay
    /// lock.
    pub async fn init(&self) -> FacadeResult<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        let config = self.ctx.config.read().await;
        if self.backend == BackendKind::Multifactor && config.fairshare_enabled() {
            if config.cluster.procs == 0 {
                return Err(FacadeError::Init(
                    "cluster processor count unknown, cannot size usage ceiling".to_string(),
                ));
            }
            self.ctx
                .assoc
                .write()
                .await
                .set_max_cluster_usage(config.cluster.procs, config.half_life_secs());
        }

        info!(backend = ?self.backend, "priority backend initialized");
        *initialized = true;
        Ok(())
    }

    /// Tear down. The decay loop is owned (and joined) by the daemon;
    /// this only drops the init guard so a re-init re-seeds the ceiling.
    pub async fn fini(&self) {
        let mut initialized = self.initialized.lock().await;
        *initialized = false;
        debug!(backend = ?self.backend, "priority backend finalized");
    }

    async fn ensure_init(&self) {
        if let Err(e) = self.init().await {
            warn!(error = %e, "lazy init failed, continuing best-effort");
        }
    }

    /// Assign a priority for a job entering the system.
    ///
    /// `last_prio` is the most recent priority handed out, consumed only
    /// by the decrement backend. Internal failures never surface: the
    /// caller always gets a usable value (possibly a hold).
    pub async fn set(&self, last_prio: u32, job: &JobRecord) -> u32 {
        self.ensure_init().await;

        match self.backend {
            BackendKind::Multifactor => self.compute_multifactor(job).await,
            BackendKind::Decrement => decrement_priority(last_prio, job),
            BackendKind::Basic => {
                // One-shot assignment; no decay loop ever revisits it.
                let priority = self.compute_multifactor(job).await;
                info!(job_id = job.job_id, priority, "one-shot priority assigned");
                priority
            }
        }
    }

    /// Pick up configuration changes: flag the decay loop and let it
    /// re-snapshot tuning at the top of its next tick.
    pub async fn reconfig(&self) {
        self.ensure_init().await;
        let mut state = self.ctx.decay_state.lock().await;
        state.reconfig = true;
        info!("reconfig flagged for the next decay tick");
    }

    /// Re-seed the cluster usage ceiling.
    pub async fn set_max_cluster_usage(
        &self,
        procs: u32,
        half_life_secs: u64,
    ) -> FacadeResult<()> {
        if procs == 0 {
            return Err(FacadeError::Init(
                "cluster processor count must be non-zero".to_string(),
            ));
        }
        self.ctx
            .assoc
            .write()
            .await
            .set_max_cluster_usage(procs, half_life_secs);
        Ok(())
    }

    /// Recompute one association's effective usage immediately.
    pub async fn set_assoc_usage(&self, assoc_id: u32) -> FacadeResult<()> {
        self.ctx
            .assoc
            .write()
            .await
            .set_effective_usage(assoc_id)?;
        Ok(())
    }

    /// The per-factor breakdown for every pending job matching the
    /// filters; the payload behind the reporting CLI.
    pub async fn get_priority_factors_list(
        &self,
        job_filter: &[u32],
        user_filter: &[u32],
    ) -> FacadeResult<FactorsReport> {
        self.ensure_init().await;

        let engine = self.engine_snapshot().await;
        let jobs = self.ctx.store.list_jobs()?;
        let partitions = self.partition_map()?;

        let mut assoc = self.ctx.assoc.write().await;
        let entries = engine.factors_list(
            epoch_secs(),
            &jobs,
            &mut assoc,
            &partitions,
            job_filter,
            user_filter,
        );

        Ok(FactorsReport {
            backend: self.backend,
            weights: *engine.weights(),
            entries,
        })
    }

    // ── Internal helpers ──────────────────────────────────────────

    async fn compute_multifactor(&self, job: &JobRecord) -> u32 {
        let engine = self.engine_snapshot().await;
        let partition = job.partition.as_deref().and_then(|name| {
            self.ctx.store.get_partition(name).ok().flatten()
        });

        let mut assoc = self.ctx.assoc.write().await;
        engine.compute(epoch_secs(), job, &mut assoc, partition.as_ref())
    }

    async fn engine_snapshot(&self) -> PriorityEngine {
        let config = self.ctx.config.read().await;
        PriorityEngine::new(EngineConfig::from_config(&config))
    }

    fn partition_map(&self) -> FacadeResult<HashMap<String, PartitionRecord>> {
        Ok(self
            .ctx
            .store
            .list_partitions()?
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect())
    }
}

/// The decrement backend: one less than the last priority handed out,
/// shifted by nice. Admin overrides and held jobs keep their value.
fn decrement_priority(last_prio: u32, job: &JobRecord) -> u32 {
    if job.direct_set_prio || job.is_held() {
        return job.priority;
    }
    let nice_adjust = i64::from(job.nice) - i64::from(NICE_OFFSET);
    let next = i64::from(last_prio) - 1 - nice_adjust;
    next.clamp(1, i64::from(u32::MAX)) as u32
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
