//! The decay tick and its driving loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, error, info, warn};

use fairq_assoc::AssocStore;
use fairq_core::FairqConfig;
use fairq_engine::{EngineConfig, PriorityEngine};
use fairq_persist::DecayClock;
use fairq_state::{JobRecord, PartitionRecord, StateStore};

/// Per-second decay multiplier for a usage half-life.
///
/// `half_life == 0` disables decay (factor 1.0).
pub fn per_second_decay(half_life_secs: u64) -> f64 {
    if half_life_secs == 0 {
        1.0
    } else {
        1.0 - std::f64::consts::LN_2 / half_life_secs as f64
    }
}

/// Mutable loop state, shared with the facade under one lock.
#[derive(Debug, Default)]
pub struct DecayState {
    /// When the last tick completed (epoch seconds). 0 = never.
    pub last_ran: u64,
    /// Set by the reconfig path; consumed at the top of the next tick.
    pub reconfig: bool,
    /// Next scheduled usage reset (epoch seconds). 0 = unscheduled.
    pub next_reset: u64,
}

/// The long-lived decay task.
pub struct DecayLoop {
    config: Arc<RwLock<FairqConfig>>,
    assoc: Arc<RwLock<AssocStore>>,
    store: StateStore,
    clock: DecayClock,
    state: Arc<Mutex<DecayState>>,
    engine: PriorityEngine,
    /// Per-second decay multiplier derived from the half-life.
    decay_factor: f64,
    half_life_secs: u64,
    calc_period_secs: u64,
    reset_period_secs: u64,
    fairshare_enabled: bool,
}

impl DecayLoop {
    /// Build the loop from the shared controller context. The tuning
    /// snapshot is taken immediately; later changes arrive via the
    /// reconfig flag.
    pub async fn new(
        config: Arc<RwLock<FairqConfig>>,
        assoc: Arc<RwLock<AssocStore>>,
        store: StateStore,
        clock: DecayClock,
        state: Arc<Mutex<DecayState>>,
    ) -> Self {
        let snapshot = config.read().await.clone();
        Self {
            engine: PriorityEngine::new(EngineConfig::from_config(&snapshot)),
            decay_factor: per_second_decay(snapshot.half_life_secs()),
            half_life_secs: snapshot.half_life_secs(),
            calc_period_secs: snapshot.calc_period_secs(),
            reset_period_secs: snapshot.usage_reset_period_secs(),
            fairshare_enabled: snapshot.fairshare_enabled(),
            config,
            assoc,
            store,
            clock,
            state,
        }
    }

    /// Run until shutdown or a fatal decay failure.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.calc_period_secs,
            half_life_secs = self.half_life_secs,
            "decay loop started"
        );

        loop {
            let tick_start = epoch_secs();
            if let Err(e) = self.tick(tick_start).await {
                error!(error = %e, "decay failed, live repricing disabled");
                break;
            }

            // Tick-aligned sleep: wake a fixed interval after this tick
            // started, regardless of how long the tick took.
            let sleep_secs = (tick_start + self.calc_period_secs)
                .saturating_sub(epoch_secs())
                .max(1);

            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
                _ = shutdown.changed() => {
                    info!("decay loop shutting down");
                    break;
                }
            }
        }
    }

    /// Execute one tick at the given instant.
    ///
    /// An `Err` means decay itself failed and the loop must stop; every
    /// lesser failure is logged and absorbed.
    pub async fn tick(&mut self, now: u64) -> anyhow::Result<()> {
        let state_handle = self.state.clone();
        let mut state = state_handle.lock().await;

        if state.reconfig {
            self.reload_tuning().await;
            state.reconfig = false;
        }

        let assoc_handle = self.assoc.clone();
        let mut assoc = assoc_handle.write().await;

        // Scheduled hard reset of all usage, before any decay for this
        // interval is computed.
        if self.reset_period_secs > 0 {
            if state.next_reset == 0 {
                state.next_reset = now + self.reset_period_secs;
            } else if now >= state.next_reset {
                info!(now, "usage reset period reached, zeroing all usage");
                assoc.reset_usage();
                state.next_reset = now + self.reset_period_secs;
            }
        }

        let elapsed = now.saturating_sub(state.last_ran);
        if state.last_ran > 0 && elapsed > 0 && self.fairshare_enabled {
            let real_decay = self.decay_factor.powf(elapsed as f64);
            debug!(elapsed, real_decay, "applying decay");
            assoc
                .apply_decay(real_decay)
                .map_err(anyhow::Error::from)?;

            self.accumulate_running_jobs(&mut assoc, state.last_ran, now);
        }

        self.reprice_pending_jobs(&mut assoc, now);

        assoc.refresh_effective_usage();

        state.last_ran = now;
        if let Err(e) = self.clock.store(now) {
            warn!(error = %e, "failed to persist decay clock");
        }
        if let Err(e) = self.store.update_assoc_usage(&assoc.usage_snapshot()) {
            warn!(error = %e, "failed to persist association usage");
        }
        for qos in assoc.qos_snapshot() {
            if let Err(e) = self.store.put_qos(&qos) {
                warn!(qos_id = qos.id, error = %e, "failed to persist QOS usage");
            }
        }

        Ok(())
    }

    /// Charge every non-pending job's usage for the portion of
    /// `[last_ran, now]` it actually ran.
    fn accumulate_running_jobs(&self, assoc: &mut AssocStore, last_ran: u64, now: u64) {
        let jobs = match self.store.list_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "job walk skipped, cannot list jobs");
                return;
            }
        };

        for job in jobs.iter().filter(|j| !j.is_pending()) {
            if job.start_time == 0 {
                continue;
            }
            let Some(assoc_id) = job.assoc_id else {
                continue;
            };

            let start_period = last_ran.max(job.start_time);
            let end_period = if job.end_time > 0 {
                now.min(job.end_time)
            } else {
                now
            };
            let run_delta = end_period.saturating_sub(start_period);
            if run_delta < 1 {
                continue;
            }

            let charge = run_delta as f64
                * f64::from(job.total_procs)
                * self.decay_factor.powf(run_delta as f64);
            if let Err(e) = assoc.accumulate(assoc_id, charge, run_delta as f64, job.qos_id)
            {
                debug!(job_id = job.job_id, error = %e, "skipping job accumulation");
            }
        }
    }

    /// Recompute the priority of every live pending job and publish the
    /// batch. Held jobs (priority 0 or 1) are left alone.
    fn reprice_pending_jobs(&self, assoc: &mut AssocStore, now: u64) {
        let jobs = match self.store.list_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(error = %e, "repricing skipped, cannot list jobs");
                return;
            }
        };
        let partitions = match self.store.list_partitions() {
            Ok(parts) => parts
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect::<HashMap<String, PartitionRecord>>(),
            Err(e) => {
                warn!(error = %e, "repricing without partition records");
                HashMap::new()
            }
        };

        let mut repriced: Vec<JobRecord> = Vec::new();
        for mut job in jobs {
            if !job.is_pending() || job.priority <= 1 {
                continue;
            }
            let partition = job
                .partition
                .as_deref()
                .and_then(|name| partitions.get(name));
            let new_priority = self.engine.compute(now, &job, assoc, partition);
            if new_priority != job.priority {
                job.priority = new_priority;
                repriced.push(job);
            }
        }

        if !repriced.is_empty() {
            debug!(count = repriced.len(), "publishing repriced jobs");
            if let Err(e) = self.store.put_jobs(&repriced) {
                warn!(error = %e, "failed to persist repriced jobs");
            }
        }
    }

    /// Re-snapshot tuning after a reconfig.
    async fn reload_tuning(&mut self) {
        let snapshot = self.config.read().await.clone();
        self.engine = PriorityEngine::new(EngineConfig::from_config(&snapshot));
        self.decay_factor = per_second_decay(snapshot.half_life_secs());
        self.half_life_secs = snapshot.half_life_secs();
        self.calc_period_secs = snapshot.calc_period_secs();
        self.reset_period_secs = snapshot.usage_reset_period_secs();
        self.fairshare_enabled = snapshot.fairshare_enabled();
        info!(
            half_life_secs = self.half_life_secs,
            interval_secs = self.calc_period_secs,
            "decay loop reconfigured"
        );
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fairq_core::NICE_OFFSET;
    use fairq_state::{AssocRecord, JobDetails, JobState, PARENT_ROOT};

    const T0: u64 = 1_000_000;

    fn test_config(half_life: &str) -> FairqConfig {
        FairqConfig::from_toml_str(&format!(
            r#"
[cluster]
name = "test"
nodes = 10
procs = 1

[priority]
type = "multifactor"
decay_half_life = "{half_life}"
calc_period = "5m"
max_age = "7d"
weight_age = 1000
weight_fairshare = 10000

[accounting]
storage = "state"

[state]
save_location = "/tmp/fairq-test"
"#
        ))
        .unwrap()
    }

    fn assoc_record(id: u32, user: Option<&str>, parent_id: u32) -> AssocRecord {
        AssocRecord {
            id,
            account: "physics".to_string(),
            user: user.map(str::to_string),
            parent_id,
            shares_raw: 1,
            usage_raw: 0.0,
            grp_used_wall: 0.0,
        }
    }

    fn running_job(job_id: u32, start_time: u64) -> JobRecord {
        JobRecord {
            job_id,
            user_id: 500,
            name: format!("job-{job_id}"),
            partition: None,
            total_procs: 1,
            nice: NICE_OFFSET,
            details: Some(JobDetails {
                begin_time: start_time,
                min_nodes: 1,
            }),
            submit_time: start_time,
            start_time,
            end_time: 0,
            state: JobState::Running,
            priority: 100,
            direct_set_prio: false,
            assoc_id: Some(3),
            qos_id: None,
        }
    }

    fn pending_job(job_id: u32, begin_time: u64) -> JobRecord {
        let mut job = running_job(job_id, 0);
        job.state = JobState::Pending;
        job.details = Some(JobDetails {
            begin_time,
            min_nodes: 1,
        });
        job.submit_time = begin_time;
        job
    }

    struct Harness {
        decay: DecayLoop,
        store: StateStore,
        assoc: Arc<RwLock<AssocStore>>,
        state: Arc<Mutex<DecayState>>,
        config: Arc<RwLock<FairqConfig>>,
        _dir: tempfile::TempDir,
    }

    async fn harness(half_life: &str, last_ran: u64) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(half_life);
        let store = StateStore::open_in_memory().unwrap();

        let mut tree = AssocStore::load(
            &[
                assoc_record(2, None, PARENT_ROOT),
                assoc_record(3, Some("ada"), 2),
            ],
            Vec::new(),
            true,
        )
        .unwrap();
        tree.set_max_cluster_usage(config.cluster.procs, config.half_life_secs());

        for record in [
            assoc_record(2, None, PARENT_ROOT),
            assoc_record(3, Some("ada"), 2),
        ] {
            store.put_assoc(&record).unwrap();
        }

        let config = Arc::new(RwLock::new(config));
        let assoc = Arc::new(RwLock::new(tree));
        let state = Arc::new(Mutex::new(DecayState {
            last_ran,
            ..Default::default()
        }));
        let clock = DecayClock::new(dir.path());

        let decay = DecayLoop::new(
            config.clone(),
            assoc.clone(),
            store.clone(),
            clock,
            state.clone(),
        )
        .await;

        Harness {
            decay,
            store,
            assoc,
            state,
            config,
            _dir: dir,
        }
    }

    fn close(a: f64, b: f64, rel: f64) -> bool {
        if b == 0.0 {
            a.abs() <= rel
        } else {
            ((a - b) / b).abs() <= rel
        }
    }

    #[test]
    fn per_second_decay_values() {
        assert_eq!(per_second_decay(0), 1.0);
        let d = per_second_decay(3600);
        // One half-life of decay halves the history.
        assert!(close(d.powf(3600.0), 0.5, 1e-3));
    }

    // Cluster of 1 cpu with a 1 hour half-life; a job runs one full
    // half-life. After the tick the charged usage is ~1800 cpu-seconds
    // and the user's fairshare factor is ~0.875.
    #[tokio::test]
    async fn basic_accumulate_and_decay() {
        let mut h = harness("1h", T0).await;
        h.store.put_job(&running_job(1, T0)).unwrap();

        h.decay.tick(T0 + 3600).await.unwrap();

        let mut assoc = h.assoc.write().await;
        assert!(close(assoc.node(3).unwrap().usage_raw, 1800.0, 1e-3));

        // Fairshare for the sole user: (1.0 - 0.25 + 1)/2.
        let efctv = assoc.effective_usage(3).unwrap();
        let shares = assoc.shares_norm(3).unwrap();
        assert!(close(assoc.node(3).unwrap().usage_norm, 0.25, 1e-3));
        assert!(close((shares - efctv + 1.0) / 2.0, 0.875, 1e-3));
    }

    #[tokio::test]
    async fn first_tick_only_stamps_the_clock() {
        let mut h = harness("1h", 0).await;
        h.store.put_job(&running_job(1, T0)).unwrap();

        h.decay.tick(T0 + 3600).await.unwrap();

        // No catch-up on the very first tick: nothing accumulated.
        let assoc = h.assoc.read().await;
        assert_eq!(assoc.node(3).unwrap().usage_raw, 0.0);
        drop(assoc);
        assert_eq!(h.state.lock().await.last_ran, T0 + 3600);
    }

    #[tokio::test]
    async fn held_jobs_are_never_repriced() {
        let mut h = harness("1h", T0).await;
        let mut user_held = pending_job(1, T0);
        user_held.priority = 0;
        let mut system_held = pending_job(2, T0);
        system_held.priority = 1;
        h.store.put_job(&user_held).unwrap();
        h.store.put_job(&system_held).unwrap();

        h.decay.tick(T0 + 300).await.unwrap();

        assert_eq!(h.store.get_job(1).unwrap().unwrap().priority, 0);
        assert_eq!(h.store.get_job(2).unwrap().unwrap().priority, 1);
    }

    #[tokio::test]
    async fn admin_override_survives_repricing() {
        let mut h = harness("1h", T0).await;
        let mut job = pending_job(1, T0);
        job.priority = 500_000;
        job.direct_set_prio = true;
        h.store.put_job(&job).unwrap();

        h.decay.tick(T0 + 300).await.unwrap();

        assert_eq!(h.store.get_job(1).unwrap().unwrap().priority, 500_000);
    }

    #[tokio::test]
    async fn pending_jobs_are_repriced_and_persisted() {
        let mut h = harness("1h", T0).await;
        h.store.put_job(&pending_job(1, T0)).unwrap();

        h.decay.tick(T0 + 300).await.unwrap();

        let job = h.store.get_job(1).unwrap().unwrap();
        // age: 300s of 7d cap ~ 0; fairshare: (1 - 0 + 1)/2 * 10000.
        assert!(job.priority > 9_000, "priority was {}", job.priority);
    }

    // Restart after two half-lives: the catch-up tick multiplies all
    // usage down to ~25% of its pre-shutdown value.
    #[tokio::test]
    async fn catch_up_decay_across_restart() {
        let h = harness("1h", T0).await;
        {
            let mut assoc = h.assoc.write().await;
            assoc.accumulate(3, 1000.0, 1000.0, None).unwrap();
        }
        let mut decay = h.decay;
        decay.tick(T0 + 7200).await.unwrap();

        let assoc = h.assoc.read().await;
        assert!(close(assoc.node(3).unwrap().usage_raw, 250.0, 1e-3));
        assert!(close(assoc.node(2).unwrap().usage_raw, 250.0, 1e-3));
    }

    #[tokio::test]
    async fn usage_snapshot_is_persisted_each_tick() {
        let mut h = harness("1h", T0).await;
        {
            let mut assoc = h.assoc.write().await;
            assoc.accumulate(3, 1000.0, 500.0, None).unwrap();
        }
        h.decay.tick(T0 + 3600).await.unwrap();

        let persisted = h.store.get_assoc(3).unwrap().unwrap();
        assert!(close(persisted.usage_raw, 500.0, 1e-3));
        assert!(close(persisted.grp_used_wall, 250.0, 1e-3));
    }

    #[tokio::test]
    async fn completed_jobs_charge_only_their_run_window() {
        let mut h = harness("1h", T0).await;
        let mut job = running_job(1, T0);
        job.state = JobState::Complete;
        job.end_time = T0 + 600; // Ran 10 minutes into the hour.
        h.store.put_job(&job).unwrap();

        h.decay.tick(T0 + 3600).await.unwrap();

        let assoc = h.assoc.read().await;
        let expected = 600.0 * per_second_decay(3600).powf(600.0);
        assert!(close(assoc.node(3).unwrap().usage_raw, expected, 1e-6));
    }

    #[tokio::test]
    async fn reconfig_flag_is_consumed_and_applied() {
        let mut h = harness("1h", T0).await;
        h.store.put_job(&pending_job(1, T0)).unwrap();

        {
            let mut config = h.config.write().await;
            config.priority.weight_fairshare = 0;
            config.priority.weight_age = 0;
        }
        h.state.lock().await.reconfig = true;

        h.decay.tick(T0 + 300).await.unwrap();

        assert!(!h.state.lock().await.reconfig);
        // All weights zero now: the job clamps to 1... but 1 is a held
        // value, so the repricer writes it and later ticks skip the job.
        assert_eq!(h.store.get_job(1).unwrap().unwrap().priority, 1);
    }

    #[tokio::test]
    async fn reconfig_with_identical_values_is_observationally_noop() {
        let mut h = harness("1h", T0).await;
        h.store.put_job(&pending_job(1, T0)).unwrap();

        h.decay.tick(T0 + 300).await.unwrap();
        let before = h.store.get_job(1).unwrap().unwrap().priority;

        // Flag a reconfig without changing anything; the same instant
        // must produce the same priority.
        h.state.lock().await.reconfig = true;
        h.decay.tick(T0 + 300).await.unwrap();
        assert_eq!(h.store.get_job(1).unwrap().unwrap().priority, before);
    }

    #[tokio::test]
    async fn reset_before_tick_zeroes_then_proceeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config("1h");
        config.priority.usage_reset_period = "600".to_string();
        let store = StateStore::open_in_memory().unwrap();

        let mut tree = AssocStore::load(
            &[
                assoc_record(2, None, PARENT_ROOT),
                assoc_record(3, Some("ada"), 2),
            ],
            Vec::new(),
            true,
        )
        .unwrap();
        tree.set_max_cluster_usage(1, 3600);
        tree.accumulate(3, 5000.0, 5000.0, None).unwrap();

        let assoc = Arc::new(RwLock::new(tree));
        let state = Arc::new(Mutex::new(DecayState {
            last_ran: T0,
            next_reset: T0 + 600,
            ..Default::default()
        }));
        let mut decay = DecayLoop::new(
            Arc::new(RwLock::new(config)),
            assoc.clone(),
            store.clone(),
            DecayClock::new(dir.path()),
            state.clone(),
        )
        .await;

        // The reset moment has passed: usage is zeroed before decay, so
        // the tick ends with zero usage, and the next reset is scheduled.
        decay.tick(T0 + 900).await.unwrap();
        assert_eq!(assoc.read().await.node(3).unwrap().usage_raw, 0.0);
        assert_eq!(state.lock().await.next_reset, T0 + 900 + 600);

        // A tick before the next reset moment decays normally.
        assoc.write().await.accumulate(3, 1000.0, 0.0, None).unwrap();
        decay.tick(T0 + 1200).await.unwrap();
        let remaining = assoc.read().await.node(3).unwrap().usage_raw;
        assert!(remaining > 0.0 && remaining < 1000.0);
    }

    #[tokio::test]
    async fn decay_clock_is_stamped_after_each_tick() {
        let dir = tempfile::tempdir().unwrap();
        let clock = DecayClock::new(dir.path());
        let config = Arc::new(RwLock::new(test_config("1h")));
        let store = StateStore::open_in_memory().unwrap();
        let assoc = Arc::new(RwLock::new(AssocStore::new(true)));
        let state = Arc::new(Mutex::new(DecayState::default()));

        let mut decay = DecayLoop::new(
            config,
            assoc,
            store,
            clock.clone(),
            state,
        )
        .await;
        decay.tick(T0).await.unwrap();
        decay.tick(T0 + 300).await.unwrap();

        assert_eq!(clock.load(), T0 + 300);
    }
}
