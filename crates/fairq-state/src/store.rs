//! StateStore — redb-backed persistence for the fairq controller.
//!
//! Typed CRUD over jobs, associations, partitions, and QOS classes. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(ASSOCS).map_err(map_err!(Table))?;
        txn.open_table(PARTITIONS).map_err(map_err!(Table))?;
        txn.open_table(QOS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Txn))?;
        Ok(())
    }

    fn put<T: serde::Serialize>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Encode))?;
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            t.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(())
    }

    fn get<T: serde::de::DeserializeOwned>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StoreResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        match t.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Decode))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: serde::de::DeserializeOwned>(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
    ) -> StoreResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Txn))?;
        let t = txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in t.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let decoded: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Decode))?;
            results.push(decoded);
        }
        Ok(results)
    }

    fn delete(
        &self,
        table: redb::TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        let existed;
        {
            let mut t = txn.open_table(table).map_err(map_err!(Table))?;
            existed = t.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(existed)
    }

    // ── Jobs ──────────────────────────────────────────────────────

    /// Insert or update a job record.
    pub fn put_job(&self, job: &JobRecord) -> StoreResult<()> {
        self.put(JOBS, &job.table_key(), job)?;
        debug!(job_id = job.job_id, "job stored");
        Ok(())
    }

    /// Get a job by id.
    pub fn get_job(&self, job_id: JobId) -> StoreResult<Option<JobRecord>> {
        self.get(JOBS, &job_key(job_id))
    }

    /// List all jobs in id order.
    pub fn list_jobs(&self) -> StoreResult<Vec<JobRecord>> {
        self.list(JOBS)
    }

    /// List pending jobs in id order.
    pub fn list_pending_jobs(&self) -> StoreResult<Vec<JobRecord>> {
        Ok(self
            .list_jobs()?
            .into_iter()
            .filter(|j| j.is_pending())
            .collect())
    }

    /// Delete a job by id. Returns true if it existed.
    pub fn delete_job(&self, job_id: JobId) -> StoreResult<bool> {
        let existed = self.delete(JOBS, &job_key(job_id))?;
        debug!(job_id, existed, "job deleted");
        Ok(existed)
    }

    /// Overwrite a batch of job records in a single write transaction.
    ///
    /// The decay loop uses this for the repricing pass so each tick
    /// publishes its priorities atomically.
    pub fn put_jobs(&self, jobs: &[JobRecord]) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        {
            let mut t = txn.open_table(JOBS).map_err(map_err!(Table))?;
            for job in jobs {
                let bytes = serde_json::to_vec(job).map_err(map_err!(Encode))?;
                t.insert(job.table_key().as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(())
    }

    // ── Associations ──────────────────────────────────────────────

    /// Insert or update an association record.
    pub fn put_assoc(&self, assoc: &AssocRecord) -> StoreResult<()> {
        self.put(ASSOCS, &assoc.table_key(), assoc)?;
        debug!(assoc_id = assoc.id, account = %assoc.account, "association stored");
        Ok(())
    }

    /// Get an association by id.
    pub fn get_assoc(&self, id: AssocId) -> StoreResult<Option<AssocRecord>> {
        self.get(ASSOCS, &assoc_key(id))
    }

    /// List all association records in id order.
    pub fn list_assocs(&self) -> StoreResult<Vec<AssocRecord>> {
        self.list(ASSOCS)
    }

    /// Delete an association by id. Returns true if it existed.
    pub fn delete_assoc(&self, id: AssocId) -> StoreResult<bool> {
        self.delete(ASSOCS, &assoc_key(id))
    }

    /// Write back decayed usage for a batch of associations in one
    /// transaction. Records that no longer exist are skipped.
    pub fn update_assoc_usage(
        &self,
        usage: &[(AssocId, f64, f64)],
    ) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Txn))?;
        {
            let mut t = txn.open_table(ASSOCS).map_err(map_err!(Table))?;
            for &(id, usage_raw, grp_used_wall) in usage {
                let key = assoc_key(id);
                let existing = match t.get(key.as_str()).map_err(map_err!(Read))? {
                    Some(guard) => {
                        let mut record: AssocRecord = serde_json::from_slice(guard.value())
                            .map_err(map_err!(Decode))?;
                        record.usage_raw = usage_raw;
                        record.grp_used_wall = grp_used_wall;
                        Some(record)
                    }
                    None => None,
                };
                if let Some(record) = existing {
                    let bytes = serde_json::to_vec(&record).map_err(map_err!(Encode))?;
                    t.insert(key.as_str(), bytes.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Txn))?;
        Ok(())
    }

    // ── Partitions ────────────────────────────────────────────────

    /// Insert or update a partition record.
    pub fn put_partition(&self, partition: &PartitionRecord) -> StoreResult<()> {
        self.put(PARTITIONS, &partition.name, partition)
    }

    /// Get a partition by name.
    pub fn get_partition(&self, name: &str) -> StoreResult<Option<PartitionRecord>> {
        self.get(PARTITIONS, name)
    }

    /// List all partitions.
    pub fn list_partitions(&self) -> StoreResult<Vec<PartitionRecord>> {
        self.list(PARTITIONS)
    }

    // ── QOS ───────────────────────────────────────────────────────

    /// Insert or update a QOS record.
    pub fn put_qos(&self, qos: &QosRecord) -> StoreResult<()> {
        self.put(QOS, &qos.table_key(), qos)
    }

    /// Get a QOS class by id.
    pub fn get_qos(&self, id: QosId) -> StoreResult<Option<QosRecord>> {
        self.get(QOS, &qos_key(id))
    }

    /// List all QOS classes in id order.
    pub fn list_qos(&self) -> StoreResult<Vec<QosRecord>> {
        self.list(QOS)
    }
}
