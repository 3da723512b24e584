use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::error::DataJobError;
use crate::server::job::{JobRecord, JobStatus};
use crate::{JobId, Map, TenantName};

/// Storage of job records.
///
/// Implementations must serialize writes of a single record, while writes of different records
/// may proceed concurrently.
pub trait JobRegistry: Send + Sync {
    /// Inserts a new record or updates an existing one.
    ///
    /// An update fails with [`DataJobError::InvalidTransition`] if it would move the record
    /// backwards in its lifecycle or change its owner.
    fn put(&self, record: JobRecord) -> crate::Result<()>;

    /// Finds a record of `tenant`. Records of other tenants are never returned.
    fn get(&self, tenant: &TenantName, id: &JobId) -> Option<JobRecord>;

    /// Returns all records of `tenant`, in the order in which they were created.
    fn list(&self, tenant: &TenantName) -> Vec<JobRecord>;

    /// Returns records of all tenants that are currently executing in the backend.
    fn list_running(&self) -> Vec<JobRecord>;
}

/// In-memory registry.
///
/// Every record has its own lock; the index locks are only held while looking up or inserting
/// entries.
#[derive(Default)]
pub struct MemoryRegistry {
    jobs: RwLock<Map<JobId, Arc<Mutex<JobRecord>>>>,
    // Creation order of jobs per tenant
    tenants: RwLock<Map<TenantName, Vec<JobId>>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn update(entry: &Mutex<JobRecord>, record: JobRecord) -> crate::Result<()> {
        let mut stored = entry.lock();
        if stored.tenant != record.tenant || !stored.status.can_transition_to(record.status) {
            return Err(DataJobError::InvalidTransition {
                job_id: record.id,
                from: stored.status,
                to: record.status,
            });
        }
        let created_at = stored.created_at;
        *stored = record;
        stored.created_at = created_at;
        Ok(())
    }
}

impl JobRegistry for MemoryRegistry {
    fn put(&self, record: JobRecord) -> crate::Result<()> {
        let entry = self.jobs.read().get(&record.id).cloned();
        if let Some(entry) = entry {
            return Self::update(&entry, record);
        }

        let entry = {
            let mut jobs = self.jobs.write();
            match jobs.get(&record.id) {
                // Another writer inserted the record in the meantime
                Some(entry) => entry.clone(),
                None => {
                    let id = record.id.clone();
                    let tenant = record.tenant.clone();
                    jobs.insert(id.clone(), Arc::new(Mutex::new(record)));
                    self.tenants.write().entry(tenant).or_default().push(id);
                    return Ok(());
                }
            }
        };
        Self::update(&entry, record)
    }

    fn get(&self, tenant: &TenantName, id: &JobId) -> Option<JobRecord> {
        let entry = self.jobs.read().get(id).cloned()?;
        let record = entry.lock();
        (record.tenant == *tenant).then(|| record.clone())
    }

    fn list(&self, tenant: &TenantName) -> Vec<JobRecord> {
        let ids = match self.tenants.read().get(tenant) {
            Some(ids) => ids.clone(),
            None => return vec![],
        };
        let jobs = self.jobs.read();
        ids.iter()
            .filter_map(|id| jobs.get(id))
            .map(|entry| entry.lock().clone())
            .collect()
    }

    fn list_running(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .jobs
            .read()
            .values()
            .map(|entry| entry.lock())
            .filter(|record| record.status == JobStatus::Running)
            .map(|record| record.clone())
            .collect();
        records.sort_by_key(|record| record.created_at);
        records
    }
}
