//! Storage for batch job records

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::{DomainError, DomainResult};
use super::types::{BatchJob, JobStatus};

const ENTITY_NAME: &str = "BatchJob";

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Store a newly created job
    async fn insert(&self, job: BatchJob) -> DomainResult<()>;

    /// Get a job by ID
    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<BatchJob>>;

    /// Replace a stored job. Terminal jobs are immutable.
    async fn update(&self, job: &BatchJob) -> DomainResult<()>;

    /// Remove a job unless it is processing, checked under the same lock.
    /// Returns the removed job.
    async fn delete_unless_processing(&self, id: Uuid) -> DomainResult<Option<BatchJob>>;

    /// Jobs created by `owner_id`, oldest first
    async fn find_by_owner(&self, owner_id: &str) -> DomainResult<Vec<BatchJob>>;

    /// Jobs created strictly before `cutoff`
    async fn find_created_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<BatchJob>>;
}

/// Process-local job store
#[derive(Default)]
pub struct InMemoryJobRepository {
    jobs: RwLock<HashMap<Uuid, BatchJob>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn insert(&self, job: BatchJob) -> DomainResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(DomainError::Conflict(format!("Job {} already exists", job.id)));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> DomainResult<Option<BatchJob>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, job: &BatchJob) -> DomainResult<()> {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(&job.id)
            .ok_or_else(|| DomainError::EntityNotFound(ENTITY_NAME.to_string(), job.id))?;

        if stored.status.is_terminal() {
            return Err(DomainError::Conflict(format!(
                "Job {} is already {}", job.id, stored.status.as_str()
            )));
        }

        *stored = job.clone();
        Ok(())
    }

    async fn delete_unless_processing(&self, id: Uuid) -> DomainResult<Option<BatchJob>> {
        let mut jobs = self.jobs.write().await;
        match jobs.get(&id) {
            Some(job) if job.status != JobStatus::Processing => Ok(jobs.remove(&id)),
            _ => Ok(None),
        }
    }

    async fn find_by_owner(&self, owner_id: &str) -> DomainResult<Vec<BatchJob>> {
        let jobs = self.jobs.read().await;
        let mut owned: Vec<BatchJob> = jobs
            .values()
            .filter(|job| job.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|job| job.created_at);
        Ok(owned)
    }

    async fn find_created_before(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<BatchJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .filter(|job| job.created_at < cutoff)
            .cloned()
            .collect())
    }
}
