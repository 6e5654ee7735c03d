//! Job admission, the global FIFO queue and the worker-slot pool.

use chrono::Utc;
use futures::future::{self, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::{clamp_concurrency, BatchConfig};
use crate::domains::compression::service::{
    remove_file_quietly, CompressionEngine, CompressionService,
};
use crate::domains::compression::types::CompressionOptions;
use crate::errors::{DomainError, ServiceError, ServiceResult, ValidationError};
use super::archive::{self, ArchiveBuilder};
use super::events::{BatchEvent, EventBus, JobEventStream, JobLoader};
use super::repository::{InMemoryJobRepository, JobRepository};
use super::types::{BatchJob, JobStats, JobStatus, JobStatusReport, JobSummary, NewBatchFile};
use super::worker::JobWorker;

const ENTITY_NAME: &str = "BatchJob";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ProcessorInner {
    config: BatchConfig,
    repo: Arc<dyn JobRepository>,
    engine: Arc<dyn CompressionService>,
    events: EventBus,
    archive: ArchiveBuilder,
    queue: Mutex<VecDeque<Uuid>>,
    slots: Arc<Semaphore>,
    max_concurrent: Mutex<usize>,
    cancel_flags: Mutex<HashMap<Uuid, Arc<AtomicBool>>>,
}

/// Entry point for batch jobs. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct BatchProcessor {
    inner: Arc<ProcessorInner>,
}

impl BatchProcessor {
    pub fn new(
        config: BatchConfig,
        engine: Arc<dyn CompressionService>,
        repo: Arc<dyn JobRepository>,
    ) -> Self {
        let max_concurrent = clamp_concurrency(config.max_concurrent_jobs);
        Self {
            inner: Arc::new(ProcessorInner {
                archive: ArchiveBuilder::new(config.output_dir.clone()),
                config,
                repo,
                engine,
                events: EventBus::new(),
                queue: Mutex::new(VecDeque::new()),
                slots: Arc::new(Semaphore::new(max_concurrent)),
                max_concurrent: Mutex::new(max_concurrent),
                cancel_flags: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Ghostscript-backed engine with an in-memory job store.
    pub fn from_config(config: BatchConfig) -> Self {
        let engine = Arc::new(CompressionEngine::new(&config));
        Self::new(config, engine, Arc::new(InMemoryJobRepository::new()))
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        *lock(&self.inner.max_concurrent)
    }

    pub fn queued_jobs(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Admit a job and return its id without waiting for it to run.
    pub async fn create_batch_job(
        &self,
        owner_id: &str,
        files: Vec<NewBatchFile>,
        options: CompressionOptions,
    ) -> ServiceResult<Uuid> {
        if files.is_empty() {
            return Err(DomainError::Validation(ValidationError::required("files")).into());
        }
        options.validate().map_err(DomainError::from)?;

        let job = BatchJob::new(owner_id, files, options);
        let job_id = job.id;
        let file_count = job.files.len();

        lock(&self.inner.cancel_flags).insert(job_id, Arc::new(AtomicBool::new(false)));
        if let Err(e) = self.inner.repo.insert(job).await {
            lock(&self.inner.cancel_flags).remove(&job_id);
            return Err(e.into());
        }

        self.inner.events.publish(BatchEvent::JobCreated {
            job_id,
            owner_id: owner_id.to_string(),
            file_count,
        });
        lock(&self.inner.queue).push_back(job_id);
        log::info!("Created batch job {} for {} with {} files", job_id, owner_id, file_count);

        self.drain_queue();
        Ok(job_id)
    }

    /// Hand queued jobs to free worker slots, oldest first.
    fn drain_queue(&self) {
        loop {
            let Ok(permit) = self.inner.slots.clone().try_acquire_owned() else {
                return;
            };
            let Some(job_id) = lock(&self.inner.queue).pop_front() else {
                return;
            };

            let processor = self.clone();
            tokio::spawn(async move {
                processor.run_job(job_id).await;
                drop(permit);
                processor.drain_queue();
            });
        }
    }

    fn cancel_flag(&self, job_id: Uuid) -> Arc<AtomicBool> {
        lock(&self.inner.cancel_flags)
            .entry(job_id)
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    async fn run_job(&self, job_id: Uuid) {
        let worker = JobWorker::new(
            self.inner.repo.clone(),
            self.inner.engine.clone(),
            self.inner.events.clone(),
            self.inner.config.progress_tick,
            self.cancel_flag(job_id),
        );

        if let Err(e) = worker.run(job_id).await {
            log::error!("Batch job {} aborted: {}", job_id, e);
            self.mark_failed(job_id, e.to_string()).await;
        }
        lock(&self.inner.cancel_flags).remove(&job_id);
    }

    async fn mark_failed(&self, job_id: Uuid, error: String) {
        let mut job = match self.inner.repo.find_by_id(job_id).await {
            Ok(Some(job)) if !job.status.is_terminal() => job,
            Ok(_) => return,
            Err(e) => {
                log::error!("Failed to load job {} after error: {}", job_id, e);
                return;
            }
        };

        job.finish(JobStatus::Failed, Some(error.clone()));
        match self.inner.repo.update(&job).await {
            Ok(()) => self.inner.events.publish(BatchEvent::JobFailed { job_id, error }),
            Err(e) => log::error!("Failed to mark job {} as failed: {}", job_id, e),
        }
    }

    /// Cancel a job.
    ///
    /// A job still waiting in the queue is cancelled immediately. A running
    /// job stops before its next file; the file in flight always finishes.
    pub async fn cancel_job(&self, job_id: Uuid) -> ServiceResult<bool> {
        let Some(mut job) = self.inner.repo.find_by_id(job_id).await? else {
            return Ok(false);
        };

        match job.status {
            JobStatus::Pending => {
                let dequeued = {
                    let mut queue = lock(&self.inner.queue);
                    match queue.iter().position(|id| *id == job_id) {
                        Some(position) => queue.remove(position).is_some(),
                        None => false,
                    }
                };
                if !dequeued {
                    // Claimed by a worker that has not started it yet
                    return Ok(self.request_cancel(job_id));
                }

                lock(&self.inner.cancel_flags).remove(&job_id);
                job.cancel_requested = true;
                job.finish(JobStatus::Cancelled, None);
                self.inner.repo.update(&job).await?;
                log::info!("Cancelled queued job {}", job_id);
                self.inner.events.publish(BatchEvent::JobCancelled { job_id });
                Ok(true)
            }
            JobStatus::Processing => Ok(self.request_cancel(job_id)),
            _ => Ok(false),
        }
    }

    fn request_cancel(&self, job_id: Uuid) -> bool {
        match lock(&self.inner.cancel_flags).get(&job_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                log::info!("Cancellation requested for job {}", job_id);
                true
            }
            None => false,
        }
    }

    /// Resize the worker pool (clamped to 1..=10). Running jobs are never
    /// preempted; a smaller pool takes effect as slots free up.
    pub async fn set_max_concurrent_jobs(&self, requested: usize) -> usize {
        let target = clamp_concurrency(requested);
        {
            let mut current = lock(&self.inner.max_concurrent);
            if target > *current {
                self.inner.slots.add_permits(target - *current);
            } else if target < *current {
                let surplus = (*current - target) as u32;
                let slots = self.inner.slots.clone();
                tokio::spawn(async move {
                    match slots.acquire_many_owned(surplus).await {
                        Ok(permits) => permits.forget(),
                        Err(e) => log::warn!("Failed to shrink worker pool: {}", e),
                    }
                });
            }
            *current = target;
        }
        log::info!("Max concurrent jobs set to {}", target);
        self.drain_queue();
        target
    }

    pub async fn get_job_status(&self, job_id: Uuid) -> ServiceResult<Option<BatchJob>> {
        Ok(self.inner.repo.find_by_id(job_id).await?)
    }

    pub async fn get_job_report(&self, job_id: Uuid) -> ServiceResult<Option<JobStatusReport>> {
        Ok(self.inner.repo.find_by_id(job_id).await?.map(|job| job.report()))
    }

    pub async fn get_job_stats(&self, job_id: Uuid) -> ServiceResult<Option<JobStats>> {
        Ok(self.inner.repo.find_by_id(job_id).await?.map(|job| job.stats()))
    }

    pub async fn get_user_jobs(&self, owner_id: &str) -> ServiceResult<Vec<JobSummary>> {
        let jobs = self.inner.repo.find_by_owner(owner_id).await?;
        Ok(jobs.iter().map(BatchJob::summary).collect())
    }

    /// Stream of a job's events, starting with a snapshot of its current
    /// state. Returns `None` for an unknown job.
    pub async fn subscribe(&self, job_id: Uuid) -> ServiceResult<Option<JobEventStream>> {
        // Register before reading state so nothing falls in between
        let live = self.inner.events.subscribe_with_resync(job_id, Some(self.job_loader()));
        let Some(job) = self.inner.repo.find_by_id(job_id).await? else {
            return Ok(None);
        };

        let terminal = job.status.is_terminal();
        let snapshot = stream::once(future::ready(BatchEvent::JobSnapshot { job }));
        if terminal {
            Ok(Some(snapshot.boxed()))
        } else {
            Ok(Some(snapshot.chain(live).boxed()))
        }
    }

    fn job_loader(&self) -> JobLoader {
        let repo = self.inner.repo.clone();
        Arc::new(move |job_id: Uuid| {
            let repo = repo.clone();
            async move {
                match repo.find_by_id(job_id).await {
                    Ok(job) => job,
                    Err(e) => {
                        log::error!("Failed to reload job {} for a lagging subscriber: {}", job_id, e);
                        None
                    }
                }
            }
            .boxed()
        })
    }

    /// Bundle a completed job's outputs into `batch-<id>.zip`.
    pub async fn create_archive(&self, job_id: Uuid) -> ServiceResult<PathBuf> {
        let job = self
            .inner
            .repo
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| DomainError::EntityNotFound(ENTITY_NAME.to_string(), job_id))?;

        if job.status != JobStatus::Completed {
            return Err(ServiceError::InvalidState("Job not completed yet".to_string()));
        }

        Ok(self.inner.archive.build(&job).await?)
    }

    /// Remove a handed-out archive after the configured delay.
    pub fn schedule_archive_removal(&self, path: PathBuf) -> JoinHandle<()> {
        archive::schedule_removal(path, self.inner.config.archive_ttl)
    }

    /// Purge jobs created more than `max_age` ago along with their outputs.
    /// Jobs still processing are left alone.
    pub async fn cleanup_old_jobs(&self, max_age: Duration) -> ServiceResult<usize> {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };

        let mut cleaned = 0;
        for candidate in self.inner.repo.find_created_before(cutoff).await? {
            if candidate.status == JobStatus::Processing {
                continue;
            }

            // A worker may have claimed it since the listing
            let Some(job) = self.inner.repo.delete_unless_processing(candidate.id).await? else {
                continue;
            };
            lock(&self.inner.queue).retain(|id| *id != job.id);
            lock(&self.inner.cancel_flags).remove(&job.id);

            for result in job.results.iter().filter(|r| r.success) {
                remove_file_quietly(&result.output_path).await;
            }
            remove_file_quietly(&self.inner.archive.archive_path(job.id)).await;

            cleaned += 1;
            self.inner.events.publish(BatchEvent::JobCleaned { job_id: job.id });
        }

        if cleaned > 0 {
            log::info!("Cleaned up {} old batch jobs", cleaned);
        }
        Ok(cleaned)
    }

    /// Run `cleanup_old_jobs` with the configured retention on the
    /// configured interval until the handle is aborted.
    pub fn start_cleanup_scheduler(&self) -> JoinHandle<()> {
        let processor = self.clone();
        let period = self.inner.config.cleanup_interval.max(Duration::from_millis(1));
        let retention = self.inner.config.retention;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = processor.cleanup_old_jobs(retention).await {
                    log::error!("Batch cleanup failed: {}", e);
                }
            }
        })
    }
}
