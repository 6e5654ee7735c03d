//! Runs one claimed job: its files strictly in order, one at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::domains::compression::service::CompressionService;
use crate::errors::ServiceResult;
use super::events::{BatchEvent, EventBus};
use super::progress;
use super::repository::JobRepository;
use super::types::{
    BatchJob, BatchProcessingResult, FileStatus, JobStatus, ALL_FILES_FAILED,
};

pub(crate) struct JobWorker {
    repo: Arc<dyn JobRepository>,
    engine: Arc<dyn CompressionService>,
    events: EventBus,
    progress_tick: Duration,
    cancel_flag: Arc<AtomicBool>,
}

impl JobWorker {
    pub(crate) fn new(
        repo: Arc<dyn JobRepository>,
        engine: Arc<dyn CompressionService>,
        events: EventBus,
        progress_tick: Duration,
        cancel_flag: Arc<AtomicBool>,
    ) -> Self {
        Self {
            repo,
            engine,
            events,
            // A zero period would make the ramp interval panic
            progress_tick: progress_tick.max(Duration::from_millis(1)),
            cancel_flag,
        }
    }

    fn cancel_requested(&self) -> bool {
        self.cancel_flag.load(Ordering::SeqCst)
    }

    async fn save(&self, job: &mut BatchJob) -> ServiceResult<()> {
        job.cancel_requested |= self.cancel_requested();
        self.repo.update(job).await?;
        Ok(())
    }

    pub(crate) async fn run(&self, job_id: Uuid) -> ServiceResult<()> {
        let Some(mut job) = self.repo.find_by_id(job_id).await? else {
            log::warn!("Claimed job {} no longer exists", job_id);
            return Ok(());
        };

        if job.status != JobStatus::Pending {
            log::debug!("Skipping job {} in status {}", job_id, job.status.as_str());
            return Ok(());
        }

        if self.cancel_requested() {
            job.finish(JobStatus::Cancelled, None);
            self.save(&mut job).await?;
            log::info!("Job {} cancelled before it started", job_id);
            self.events.publish(BatchEvent::JobCancelled { job_id });
            return Ok(());
        }

        job.status = JobStatus::Processing;
        self.save(&mut job).await?;
        log::info!("Processing job {} ({} files)", job_id, job.files.len());
        self.events.publish(BatchEvent::JobStarted { job_id });

        let mut stopped_early = false;
        for index in 0..job.files.len() {
            if self.cancel_requested() {
                stopped_early = true;
                break;
            }
            self.process_file(&mut job, index).await?;
        }

        self.finish(job, stopped_early).await
    }

    async fn process_file(&self, job: &mut BatchJob, index: usize) -> ServiceResult<()> {
        let job_id = job.id;
        let (file_id, file_name, source) = {
            let file = &mut job.files[index];
            file.status = FileStatus::Processing;
            file.progress = 0;
            (file.id.clone(), file.original_name.clone(), file.source_path.clone())
        };
        self.save(job).await?;
        log::debug!("Job {}: compressing {} ({})", job_id, file_name, source.display());
        self.events.publish(BatchEvent::FileStarted {
            job_id,
            file_id: file_id.clone(),
            file_name,
        });

        let options = job.options.clone();
        let compress = self.engine.compress(&source, &options);
        tokio::pin!(compress);

        let mut ticker = interval_at(Instant::now() + self.progress_tick, self.progress_tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                result = &mut compress => break result,
                _ = ticker.tick() => {
                    let current = job.files[index].progress;
                    let next = progress::ramp(current);
                    if next != current {
                        job.files[index].progress = next;
                        job.recompute_progress();
                        self.save(job).await?;
                        self.events.publish(BatchEvent::FileProgress {
                            job_id,
                            file_id: file_id.clone(),
                            progress: next,
                        });
                        self.events.publish(BatchEvent::JobProgress {
                            job_id,
                            progress: job.progress,
                        });
                    }
                }
            }
        };

        job.results.push(BatchProcessingResult::from_result(&file_id, &result));
        job.files[index].finish(result.clone());
        job.recompute_progress();
        self.save(job).await?;

        if result.success {
            self.events.publish(BatchEvent::FileCompleted { job_id, file_id, result });
        } else {
            let error = result.error.unwrap_or_else(|| "Unknown error".to_string());
            log::warn!("Job {}: file {} failed: {}", job_id, file_id, error);
            self.events.publish(BatchEvent::FileError { job_id, file_id, error });
        }
        self.events.publish(BatchEvent::JobProgress {
            job_id,
            progress: job.progress,
        });
        Ok(())
    }

    async fn finish(&self, mut job: BatchJob, stopped_early: bool) -> ServiceResult<()> {
        let job_id = job.id;

        if stopped_early {
            job.finish(JobStatus::Cancelled, None);
            self.save(&mut job).await?;
            log::info!("Job {} cancelled at {}%", job_id, job.progress);
            self.events.publish(BatchEvent::JobCancelled { job_id });
        } else if job.successful_files().next().is_none() {
            job.finish(JobStatus::Failed, Some(ALL_FILES_FAILED.to_string()));
            self.save(&mut job).await?;
            log::warn!("Job {} failed: {}", job_id, ALL_FILES_FAILED);
            self.events.publish(BatchEvent::JobFailed {
                job_id,
                error: ALL_FILES_FAILED.to_string(),
            });
        } else {
            job.finish(JobStatus::Completed, None);
            self.save(&mut job).await?;
            let stats = job.stats();
            log::info!(
                "Job {} completed: {} succeeded, {} failed",
                job_id, stats.completed_files, stats.failed_files
            );
            self.events.publish(BatchEvent::JobCompleted { job_id, stats });
        }
        Ok(())
    }
}
