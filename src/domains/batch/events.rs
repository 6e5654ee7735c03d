//! Job lifecycle events and their broadcast bus.

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use uuid::Uuid;

use crate::domains::compression::types::CompressionResult;
use super::types::{BatchJob, JobStats};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Everything observable about a running batch, serialized as
/// `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum BatchEvent {
    /// Current state, sent once to each new subscriber
    JobSnapshot { job: BatchJob },
    JobCreated { job_id: Uuid, owner_id: String, file_count: usize },
    JobStarted { job_id: Uuid },
    FileStarted { job_id: Uuid, file_id: String, file_name: String },
    FileProgress { job_id: Uuid, file_id: String, progress: u8 },
    FileCompleted { job_id: Uuid, file_id: String, result: CompressionResult },
    FileError { job_id: Uuid, file_id: String, error: String },
    JobProgress { job_id: Uuid, progress: u8 },
    JobCompleted { job_id: Uuid, stats: JobStats },
    JobFailed { job_id: Uuid, error: String },
    JobCancelled { job_id: Uuid },
    JobCleaned { job_id: Uuid },
}

impl BatchEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            BatchEvent::JobSnapshot { job } => job.id,
            BatchEvent::JobCreated { job_id, .. }
            | BatchEvent::JobStarted { job_id }
            | BatchEvent::FileStarted { job_id, .. }
            | BatchEvent::FileProgress { job_id, .. }
            | BatchEvent::FileCompleted { job_id, .. }
            | BatchEvent::FileError { job_id, .. }
            | BatchEvent::JobProgress { job_id, .. }
            | BatchEvent::JobCompleted { job_id, .. }
            | BatchEvent::JobFailed { job_id, .. }
            | BatchEvent::JobCancelled { job_id }
            | BatchEvent::JobCleaned { job_id } => *job_id,
        }
    }

    /// Last event a job's stream will carry.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchEvent::JobCompleted { .. }
                | BatchEvent::JobFailed { .. }
                | BatchEvent::JobCancelled { .. }
                | BatchEvent::JobCleaned { .. }
        )
    }

    /// Render as a server-sent-events frame.
    pub fn to_sse_frame(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

pub type JobEventStream = BoxStream<'static, BatchEvent>;

/// Reloads a job's stored state after a subscriber missed events.
pub type JobLoader = Arc<dyn Fn(Uuid) -> BoxFuture<'static, Option<BatchJob>> + Send + Sync>;

/// Fan-out of batch events to any number of subscribers
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BatchEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, event: BatchEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Every event for every job.
    pub fn subscribe_all(&self) -> broadcast::Receiver<BatchEvent> {
        self.sender.subscribe()
    }

    /// Events for one job, ending after its terminal event.
    ///
    /// The receiver is registered before this returns, so nothing published
    /// afterwards is missed. A lagging subscriber cannot tell whether the
    /// terminal event was dropped, so the stream ends there.
    pub fn subscribe(&self, job_id: Uuid) -> JobEventStream {
        self.subscribe_with_resync(job_id, None)
    }

    /// Like [`EventBus::subscribe`], but on lag the job is reloaded through
    /// `resync` and sent as a `JobSnapshot`. The stream ends if that job is
    /// terminal or gone.
    pub fn subscribe_with_resync(&self, job_id: Uuid, resync: Option<JobLoader>) -> JobEventStream {
        let receiver = self.sender.subscribe();
        stream::unfold(Some(receiver), move |state| {
            let resync = resync.clone();
            async move {
                let mut receiver = state?;
                loop {
                    match receiver.recv().await {
                        Ok(event) if event.job_id() == job_id => {
                            let next = if event.is_terminal() { None } else { Some(receiver) };
                            return Some((event, next));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            log::warn!("Subscriber for job {} lagged, {} events dropped", job_id, skipped);
                            let load = resync?;
                            let job = load(job_id).await?;
                            let next = if job.status.is_terminal() { None } else { Some(receiver) };
                            return Some((BatchEvent::JobSnapshot { job }, next));
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_event_wire_shape() {
        let job_id = Uuid::new_v4();
        let event = BatchEvent::FileProgress {
            job_id,
            file_id: format!("{}-file-0", job_id),
            progress: 40,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "fileProgress");
        assert_eq!(json["data"]["jobId"], job_id.to_string());
        assert_eq!(json["data"]["progress"], 40);

        let frame = event.to_sse_frame().unwrap();
        assert!(frame.starts_with("data: {\"type\":\"fileProgress\""));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn test_terminal_events() {
        let job_id = Uuid::new_v4();
        assert!(BatchEvent::JobCancelled { job_id }.is_terminal());
        assert!(BatchEvent::JobFailed { job_id, error: "x".into() }.is_terminal());
        assert!(!BatchEvent::JobProgress { job_id, progress: 100 }.is_terminal());
        assert!(!BatchEvent::JobStarted { job_id }.is_terminal());
    }

    #[tokio::test]
    async fn test_subscribe_filters_by_job_and_ends() {
        let bus = EventBus::new();
        let mine = Uuid::new_v4();
        let other = Uuid::new_v4();
        let stream = bus.subscribe(mine);

        bus.publish(BatchEvent::JobStarted { job_id: other });
        bus.publish(BatchEvent::JobStarted { job_id: mine });
        bus.publish(BatchEvent::JobProgress { job_id: mine, progress: 50 });
        bus.publish(BatchEvent::JobCancelled { job_id: mine });
        bus.publish(BatchEvent::JobProgress { job_id: mine, progress: 99 });

        let events: Vec<BatchEvent> = tokio::time::timeout(Duration::from_secs(1), stream.collect())
            .await
            .expect("stream should end after the terminal event");
        assert_eq!(
            events,
            vec![
                BatchEvent::JobStarted { job_id: mine },
                BatchEvent::JobProgress { job_id: mine, progress: 50 },
                BatchEvent::JobCancelled { job_id: mine },
            ]
        );
    }

    /// Floods the shared channel from another job until `mine` lags.
    fn flood(bus: &EventBus) {
        let other = Uuid::new_v4();
        for progress in 0..(EVENT_CHANNEL_CAPACITY + 100) {
            bus.publish(BatchEvent::JobProgress { job_id: other, progress: (progress % 100) as u8 });
        }
    }

    #[tokio::test]
    async fn test_lagged_stream_without_resync_ends() {
        let bus = EventBus::new();
        let mine = Uuid::new_v4();
        let stream = bus.subscribe(mine);

        bus.publish(BatchEvent::JobStarted { job_id: mine });
        bus.publish(BatchEvent::JobCancelled { job_id: mine });
        flood(&bus);

        let events: Vec<BatchEvent> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
            .await
            .expect("lagged stream should end");
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_lagged_stream_resyncs_to_terminal_snapshot() {
        use crate::domains::batch::types::{JobStatus, NewBatchFile};
        use crate::domains::compression::types::CompressionOptions;
        use futures::FutureExt;

        let bus = EventBus::new();
        let mut job = BatchJob::new(
            "alice",
            vec![NewBatchFile::new("a.pdf", "/tmp/a.pdf", 10)],
            CompressionOptions::default(),
        );
        job.finish(JobStatus::Completed, None);
        let mine = job.id;

        let stored = job.clone();
        let loader: JobLoader = Arc::new(move |id: Uuid| {
            let job = (id == stored.id).then(|| stored.clone());
            async move { job }.boxed()
        });
        let stream = bus.subscribe_with_resync(mine, Some(loader));

        bus.publish(BatchEvent::JobStarted { job_id: mine });
        bus.publish(BatchEvent::JobCompleted { job_id: mine, stats: job.stats() });
        flood(&bus);

        let events: Vec<BatchEvent> = tokio::time::timeout(Duration::from_secs(2), stream.collect())
            .await
            .expect("stream for a completed job should end after lag");
        assert_eq!(events, vec![BatchEvent::JobSnapshot { job }]);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(BatchEvent::JobStarted { job_id: Uuid::new_v4() });
        let mut all = bus.subscribe_all();
        bus.publish(BatchEvent::JobCleaned { job_id: Uuid::nil() });
        assert_eq!(all.recv().await.unwrap().job_id(), Uuid::nil());
    }
}
