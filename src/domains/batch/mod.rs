// Declare submodules for the batch domain
pub mod types;
pub mod progress;
pub mod events;
pub mod repository;
pub mod archive;
pub mod processor;
mod worker;

pub use types::{
    BatchFile, BatchJob, BatchProcessingResult, FileStatus, JobStats, JobStatus,
    JobStatusReport, JobSummary, NewBatchFile,
};

pub use events::{BatchEvent, EventBus, JobEventStream};
pub use repository::{InMemoryJobRepository, JobRepository};
pub use archive::ArchiveBuilder;
pub use processor::BatchProcessor;
