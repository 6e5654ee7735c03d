//! Batch PDF compression: queued jobs, bounded worker slots, progress
//! events and zip archives of the results.

pub mod config;
pub mod domains;
pub mod errors;

pub use config::BatchConfig;
pub use domains::batch::{BatchEvent, BatchJob, BatchProcessor, JobStatus, NewBatchFile};
pub use domains::compression::{CompressionOptions, CompressionQuality, format_file_size};
pub use errors::{DomainError, ServiceError, ValidationError};
