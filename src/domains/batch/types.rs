//! Job and file records for batch compression.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::domains::compression::types::{CompressionOptions, CompressionResult};

pub const ALL_FILES_FAILED: &str = "All files failed to process";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A file handed in for compression
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBatchFile {
    pub original_name: String,
    pub source_path: PathBuf,
    pub size_bytes: u64,
}

impl NewBatchFile {
    pub fn new(original_name: impl Into<String>, source_path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        Self {
            original_name: original_name.into(),
            source_path: source_path.into(),
            size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFile {
    pub id: String,
    pub original_name: String,
    pub source_path: PathBuf,
    pub size_bytes: u64,
    pub status: FileStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<CompressionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchFile {
    fn new(job_id: Uuid, index: usize, file: NewBatchFile) -> Self {
        Self {
            id: format!("{}-file-{}", job_id, index),
            original_name: file.original_name,
            source_path: file.source_path,
            size_bytes: file.size_bytes,
            status: FileStatus::Pending,
            progress: 0,
            result: None,
            error: None,
        }
    }

    /// Record the engine outcome; progress always lands on 100.
    pub fn finish(&mut self, result: CompressionResult) {
        self.progress = 100;
        if result.success {
            self.status = FileStatus::Completed;
            self.error = None;
        } else {
            self.status = FileStatus::Failed;
            self.error = result.error.clone();
        }
        self.result = Some(result);
    }
}

/// Per-file outcome in processing order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProcessingResult {
    pub file_id: String,
    pub success: bool,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: u8,
    pub output_path: PathBuf,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchProcessingResult {
    pub fn from_result(file_id: &str, result: &CompressionResult) -> Self {
        if !result.success {
            return Self {
                file_id: file_id.to_string(),
                success: false,
                original_size: 0,
                compressed_size: 0,
                compression_ratio: 0,
                output_path: PathBuf::new(),
                file_name: String::new(),
                error: result.error.clone(),
            };
        }
        Self {
            file_id: file_id.to_string(),
            success: true,
            original_size: result.original_size,
            compressed_size: result.compressed_size,
            compression_ratio: result.ratio,
            output_path: result.output_path.clone(),
            file_name: result.file_name.clone(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStats {
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    pub total_savings: u64,
}

/// Listing entry for a user's jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: Uuid,
    pub status: JobStatus,
    pub progress: u8,
    pub file_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub stats: JobStats,
}

/// Everything a status query returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusReport {
    pub job: BatchJob,
    pub stats: JobStats,
    pub results: Vec<BatchProcessingResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: Uuid,
    pub owner_id: String,
    pub files: Vec<BatchFile>,
    pub options: CompressionOptions,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub results: Vec<BatchProcessingResult>,
    pub cancel_requested: bool,
}

impl BatchJob {
    pub fn new(owner_id: impl Into<String>, files: Vec<NewBatchFile>, options: CompressionOptions) -> Self {
        let id = Uuid::new_v4();
        let files = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| BatchFile::new(id, index, file))
            .collect();

        Self {
            id,
            owner_id: owner_id.into(),
            files,
            options,
            status: JobStatus::Pending,
            progress: 0,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
            results: Vec::new(),
            cancel_requested: false,
        }
    }

    pub fn recompute_progress(&mut self) {
        self.progress = super::progress::job_progress(&self.files);
    }

    pub fn successful_files(&self) -> impl Iterator<Item = &BatchFile> {
        self.files
            .iter()
            .filter(|f| f.status == FileStatus::Completed)
    }

    pub fn stats(&self) -> JobStats {
        let mut stats = JobStats {
            total_files: self.files.len(),
            ..Default::default()
        };
        for file in &self.files {
            match file.status {
                FileStatus::Completed => stats.completed_files += 1,
                FileStatus::Failed => stats.failed_files += 1,
                _ => {}
            }
        }
        for result in self.results.iter().filter(|r| r.success) {
            stats.total_original_size += result.original_size;
            stats.total_compressed_size += result.compressed_size;
        }
        stats.total_savings = stats
            .total_original_size
            .saturating_sub(stats.total_compressed_size);
        stats
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            progress: self.progress,
            file_count: self.files.len(),
            created_at: self.created_at,
            completed_at: self.completed_at,
            stats: self.stats(),
        }
    }

    pub fn report(&self) -> JobStatusReport {
        JobStatusReport {
            job: self.clone(),
            stats: self.stats(),
            results: self.results.clone(),
        }
    }

    /// Move to a terminal status and stamp the completion time.
    pub fn finish(&mut self, status: JobStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
        self.completed_at = Some(Utc::now());
    }
}
